use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::schema::{CompiledSchema, InputSchema, Violations};
use crate::types::{error_result, McpError, RegistryError, ToolResult};

/// Handler trait for MCP tools. Implement this or use closures.
///
/// `args` has already been validated against the tool's input schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<ToolResult, McpError>;
}

/// Wraps an async closure into a ToolHandler.
pub struct FnToolHandler<F> {
    f: F,
}

impl<F, Fut> FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult, McpError>> + Send + 'static,
{
    pub fn new(f: F) -> Arc<dyn ToolHandler> {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult, McpError>> + Send + 'static,
{
    async fn call(&self, args: Value) -> Result<ToolResult, McpError> {
        (self.f)(args).await
    }
}

/// Wraps an async closure taking a typed argument struct.
///
/// The validated arguments are deserialized into `T` before the closure
/// runs, so the closure works with Rust types instead of `Value`.
pub struct TypedToolHandler<T, F> {
    f: F,
    _args: PhantomData<fn() -> T>,
}

impl<T, F, Fut> TypedToolHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult, McpError>> + Send + 'static,
{
    pub fn new(f: F) -> Arc<dyn ToolHandler> {
        Arc::new(Self {
            f,
            _args: PhantomData,
        })
    }
}

#[async_trait]
impl<T, F, Fut> ToolHandler for TypedToolHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult, McpError>> + Send + 'static,
{
    async fn call(&self, args: Value) -> Result<ToolResult, McpError> {
        let typed: T =
            serde_json::from_value(args).map_err(|e| McpError::Validation(e.to_string()))?;
        (self.f)(typed).await
    }
}

/// MCP tool definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Option<InputSchema>,
    /// Advertised only; results are not checked against it.
    #[serde(default)]
    pub output_schema: Option<InputSchema>,
    #[serde(default)]
    pub annotations: Option<Map<String, Value>>,
    /// Opaque side-channel for presentation layers (`_meta` on the wire).
    #[serde(default, rename = "_meta")]
    pub meta: Option<Map<String, Value>>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn input(mut self, schema: InputSchema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn output(mut self, schema: InputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }
}

/// The `tools/list` entry for a tool.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDescriptor<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    description: &'a str,
    input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<&'a Map<String, Value>>,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    meta: Option<&'a Map<String, Value>>,
}

/// Why a known tool did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ValidationFailed,
    HandlerFailed,
}

/// A per-call tool failure. Kept as a tagged value until the wire
/// boundary, where [`ToolFailure::to_result`] flattens it into an
/// error-flagged [`ToolResult`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolFailure {
    #[error("Invalid arguments for tool \"{tool}\": {violations}")]
    ValidationFailed { tool: String, violations: Violations },
    #[error("Tool \"{tool}\" failed: {message}")]
    HandlerFailed { tool: String, message: String },
}

impl ToolFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            ToolFailure::ValidationFailed { .. } => FailureKind::ValidationFailed,
            ToolFailure::HandlerFailed { .. } => FailureKind::HandlerFailed,
        }
    }

    pub fn to_result(&self) -> ToolResult {
        error_result(self.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error(transparent)]
    Failed(#[from] ToolFailure),
}

struct RegisteredTool {
    definition: ToolDefinition,
    schema: Option<CompiledSchema>,
    handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    fn descriptor(&self) -> ToolDescriptor<'_> {
        let input_schema = match &self.schema {
            Some(compiled) => compiled.json_schema().clone(),
            None => json!({"type": "object", "properties": {}}),
        };
        ToolDescriptor {
            name: &self.definition.name,
            title: self.definition.title.as_deref(),
            description: &self.definition.description,
            input_schema,
            output_schema: self
                .definition
                .output_schema
                .as_ref()
                .map(InputSchema::to_json_schema),
            annotations: self.definition.annotations.as_ref(),
            meta: self.definition.meta.as_ref(),
        }
    }
}

/// Name → {definition, compiled schema, handler}.
///
/// Populated during startup and read-only afterwards, so concurrent
/// sessions share it without locking.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names and uncompilable schemas are
    /// configuration errors.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateTool(definition.name));
        }

        let schema = definition
            .input_schema
            .as_ref()
            .map(CompiledSchema::compile)
            .transpose()
            .map_err(|e| RegistryError::InvalidSchema {
                tool: definition.name.clone(),
                message: e.to_string(),
            })?;

        tracing::info!(tool = %definition.name, "registered tool");
        self.order.push(definition.name.clone());
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                schema,
                handler,
            },
        );
        Ok(())
    }

    /// Register tools in order, stopping at the first failure.
    pub fn register_all(
        &mut self,
        tools: impl IntoIterator<Item = (ToolDefinition, Arc<dyn ToolHandler>)>,
    ) -> Result<(), RegistryError> {
        for (definition, handler) in tools {
            self.register(definition, handler)?;
        }
        Ok(())
    }

    /// Validate `raw_args` and run the tool's handler.
    ///
    /// The handler only runs when validation succeeded. Handler errors and
    /// panics come back as [`ToolFailure::HandlerFailed`].
    pub async fn invoke(&self, name: &str, raw_args: Value) -> Result<ToolResult, InvokeError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| InvokeError::UnknownTool(name.to_string()))?;

        let args = match &tool.schema {
            Some(schema) => schema.validate(&raw_args).map_err(|violations| {
                tracing::debug!(tool = name, %violations, "arguments rejected");
                ToolFailure::ValidationFailed {
                    tool: name.to_string(),
                    violations,
                }
            })?,
            None if raw_args.is_null() => json!({}),
            None => raw_args,
        };

        // Run on its own task so a panicking handler surfaces as a JoinError.
        let handler = Arc::clone(&tool.handler);
        let outcome = tokio::spawn(async move { handler.call(args).await }).await;

        let message = match outcome {
            Ok(Ok(result)) => return Ok(result),
            Ok(Err(e)) => e.to_string(),
            Err(join) if join.is_panic() => "handler panicked".to_string(),
            Err(join) => join.to_string(),
        };
        tracing::warn!(tool = name, error = %message, "tool handler failed");
        Err(ToolFailure::HandlerFailed {
            tool: name.to_string(),
            message,
        }
        .into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Registered names in registration order.
    pub fn list_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    /// The `tools/list` result body.
    pub fn list_json(&self) -> Value {
        let tools: Vec<ToolDescriptor<'_>> = self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(RegisteredTool::descriptor)
            .collect();
        json!({ "tools": tools })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;
    use crate::types::text_result;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, args: Value) -> Result<ToolResult, McpError> {
            let msg = args.get("msg").and_then(|v| v.as_str()).unwrap_or("no msg");
            Ok(text_result(msg))
        }
    }

    fn echo_definition() -> ToolDefinition {
        ToolDefinition::new("echo", "echoes").input(InputSchema::new().field("msg", FieldSchema::string()))
    }

    fn recording_handler(ran: Arc<AtomicBool>) -> Arc<dyn ToolHandler> {
        FnToolHandler::new(move |_args: Value| {
            let ran = Arc::clone(&ran);
            async move {
                ran.store(true, Ordering::SeqCst);
                Ok(text_result("ran"))
            }
        })
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_definition(), Arc::new(EchoHandler)).unwrap();
        let err = reg.register(echo_definition(), Arc::new(EchoHandler)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool(name) if name == "echo"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_register_all_stops_at_first_failure() {
        let mut reg = ToolRegistry::new();
        let handler: Arc<dyn ToolHandler> = Arc::new(EchoHandler);
        let result = reg.register_all(vec![
            (ToolDefinition::new("a", "a"), Arc::clone(&handler)),
            (ToolDefinition::new("a", "again"), Arc::clone(&handler)),
            (ToolDefinition::new("b", "b"), handler),
        ]);
        assert!(result.is_err());
        assert_eq!(reg.list_names(), vec!["a"]);
    }

    #[test]
    fn test_invalid_schema_rejected_at_registration() {
        let mut reg = ToolRegistry::new();
        let def = ToolDefinition::new("bad", "bad")
            .input(InputSchema::new().field("x", FieldSchema::string().pattern("(")));
        let err = reg.register(def, Arc::new(EchoHandler)).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { .. }));
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let mut reg = ToolRegistry::new();
        reg.register(echo_definition(), Arc::new(EchoHandler)).unwrap();
        let result = reg.invoke("echo", json!({"msg": "hi"})).await.unwrap();
        assert_eq!(result.content[0].text.as_deref(), Some("hi"));
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let reg = ToolRegistry::new();
        let err = reg.invoke("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, InvokeError::UnknownTool(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_validation_failure_skips_handler() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut reg = ToolRegistry::new();
        reg.register(echo_definition(), recording_handler(Arc::clone(&ran)))
            .unwrap();

        let err = reg.invoke("echo", json!({"msg": 5})).await.unwrap_err();
        let InvokeError::Failed(failure) = err else {
            panic!("expected a tool failure");
        };
        assert_eq!(failure.kind(), FailureKind::ValidationFailed);
        assert!(!ran.load(Ordering::SeqCst));

        let result = failure.to_result();
        assert!(result.is_error);
        assert!(result.content[0].text.as_deref().unwrap().contains("msg"));
    }

    #[tokio::test]
    async fn test_handler_error_is_normalized() {
        let mut reg = ToolRegistry::new();
        reg.register(
            ToolDefinition::new("fail", "always fails"),
            FnToolHandler::new(|_args: Value| async move {
                Err(McpError::ToolError("database unavailable".into()))
            }),
        )
        .unwrap();

        let err = reg.invoke("fail", json!({})).await.unwrap_err();
        let InvokeError::Failed(failure) = err else {
            panic!("expected a tool failure");
        };
        assert_eq!(failure.kind(), FailureKind::HandlerFailed);
        assert!(failure.to_string().contains("database unavailable"));
    }

    #[tokio::test]
    async fn test_handler_panic_is_normalized() {
        let mut reg = ToolRegistry::new();
        reg.register(
            ToolDefinition::new("boom", "panics"),
            FnToolHandler::new(|_args: Value| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(text_result("unreachable"))
            }),
        )
        .unwrap();

        let err = reg.invoke("boom", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Failed(ToolFailure::HandlerFailed { ref message, .. }) if message == "handler panicked"
        ));
    }

    #[derive(Debug, Deserialize)]
    struct GreetArgs {
        name: String,
        times: i64,
        loud: bool,
    }

    #[tokio::test]
    async fn test_typed_handler_receives_declared_types() {
        let mut reg = ToolRegistry::new();
        reg.register(
            ToolDefinition::new("greet", "greets").input(
                InputSchema::new()
                    .field("name", FieldSchema::string())
                    .field("times", FieldSchema::integer())
                    .field("loud", FieldSchema::boolean()),
            ),
            TypedToolHandler::new(|args: GreetArgs| async move {
                let mut greeting = format!("hello {}", args.name).repeat(args.times as usize);
                if args.loud {
                    greeting = greeting.to_uppercase();
                }
                Ok(text_result(greeting))
            }),
        )
        .unwrap();

        let result = reg
            .invoke("greet", json!({"name": "ada", "times": 2, "loud": true}))
            .await
            .unwrap();
        assert_eq!(result.content[0].text.as_deref(), Some("HELLO ADAHELLO ADA"));
    }

    #[tokio::test]
    async fn test_tool_without_schema_receives_raw_args() {
        let mut reg = ToolRegistry::new();
        reg.register(
            ToolDefinition::new("raw", "raw"),
            FnToolHandler::new(|args: Value| async move { Ok(text_result(args.to_string())) }),
        )
        .unwrap();
        let result = reg.invoke("raw", Value::Null).await.unwrap();
        assert_eq!(result.content[0].text.as_deref(), Some("{}"));
    }

    #[test]
    fn test_list_json_advertises_schema_and_meta() {
        let mut reg = ToolRegistry::new();
        reg.register(
            echo_definition()
                .title("Echo")
                .annotation("readOnlyHint", json!(true))
                .meta("openai/outputTemplate", json!("ui://widget/echo.html")),
            Arc::new(EchoHandler),
        )
        .unwrap();
        let list = reg.list_json();
        let tool = &list["tools"][0];
        assert_eq!(tool["name"], "echo");
        assert_eq!(tool["title"], "Echo");
        assert_eq!(tool["inputSchema"]["required"], json!(["msg"]));
        assert_eq!(tool["annotations"]["readOnlyHint"], true);
        assert_eq!(tool["_meta"]["openai/outputTemplate"], "ui://widget/echo.html");
    }
}
