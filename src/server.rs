use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::value::RawValue;
use serde_json::{json, Value};

use crate::discovery::Discovery;
use crate::loader;
use crate::resources::{ReadError, ResourceDefinition, ResourceProducer, ResourceRegistry, StaticText};
use crate::salt::SaltStore;
use crate::tools::{InvokeError, ToolDefinition, ToolHandler, ToolRegistry};
use crate::types::*;

/// The shared, read-only half of the server: both registries, the salt and
/// the server identity. Built once by [`ServerBuilder`], then handed to
/// every [`Session`](crate::Session) behind an `Arc`.
#[derive(Debug)]
pub struct Server {
    pub(crate) server_name: String,
    pub(crate) server_version: String,
    pub(crate) instructions: Option<String>,
    pub(crate) tools: ToolRegistry,
    pub(crate) resources: ResourceRegistry,
    pub(crate) salt: Arc<SaltStore>,
    tools_list: Arc<RawValue>,
    resources_list: Arc<RawValue>,
}

impl Server {
    /// Create a new server builder. `salt` must be initialized before
    /// [`ServerBuilder::build`] runs.
    pub fn builder(salt: Arc<SaltStore>) -> ServerBuilder {
        ServerBuilder {
            salt,
            server_name: None,
            server_version: None,
            instructions: None,
            static_resources: Vec::new(),
            resource_producers: HashMap::new(),
            discoveries: Vec::new(),
            tool_defs: Vec::new(),
            tool_handlers: HashMap::new(),
            error: None,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn salt(&self) -> &SaltStore {
        &self.salt
    }

    /// Route a JSON-RPC request to the appropriate MCP handler.
    pub(crate) async fn dispatch(&self, req: JsonRpcRequest) -> McpResponse {
        if req.jsonrpc != "2.0" {
            return McpResponse::error(req.id, ERR_CODE_INVALID_REQ, "jsonrpc must be '2.0'");
        }

        let method = req.method.clone();
        tracing::debug!(method = %method, "dispatch");
        match method.as_str() {
            "initialize" => self.handle_initialize(req),
            "ping" => McpResponse::ok(req.id, json!({})),
            m if m.starts_with("notifications/") => McpResponse::notification(),
            "tools/list" => McpResponse::cached(req.id, &self.tools_list),
            "tools/call" => self.handle_tools_call(req).await,
            "resources/list" => McpResponse::cached(req.id, &self.resources_list),
            "resources/templates/list" => McpResponse::ok(req.id, json!({"resourceTemplates": []})),
            "resources/read" => self.handle_resources_read(req).await,
            _ => McpResponse::error(
                req.id,
                ERR_CODE_NO_METHOD,
                format!("Method not found: {}", method),
            ),
        }
    }

    fn handle_initialize(&self, req: JsonRpcRequest) -> McpResponse {
        if let Some(params) = &req.params {
            if let Ok(p) = serde_json::from_value::<InitializeParams>(params.clone()) {
                let client_name = p.client_info.as_ref().map_or("", |c| c.name.as_str());
                let client_version = p.client_info.as_ref().map_or("", |c| c.version.as_str());
                tracing::info!(
                    client_name,
                    client_version,
                    protocol_version = ?p.protocol_version,
                    "initialize"
                );
            }
        }

        let mut result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {"subscribe": false, "listChanged": false},
            },
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version,
            },
        });
        if let Some(instructions) = &self.instructions {
            result["instructions"] = json!(instructions);
        }

        McpResponse::ok(req.id, result)
    }

    async fn handle_tools_call(&self, req: JsonRpcRequest) -> McpResponse {
        let params: ToolCallParams = match parse_params(&req) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let result = match self.tools.invoke(&params.name, params.arguments).await {
            Ok(result) => result,
            Err(InvokeError::UnknownTool(name)) => {
                return McpResponse::error(req.id, ERR_CODE_NO_METHOD, format!("Unknown tool: {}", name));
            }
            Err(InvokeError::Failed(failure)) => failure.to_result(),
        };

        match serde_json::to_value(&result) {
            Ok(value) => McpResponse::ok(req.id, value),
            Err(e) => McpResponse::error(req.id, ERR_CODE_INTERNAL, format!("encode result: {}", e)),
        }
    }

    async fn handle_resources_read(&self, req: JsonRpcRequest) -> McpResponse {
        let params: ResourceReadParams = match parse_params(&req) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        match self.resources.read(&params.uri).await {
            Ok(content) => McpResponse::ok(req.id, json!({ "contents": [content] })),
            Err(e @ ReadError::NotFound(_)) => McpResponse::error(req.id, ERR_CODE_BAD_PARAMS, e.to_string()),
            Err(e @ ReadError::Producer { .. }) => McpResponse::error(req.id, ERR_CODE_INTERNAL, e.to_string()),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(req: &JsonRpcRequest) -> Result<T, McpResponse> {
    let Some(params) = req.params.as_ref() else {
        return Err(McpResponse::error(req.id.clone(), ERR_CODE_BAD_PARAMS, "params required"));
    };
    serde_json::from_value(params.clone()).map_err(|e| {
        McpResponse::error(
            req.id.clone(),
            ERR_CODE_BAD_PARAMS,
            format!("invalid params: {}", e),
        )
    })
}

/// Builder for constructing an MCP Server.
///
/// Nothing is registered until [`build`](ServerBuilder::build), which runs
/// the startup sequence in a fixed order: static resources, then
/// discovered resources (awaited to completion), then tools.
pub struct ServerBuilder {
    salt: Arc<SaltStore>,
    server_name: Option<String>,
    server_version: Option<String>,
    instructions: Option<String>,
    static_resources: Vec<(ResourceDefinition, Option<Arc<dyn ResourceProducer>>)>,
    resource_producers: HashMap<String, Arc<dyn ResourceProducer>>,
    discoveries: Vec<Discovery>,
    tool_defs: Vec<(ToolDefinition, Option<Arc<dyn ToolHandler>>)>,
    tool_handlers: HashMap<String, Arc<dyn ToolHandler>>,
    error: Option<RegistryError>,
}

impl ServerBuilder {
    fn fail(&mut self, err: RegistryError) {
        tracing::error!(error = %err, "server configuration error");
        self.error.get_or_insert(err);
    }

    /// Add a static resource together with its producer.
    pub fn resource(mut self, definition: ResourceDefinition, producer: Arc<dyn ResourceProducer>) -> Self {
        self.static_resources.push((definition, Some(producer)));
        self
    }

    /// Add resource definitions; attach producers with
    /// [`handle_resource`](ServerBuilder::handle_resource). Definitions left
    /// without a producer serve empty text.
    pub fn resources(mut self, definitions: Vec<ResourceDefinition>) -> Self {
        self.static_resources
            .extend(definitions.into_iter().map(|d| (d, None)));
        self
    }

    /// Parse resource definitions from raw JSON bytes.
    pub fn resources_json(mut self, data: &[u8]) -> Self {
        match loader::parse_resources(data) {
            Ok(resources) => self.resources(resources),
            Err(e) => {
                self.fail(e.into());
                self
            }
        }
    }

    /// Load resource definitions from a JSON file.
    pub fn resources_file(mut self, path: impl AsRef<Path>) -> Self {
        match loader::load_resources(path) {
            Ok(resources) => self.resources(resources),
            Err(e) => {
                self.fail(e.into());
                self
            }
        }
    }

    /// Attach a producer to a resource definition by uri.
    pub fn handle_resource(mut self, uri: &str, producer: Arc<dyn ResourceProducer>) -> Self {
        self.resource_producers
            .insert(crate::salt::resource_key(uri), producer);
        self
    }

    /// Register every widget found by `discovery` during build.
    pub fn discover(mut self, discovery: Discovery) -> Self {
        self.discoveries.push(discovery);
        self
    }

    /// Add a tool definition together with its handler.
    pub fn tool(mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        self.tool_defs.push((definition, Some(handler)));
        self
    }

    /// Add tool definitions; attach handlers with
    /// [`handle_tool`](ServerBuilder::handle_tool).
    pub fn tools(mut self, definitions: Vec<ToolDefinition>) -> Self {
        self.tool_defs
            .extend(definitions.into_iter().map(|d| (d, None)));
        self
    }

    /// Parse tool definitions from raw JSON bytes.
    pub fn tools_json(mut self, data: &[u8]) -> Self {
        match loader::parse_tools(data) {
            Ok(tools) => self.tools(tools),
            Err(e) => {
                self.fail(e.into());
                self
            }
        }
    }

    /// Load tool definitions from a JSON file.
    pub fn tools_file(mut self, path: impl AsRef<Path>) -> Self {
        match loader::load_tools(path) {
            Ok(tools) => self.tools(tools),
            Err(e) => {
                self.fail(e.into());
                self
            }
        }
    }

    /// Attach a handler to a tool definition by name.
    pub fn handle_tool(mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.tool_handlers.insert(name.into(), handler);
        self
    }

    /// Set server name and version.
    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self.server_version = Some(version.into());
        self
    }

    /// Usage hints returned from `initialize`.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Run the startup sequence and freeze the registries.
    pub async fn build(mut self) -> Result<Server, RegistryError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.salt.current()?;

        let mut resources = ResourceRegistry::new();
        for (definition, producer) in self.static_resources {
            let producer = producer
                .or_else(|| self.resource_producers.remove(&definition.key()))
                .unwrap_or_else(|| StaticText::new(""));
            resources.register(definition, producer)?;
        }
        for uri in self.resource_producers.keys() {
            tracing::warn!(uri = %uri, "producer attached to an undeclared resource, ignoring");
        }

        let salt = &self.salt;
        resources
            .register_all_async(self.discoveries.iter().map(|d| d.discover(salt)))
            .await?;

        let mut tools = ToolRegistry::new();
        for (definition, handler) in self.tool_defs {
            let handler = handler
                .or_else(|| self.tool_handlers.remove(&definition.name))
                .ok_or_else(|| RegistryError::MissingHandler(definition.name.clone()))?;
            tools.register(definition, handler)?;
        }
        for name in self.tool_handlers.keys() {
            tracing::warn!(tool = %name, "handler attached to an undeclared tool, ignoring");
        }

        let tools_list = cache(&tools.list_json())?;
        let resources_list = cache(&resources.list_json())?;

        tracing::info!(
            tools = tools.len(),
            resources = resources.len(),
            "server ready"
        );

        Ok(Server {
            server_name: self.server_name.unwrap_or_else(|| "apphost".into()),
            server_version: self
                .server_version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").into()),
            instructions: self.instructions,
            tools,
            resources,
            salt: self.salt,
            tools_list,
            resources_list,
        })
    }
}

fn cache(value: &Value) -> Result<Arc<RawValue>, RegistryError> {
    serde_json::value::to_raw_value(value)
        .map(Arc::from)
        .map_err(|e| RegistryError::Load(McpError::Json(e)))
}
