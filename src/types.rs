use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::salt::SaltError;

/// JSON-RPC 2.0 error codes.
pub const ERR_CODE_PARSE: i32 = -32700;
pub const ERR_CODE_INVALID_REQ: i32 = -32600;
pub const ERR_CODE_NO_METHOD: i32 = -32601;
pub const ERR_CODE_BAD_PARAMS: i32 = -32602;
pub const ERR_CODE_INTERNAL: i32 = -32603;

/// MCP Protocol version this server implements.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

// ── Request ──

/// Inbound JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Requests without an id are notifications and never get a reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

// ── Response ──

/// Response produced by a [`Session`](crate::Session).
///
/// For cached endpoints (`tools/list`, `resources/list`) the result is
/// pre-serialized JSON shared via `Arc`; the registries never change after
/// startup, so per-request cost is a single ref-count increment.
///
/// Implements [`Serialize`] so it can be handed directly to `axum::Json`.
/// For structured inspection (e.g. in tests), call
/// [`into_json_rpc()`](McpResponse::into_json_rpc).
#[derive(Debug)]
pub struct McpResponse {
    id: Option<Value>,
    kind: ResponseKind,
}

#[derive(Debug)]
enum ResponseKind {
    /// Pre-serialized result.
    Cached(Arc<RawValue>),
    /// Dynamically constructed result.
    Result(Value),
    /// Error.
    Error(RpcError),
    /// Notification sentinel, no response body.
    Notification,
}

impl McpResponse {
    /// True when the request was a notification (no response body needed).
    pub fn is_notification(&self) -> bool {
        matches!(self.kind, ResponseKind::Notification)
    }

    /// The request id this response answers.
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// Convert to a [`JsonRpcResponse`] for structured inspection.
    ///
    /// For cached results this parses the raw JSON back into a `Value`.
    pub fn into_json_rpc(self) -> JsonRpcResponse {
        match self.kind {
            ResponseKind::Cached(raw) => JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: self.id,
                result: serde_json::from_str(raw.get()).ok(),
                error: None,
            },
            ResponseKind::Result(value) => new_ok_response(self.id, value),
            ResponseKind::Error(err) => JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: self.id,
                result: None,
                error: Some(err),
            },
            ResponseKind::Notification => notification_response(),
        }
    }

    // ── Internal constructors ──

    pub(crate) fn cached(id: Option<Value>, raw: &Arc<RawValue>) -> Self {
        McpResponse {
            id,
            kind: ResponseKind::Cached(Arc::clone(raw)),
        }
    }

    pub(crate) fn ok(id: Option<Value>, result: Value) -> Self {
        McpResponse {
            id,
            kind: ResponseKind::Result(result),
        }
    }

    pub(crate) fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        McpResponse {
            id,
            kind: ResponseKind::Error(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    pub(crate) fn notification() -> Self {
        McpResponse {
            id: None,
            kind: ResponseKind::Notification,
        }
    }
}

impl Serialize for McpResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let has_id = self.id.is_some();
        let has_payload = !matches!(self.kind, ResponseKind::Notification);
        let len = 1 + has_id as usize + has_payload as usize;

        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("jsonrpc", "2.0")?;

        if let Some(ref id) = self.id {
            map.serialize_entry("id", id)?;
        }

        match &self.kind {
            ResponseKind::Cached(raw) => map.serialize_entry("result", raw.as_ref())?,
            ResponseKind::Result(value) => map.serialize_entry("result", value)?,
            ResponseKind::Error(err) => map.serialize_entry("error", err)?,
            ResponseKind::Notification => {}
        }

        map.end()
    }
}

/// Structured JSON-RPC 2.0 response, used for inspection and for errors
/// raised before a session exists (e.g. unparseable bodies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// Returns true when this is a notification sentinel (no body needed).
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.result.is_none() && self.error.is_none()
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ── MCP content types ──

/// Tool call result returned by handlers and by the tool registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// Single content block in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 payload for media blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock {
            block_type: "text".into(),
            text: Some(text.into()),
            data: None,
            mime_type: None,
        }
    }

    /// Image block; `bytes` are base64-encoded here.
    pub fn image(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        use base64::Engine as _;

        ContentBlock {
            block_type: "image".into(),
            text: None,
            data: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            mime_type: Some(mime_type.into()),
        }
    }
}

/// Resource content returned by `resources/read`.
///
/// Exactly one of `text` / `blob` is present on the wire; the body is an
/// enum so no other state is representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: String,
    #[serde(flatten)]
    pub body: ResourceBody,
}

/// The encoded payload of a [`ResourceContent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceBody {
    Text(String),
    /// Base64 (standard alphabet) encoded bytes.
    Blob(String),
}

impl ResourceContent {
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            ResourceBody::Text(t) => Some(t),
            ResourceBody::Blob(_) => None,
        }
    }

    pub fn blob(&self) -> Option<&str> {
        match &self.body {
            ResourceBody::Blob(b) => Some(b),
            ResourceBody::Text(_) => None,
        }
    }
}

// ── Convenience constructors ──

/// Create a simple text tool result.
pub fn text_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![ContentBlock::text(text)],
        structured_content: None,
        is_error: false,
    }
}

/// Create a result carrying both a text summary and structured data.
pub fn structured_result(text: impl Into<String>, data: Value) -> ToolResult {
    ToolResult {
        content: vec![ContentBlock::text(text)],
        structured_content: Some(data),
        is_error: false,
    }
}

/// Create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![ContentBlock::text(text)],
        structured_content: None,
        is_error: true,
    }
}

/// Build a JSON-RPC error response.
pub fn new_error_response(id: Option<Value>, code: i32, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.into(),
            data: None,
        }),
    }
}

/// Build a JSON-RPC success response.
pub fn new_ok_response(id: Option<Value>, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id,
        result: Some(result),
        error: None,
    }
}

/// Build a notification sentinel (empty response, triggers HTTP 202).
pub fn notification_response() -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".into(),
        id: None,
        result: None,
        error: None,
    }
}

// ── Errors ──

/// Error type returned by tool handlers and resource producers.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("tool error: {0}")]
    ToolError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Configuration errors. These are fatal: the server must not start
/// serving once one has been raised.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
    #[error("duplicate resource uri: {0}")]
    DuplicateResource(String),
    #[error("no handler registered for tool: {0}")]
    MissingHandler(String),
    #[error("invalid input schema for tool {tool}: {message}")]
    InvalidSchema { tool: String, message: String },
    #[error(transparent)]
    Salt(#[from] SaltError),
    #[error("load definitions: {0}")]
    Load(#[from] McpError),
}

// Internal params structs for deserialization.

#[derive(Debug, Deserialize)]
pub(crate) struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceReadParams {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CancelledParams {
    pub request_id: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_content_text_serializes_single_field() {
        let content = ResourceContent {
            uri: "demo://x".into(),
            mime_type: "text/plain".into(),
            body: ResourceBody::Text("hello".into()),
        };
        let v = serde_json::to_value(&content).unwrap();
        assert_eq!(
            v,
            json!({"uri": "demo://x", "mimeType": "text/plain", "text": "hello"})
        );
        assert!(v.get("blob").is_none());
    }

    #[test]
    fn test_resource_content_blob_deserializes() {
        let v = json!({"uri": "demo://b", "mimeType": "image/png", "blob": "AAE="});
        let content: ResourceContent = serde_json::from_value(v).unwrap();
        assert_eq!(content.blob(), Some("AAE="));
        assert_eq!(content.text(), None);
    }

    #[test]
    fn test_error_result_is_flagged() {
        let r = error_result("boom");
        assert!(r.is_error);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["isError"], true);
        assert_eq!(v["content"][0]["text"], "boom");
    }

    #[test]
    fn test_text_result_omits_error_flag() {
        let v = serde_json::to_value(text_result("ok")).unwrap();
        assert!(v.get("isError").is_none());
        assert!(v.get("structuredContent").is_none());
    }

    #[test]
    fn test_cached_response_serializes_raw() {
        let raw: Arc<RawValue> = RawValue::from_string(r#"{"tools":[]}"#.into()).unwrap().into();
        let resp = McpResponse::cached(Some(json!(7)), &raw);
        let s = serde_json::to_string(&resp).unwrap();
        assert_eq!(s, r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#);
    }

    #[test]
    fn test_notification_serializes_without_payload() {
        let s = serde_json::to_string(&McpResponse::notification()).unwrap();
        assert_eq!(s, r#"{"jsonrpc":"2.0"}"#);
    }
}
