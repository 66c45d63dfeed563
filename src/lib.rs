//! `apphost`: registration and dispatch core for MCP app servers.
//!
//! Tools (validated by a declared input schema) and resources (static,
//! produced on demand, or auto-discovered UI widgets) are registered once at
//! startup into a read-only [`Server`]. Each inbound HTTP request then gets
//! its own [`Session`], so concurrent clients never share request ids.
//! Resource URIs carry a per-deployment salt for cache busting.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use apphost::{
//!     http_router, text_result, FieldSchema, FnToolHandler, InputSchema, SaltStore, Server,
//!     ToolDefinition,
//! };
//! use serde_json::Value;
//!
//! # async fn example() -> Result<(), apphost::RegistryError> {
//! let salt = Arc::new(SaltStore::new("ui"));
//! salt.initialize()?;
//!
//! let server = Server::builder(salt)
//!     .tool(
//!         ToolDefinition::new("echo", "echoes")
//!             .input(InputSchema::new().field("message", FieldSchema::string())),
//!         FnToolHandler::new(|args: Value| async move {
//!             Ok(text_result(args["message"].as_str().unwrap_or_default()))
//!         }),
//!     )
//!     .server_info("my-server", "0.1.0")
//!     .build()
//!     .await?;
//!
//! // Serve with axum: POST /mcp, GET /healthz.
//! let app = http_router(Arc::new(server));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod loader;
pub mod resources;
pub mod salt;
pub mod schema;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport_http;
pub mod types;

// Re-export the most commonly used items at the crate root.
pub use config::ServerConfig;
pub use discovery::{DiscoveredWidget, Discovery};
pub use loader::{load_resources, load_tools, parse_resources, parse_tools};
pub use resources::{
    FnResourceProducer, Produced, ReadError, ResourceDefinition, ResourceProducer,
    ResourceRegistry, StaticText,
};
pub use salt::{resource_key, SaltError, SaltStore};
pub use schema::{CompiledSchema, FieldKind, FieldSchema, InputSchema, UnknownFields, Violations};
pub use server::{Server, ServerBuilder};
pub use session::Session;
pub use tools::{
    FailureKind, FnToolHandler, InvokeError, ToolDefinition, ToolFailure, ToolHandler,
    ToolRegistry, TypedToolHandler,
};
pub use transport_http::http_router;
pub use types::{
    error_result, new_error_response, structured_result, text_result, ContentBlock,
    JsonRpcRequest, JsonRpcResponse, McpError, McpResponse, RegistryError, ResourceBody,
    ResourceContent, RpcError, ToolResult, PROTOCOL_VERSION,
};
