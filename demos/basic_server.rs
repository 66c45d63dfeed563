//! Basic MCP app server example.
//!
//! Run with: `cargo run --example basic_server`
//! Then test with:
//!   curl -X POST http://localhost:3000/mcp \
//!     -H "Content-Type: application/json" \
//!     -d '{"jsonrpc":"2.0","id":1,"method":"resources/list"}'

use std::sync::Arc;

use apphost::{
    http_router, structured_result, text_result, Discovery, FieldSchema, FnResourceProducer,
    FnToolHandler, InputSchema, McpError, Produced, ResourceDefinition, ResourceProducer,
    SaltStore, Server, ToolDefinition, ToolHandler, ToolResult, UnknownFields,
};
use async_trait::async_trait;
use serde_json::{json, Value};

/// A struct-based tool handler for the "greet" tool.
struct GreetHandler;

#[async_trait]
impl ToolHandler for GreetHandler {
    async fn call(&self, args: Value) -> Result<ToolResult, McpError> {
        let name = args["name"].as_str().unwrap_or("world");
        let greeting = match args["style"].as_str() {
            Some("formal") => format!("Good day, {}.", name),
            _ => format!("Hey, {}!", name),
        };
        Ok(structured_result(greeting.clone(), json!({ "greeting": greeting })))
    }
}

/// A struct-based producer serving a JSON settings document.
struct SettingsProducer;

#[async_trait]
impl ResourceProducer for SettingsProducer {
    async fn produce(&self, _uri: &str) -> Result<Produced, McpError> {
        Ok(Produced::text(r#"{"debug": false, "version": "1.0"}"#))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let salt = Arc::new(SaltStore::new("ui"));
    salt.initialize().expect("salt initialized twice");

    let greet = ToolDefinition::new("greet", "Greets someone by name")
        .title("Greeter")
        .input(
            InputSchema::new()
                .field("name", FieldSchema::string().length(Some(1), Some(64)))
                .field(
                    "style",
                    FieldSchema::string()
                        .one_of([json!("casual"), json!("formal")])
                        .optional(),
                )
                .unknown_fields(UnknownFields::Reject),
        );

    let shout = ToolDefinition::new("shout", "Upper-cases a message")
        .input(InputSchema::new().field("message", FieldSchema::string()));

    let server = Server::builder(Arc::clone(&salt))
        .resource(
            ResourceDefinition::new("config://settings", "settings", "Server settings", "application/json"),
            Arc::new(SettingsProducer),
        )
        .resource(
            ResourceDefinition::new("config://pixel.gif", "pixel", "A 1x1 GIF", "image/gif"),
            FnResourceProducer::new(|_uri: String| async move {
                Ok(Produced::bytes(b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec()))
            }),
        )
        // Widgets are picked up from demos/widgets with bundles in demos/assets.
        .discover(Discovery::new("demos/widgets", "demos/assets"))
        .tool(greet, Arc::new(GreetHandler))
        .tool(
            shout,
            FnToolHandler::new(|args: Value| async move {
                Ok(text_result(args["message"].as_str().unwrap_or_default().to_uppercase()))
            }),
        )
        .server_info("example-server", "0.1.0")
        .build()
        .await
        .expect("invalid server configuration");

    let app = http_router(Arc::new(server));
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.expect("bind");
    println!("MCP server listening on http://localhost:3000");
    println!("  POST /mcp     MCP JSON-RPC endpoint");
    println!("  GET  /healthz health check");
    axum::serve(listener, app).await.expect("server error");
}
