mod tools;

use std::sync::Arc;

use apphost::{http_router, Discovery, RegistryError, SaltStore, Server, ServerConfig};

async fn build_server(config: &ServerConfig, salt: Arc<SaltStore>) -> Result<Server, RegistryError> {
    let builder = Server::builder(salt)
        .resources_json(include_bytes!("../resources.json"))
        .discover(Discovery::new(&config.widgets_dir, &config.assets_dir))
        .tools_json(include_bytes!("../tools.json"))
        .server_info(&config.server_name, &config.server_version);

    tools::register_all(builder).build().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    let config = ServerConfig::from_env();

    let salt = Arc::new(SaltStore::new(config.resource_scheme.clone()));
    salt.initialize_with(config.salt.as_deref())
        .expect("salt initialized twice");

    let srv = build_server(&config, salt)
        .await
        .expect("invalid server configuration");
    tracing::info!(
        tools = srv.tools().len(),
        resources = srv.resources().len(),
        "registries ready"
    );

    let addr = config.addr();
    tracing::info!(addr = %addr, "starting MCP server");

    let router = http_router(Arc::new(srv));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use apphost::{JsonRpcRequest, Session};
    use serde_json::{json, Value};

    async fn setup_server() -> Arc<Server> {
        let config = ServerConfig {
            widgets_dir: "/nonexistent/widgets".into(),
            ..ServerConfig::default()
        };
        let salt = Arc::new(SaltStore::new("ui"));
        salt.initialize_with(Some("test")).unwrap();
        Arc::new(build_server(&config, salt).await.unwrap())
    }

    fn make_req(method: &str, params: Value) -> JsonRpcRequest {
        serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": method, "params": params
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_shipped_definitions_all_have_handlers() {
        let srv = setup_server().await;
        assert_eq!(srv.tools().list_names(), vec!["echo"]);
        assert_eq!(srv.resources().list_uris(), vec![tools::HELLO_URI]);
    }

    #[tokio::test]
    async fn test_echo_repeats() {
        let session = Session::new(setup_server().await);
        let resp = session
            .handle(make_req(
                "tools/call",
                json!({"name": "echo", "arguments": {"message": "hi", "times": 3}}),
            ))
            .await
            .into_json_rpc();
        let result = resp.result.unwrap();
        assert!(result.get("isError").is_none());
        assert_eq!(result["content"][0]["text"], "hi hi hi");
    }

    #[tokio::test]
    async fn test_echo_rejects_out_of_range_times() {
        let session = Session::new(setup_server().await);
        let resp = session
            .handle(make_req(
                "tools/call",
                json!({"name": "echo", "arguments": {"message": "hi", "times": 50}}),
            ))
            .await
            .into_json_rpc();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("times"));
    }

    #[tokio::test]
    async fn test_hello_resource() {
        let session = Session::new(setup_server().await);
        let resp = session
            .handle(make_req("resources/read", json!({"uri": tools::HELLO_URI})))
            .await
            .into_json_rpc();
        let result = resp.result.unwrap();
        assert_eq!(result["contents"][0]["text"], "Hello from apphost!");
        assert_eq!(result["contents"][0]["mimeType"], "text/plain");
    }
}
