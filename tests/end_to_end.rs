//! Drives the full stack (router, session, registries) over HTTP requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apphost::{
    http_router, text_result, FieldSchema, FnResourceProducer, FnToolHandler, InputSchema,
    Produced, ResourceDefinition, SaltStore, Server, ToolDefinition,
};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn router(calls: Arc<AtomicUsize>) -> Router {
    let salt = SaltStore::new("ui");
    salt.initialize_with(Some("e2e")).unwrap();

    let server = Server::builder(Arc::new(salt))
        .tool(
            ToolDefinition::new("echo", "echoes msg")
                .input(InputSchema::new().field("msg", FieldSchema::string())),
            FnToolHandler::new(move |args: Value| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Give concurrent requests a chance to interleave.
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(text_result(args["msg"].as_str().unwrap_or_default()))
                }
            }),
        )
        .resource(
            ResourceDefinition::new("demo://x", "x", "demo resource", "text/plain"),
            FnResourceProducer::new(|_uri: String| async move { Ok(Produced::text("hello")) }),
        )
        .build()
        .await
        .unwrap();
    http_router(Arc::new(server))
}

async fn post(app: Router, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn call_echo(id: Value, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0", "id": id, "method": "tools/call",
        "params": {"name": "echo", "arguments": arguments}
    })
}

#[tokio::test]
async fn test_tool_call_validates_before_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = router(Arc::clone(&calls)).await;

    let (status, v) = post(app.clone(), call_echo(json!(1), json!({"msg": "hi"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(v["result"].get("isError").is_none());
    assert_eq!(v["result"]["content"][0]["text"], "hi");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (status, v) = post(app, call_echo(json!(2), json!({"msg": 5}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["result"]["isError"], true);
    let text = v["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Invalid arguments for tool \"echo\""), "got: {}", text);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "handler must not run on invalid input");
}

#[tokio::test]
async fn test_resource_read_returns_text_content() {
    let app = router(Arc::new(AtomicUsize::new(0))).await;
    let (status, v) = post(
        app,
        json!({"jsonrpc": "2.0", "id": 1, "method": "resources/read", "params": {"uri": "demo://x"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        v["result"]["contents"][0],
        json!({"uri": "demo://x", "mimeType": "text/plain", "text": "hello"})
    );
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_cross_contaminate() {
    let app = router(Arc::new(AtomicUsize::new(0))).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let msg = format!("client-{}", i);
            let (_, v) = post(app, call_echo(json!(1), json!({"msg": msg.clone()}))).await;
            (msg, v)
        }));
    }

    for handle in handles {
        let (msg, v) = handle.await.unwrap();
        assert_eq!(v["id"], 1);
        assert_eq!(v["result"]["content"][0]["text"], msg);
    }
}

#[tokio::test]
async fn test_list_endpoints() {
    let app = router(Arc::new(AtomicUsize::new(0))).await;
    let (_, v) = post(
        app,
        json!([
            {"jsonrpc": "2.0", "id": "t", "method": "tools/list"},
            {"jsonrpc": "2.0", "id": "r", "method": "resources/list"},
            {"jsonrpc": "2.0", "id": "x", "method": "resources/templates/list"}
        ]),
    )
    .await;
    let items = v.as_array().unwrap();
    assert_eq!(items[0]["result"]["tools"][0]["name"], "echo");
    assert_eq!(items[1]["result"]["resources"][0]["uri"], "demo://x");
    assert_eq!(items[2]["result"]["resourceTemplates"], json!([]));
}
