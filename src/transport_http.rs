use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::server::Server;
use crate::session::Session;
use crate::types::{
    new_error_response, JsonRpcRequest, McpResponse, ERR_CODE_INTERNAL, ERR_CODE_INVALID_REQ,
    ERR_CODE_PARSE,
};

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Request body: one JSON-RPC request or a batch.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Batch(Vec<JsonRpcRequest>),
    Single(JsonRpcRequest),
}

enum Reply {
    Single(McpResponse),
    Batch(Vec<McpResponse>),
}

/// Create an Axum router for the MCP server.
///
/// Every `POST /mcp` gets its own [`Session`] bound to the shared server.
/// There is no SSE stream, so `GET` and `DELETE` on `/mcp` answer 405.
pub fn http_router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/healthz", get(handle_healthz))
        .with_state(server)
}

async fn handle_healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn handle_mcp(State(server): State<Arc<Server>>, body: Bytes) -> Response {
    let payload = match parse_payload(&body) {
        Ok(payload) => payload,
        Err(resp) => return resp,
    };
    let single_id = match &payload {
        Payload::Single(req) => req.id.clone(),
        Payload::Batch(_) => None,
    };

    let session = Arc::new(Session::new(server));
    let session_id = session.id().to_string();
    let (tx, rx) = oneshot::channel();

    // The session outlives this handler if the client goes away; its
    // result is then dropped here instead of being written anywhere.
    tokio::spawn(async move {
        let reply = match payload {
            Payload::Single(req) => Reply::Single(session.handle(req).await),
            Payload::Batch(reqs) => Reply::Batch(session.handle_batch(reqs).await),
        };
        if tx.send(reply).is_err() {
            tracing::debug!(session = %session.id(), "client disconnected, discarding result");
        }
    });

    let reply = match rx.await {
        Ok(reply) => reply,
        Err(_) => {
            tracing::error!(session = %session_id, "session task failed");
            let err = new_error_response(single_id, ERR_CODE_INTERNAL, "internal error");
            return with_session(Json(err).into_response(), &session_id);
        }
    };

    let response = match reply {
        Reply::Single(resp) if resp.is_notification() => return accepted(),
        Reply::Single(resp) => Json(&resp).into_response(),
        Reply::Batch(responses) => {
            let responses: Vec<McpResponse> = responses
                .into_iter()
                .filter(|r| !r.is_notification())
                .collect();
            if responses.is_empty() {
                return accepted();
            }
            Json(&responses).into_response()
        }
    };
    with_session(response, &session_id)
}

fn parse_payload(body: &[u8]) -> Result<Payload, Response> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "malformed request body");
        bad_request(ERR_CODE_PARSE, format!("Parse error: {}", e))
    })?;
    let payload: Payload = serde_json::from_value(value).map_err(|e| {
        tracing::debug!(error = %e, "body is not a JSON-RPC request");
        bad_request(ERR_CODE_INVALID_REQ, "Invalid request")
    })?;
    match payload {
        Payload::Batch(ref reqs) if reqs.is_empty() => {
            Err(bad_request(ERR_CODE_INVALID_REQ, "Invalid request: empty batch"))
        }
        payload => Ok(payload),
    }
}

fn bad_request(code: i32, message: impl Into<String>) -> Response {
    let err = new_error_response(None, code, message);
    (StatusCode::BAD_REQUEST, Json(err)).into_response()
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, Body::empty()).into_response()
}

fn with_session(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}
