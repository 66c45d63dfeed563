//! Per-request protocol sessions.
//!
//! Every inbound HTTP request gets its own [`Session`]. The session owns the
//! set of request ids currently in flight and the set of ids the client
//! cancelled; nothing else is mutable, and nothing mutable is shared with
//! other sessions. Two clients can therefore both use id `1` at the same
//! time without ever observing each other.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::server::Server;
use crate::types::{
    CancelledParams, JsonRpcRequest, McpResponse, ERR_CODE_INTERNAL, ERR_CODE_INVALID_REQ,
};

pub struct Session {
    id: String,
    server: Arc<Server>,
    in_flight: Mutex<HashSet<String>>,
    cancelled: Mutex<HashSet<String>>,
}

/// A request whose id has been reserved in the session.
enum Slot {
    Run(JsonRpcRequest),
    Done(McpResponse),
}

impl Session {
    pub fn new(server: Arc<Server>) -> Self {
        let id = Uuid::new_v4().to_string();
        tracing::debug!(session = %id, "session opened");
        Session {
            id,
            server,
            in_flight: Mutex::new(HashSet::new()),
            cancelled: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handle a single request.
    pub async fn handle(&self, req: JsonRpcRequest) -> McpResponse {
        match self.reserve(req) {
            Slot::Done(resp) => resp,
            Slot::Run(req) => self.run(req).await,
        }
    }

    /// Handle a batch. Ids are reserved in order before anything runs, so a
    /// repeated id is rejected deterministically; the remaining requests run
    /// concurrently. Responses come back in request order.
    pub async fn handle_batch(self: &Arc<Self>, reqs: Vec<JsonRpcRequest>) -> Vec<McpResponse> {
        let slots: Vec<Slot> = reqs.into_iter().map(|req| self.reserve(req)).collect();

        let mut pending = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Done(resp) => pending.push(Err(resp)),
                Slot::Run(req) => {
                    let id = req.id.clone();
                    let session = Arc::clone(self);
                    let handle = tokio::spawn(async move { session.run(req).await });
                    pending.push(Ok((id, handle)));
                }
            }
        }

        let mut responses = Vec::with_capacity(pending.len());
        for entry in pending {
            let resp = match entry {
                Err(resp) => resp,
                Ok((id, handle)) => match handle.await {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::error!(session = %self.id, error = %e, "request task failed");
                        if let Some(key) = id.as_ref().map(id_key) {
                            self.release(&key);
                        }
                        McpResponse::error(id, ERR_CODE_INTERNAL, "internal error")
                    }
                },
            };
            responses.push(resp);
        }
        responses
    }

    /// Claim the request's id, or answer it immediately.
    fn reserve(&self, req: JsonRpcRequest) -> Slot {
        if req.method == "notifications/cancelled" {
            self.cancel(&req);
            return Slot::Done(McpResponse::notification());
        }

        let Some(id) = req.id.as_ref() else {
            return Slot::Run(req);
        };

        let key = id_key(id);
        let fresh = lock(&self.in_flight).insert(key);
        if fresh {
            Slot::Run(req)
        } else {
            tracing::debug!(session = %self.id, id = %id, "duplicate request id");
            let message = format!("request id {} is already in flight", id);
            Slot::Done(McpResponse::error(req.id, ERR_CODE_INVALID_REQ, message))
        }
    }

    async fn run(&self, req: JsonRpcRequest) -> McpResponse {
        let key = req.id.as_ref().map(id_key);
        let resp = self.server.dispatch(req).await;

        let Some(key) = key else {
            return McpResponse::notification();
        };
        self.release(&key);
        if lock(&self.cancelled).remove(&key) {
            tracing::debug!(session = %self.id, id = %key, "discarding result of cancelled request");
            return McpResponse::notification();
        }
        resp
    }

    fn cancel(&self, req: &JsonRpcRequest) {
        let Some(params) = req.params.clone() else {
            return;
        };
        match serde_json::from_value::<CancelledParams>(params) {
            Ok(p) => {
                let key = id_key(&p.request_id);
                tracing::debug!(session = %self.id, id = %key, "request cancelled");
                lock(&self.cancelled).insert(key);
            }
            Err(e) => tracing::debug!(session = %self.id, error = %e, "ignoring malformed cancellation"),
        }
    }

    fn release(&self, key: &str) {
        lock(&self.in_flight).remove(key);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!(session = %self.id, "session closed");
    }
}

/// Ids are compared by their JSON text, so `1` and `"1"` are distinct.
fn id_key(id: &Value) -> String {
    id.to_string()
}

fn lock(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    // The guarded sets stay consistent even if a holder panicked.
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
