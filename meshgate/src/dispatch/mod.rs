//! Session & dispatch engine: JSON-RPC validation, method routing with
//! scope enforcement, post-actions, and per-method telemetry.

pub mod connection;
pub mod telemetry;

pub use connection::{Connection, ConnectionState};
pub use telemetry::MethodTelemetry;

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meshgate_types::{
    GatewayError, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR,
};

use crate::server::GatewayServer;

/// Method permission classes. The table is part of the gateway contract,
/// not configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodAccess {
    ReadOnly,
    Write,
    AdminOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostActionMode {
    /// Runs inline immediately after the response is enqueued.
    Sync,
    /// Runs on a worker after a short delay.
    Deferred(Duration),
}

/// State change that must not take effect before the client has seen the
/// acknowledgement (e.g. a binary-mode switch).
pub struct PostAction {
    pub mode: PostActionMode,
    run: Box<dyn FnOnce() + Send + 'static>,
}

impl PostAction {
    pub fn sync(run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            mode: PostActionMode::Sync,
            run: Box::new(run),
        }
    }

    pub fn deferred(delay: Duration, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            mode: PostActionMode::Deferred(delay),
            run: Box::new(run),
        }
    }

    /// Execute per mode. Callers invoke this strictly after the response
    /// bytes are on the transport.
    pub fn execute(self) {
        match self.mode {
            PostActionMode::Sync => (self.run)(),
            PostActionMode::Deferred(delay) => {
                let run = self.run;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    run();
                });
            }
        }
    }
}

pub struct HandlerOutput {
    pub result: Value,
    pub post_action: Option<PostAction>,
}

impl HandlerOutput {
    pub fn result(result: Value) -> Self {
        Self {
            result,
            post_action: None,
        }
    }

    pub fn with_post_action(result: Value, post_action: PostAction) -> Self {
        Self {
            result,
            post_action: Some(post_action),
        }
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerOutput, GatewayError>> + Send>>;
pub type HandlerFn = fn(Arc<GatewayServer>, Arc<Connection>, Value) -> HandlerFuture;

struct MethodEntry {
    access: MethodAccess,
    requires_session: bool,
    handler: HandlerFn,
}

/// Outcome of one dispatched message: the response to enqueue (absent for
/// notifications) and the post-action to run after enqueueing it.
pub struct DispatchResult {
    pub response: Option<JsonRpcResponse>,
    pub post_action: Option<PostAction>,
}

pub struct Dispatcher {
    methods: HashMap<String, MethodEntry>,
    telemetry: MethodTelemetry,
    auth_required: bool,
}

impl Dispatcher {
    pub fn new(auth_required: bool) -> Self {
        Self {
            methods: HashMap::new(),
            telemetry: MethodTelemetry::new(),
            auth_required,
        }
    }

    pub fn register(
        &mut self,
        method: &str,
        access: MethodAccess,
        requires_session: bool,
        handler: HandlerFn,
    ) {
        self.methods.insert(
            method.to_string(),
            MethodEntry {
                access,
                requires_session,
                handler,
            },
        );
    }

    pub fn telemetry(&self) -> &MethodTelemetry {
        &self.telemetry
    }

    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.methods.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Entry point for raw transport frames.
    pub async fn dispatch_raw(
        &self,
        server: Arc<GatewayServer>,
        conn: Arc<Connection>,
        raw: &str,
    ) -> DispatchResult {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return DispatchResult {
                    response: Some(JsonRpcResponse::error(
                        None,
                        PARSE_ERROR,
                        format!("parse error: {e}"),
                    )),
                    post_action: None,
                }
            }
        };
        self.dispatch_value(server, conn, value).await
    }

    pub async fn dispatch_value(
        &self,
        server: Arc<GatewayServer>,
        conn: Arc<Connection>,
        value: Value,
    ) -> DispatchResult {
        let id = value.get("id").cloned();

        // 1. Must be a request (a message carrying a method).
        if value.get("method").and_then(Value::as_str).is_none() {
            return self.error_result(
                id,
                GatewayError::InvalidMessage("message is not a request".to_string()),
            );
        }
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return self.error_result(
                    id,
                    GatewayError::InvalidMessage(format!("malformed request: {e}")),
                )
            }
        };

        // 2. An explicitly empty id is invalid; an absent id is a
        //    notification and produces no response.
        let is_notification = request.id.is_none();
        if let Some(raw_id) = &request.id {
            let empty = matches!(raw_id, Value::Null)
                || matches!(raw_id, Value::String(s) if s.is_empty());
            if empty {
                return self.error_result(
                    request.id.clone(),
                    GatewayError::InvalidMessage("request id must be non-empty".to_string()),
                );
            }
        }

        // 3. Method must be registered.
        let Some(entry) = self.methods.get(&request.method) else {
            return self.error_result(
                request.id.clone(),
                GatewayError::MethodNotFound(request.method.clone()),
            );
        };

        // 4. Authentication.
        if self.auth_required && conn.claims.is_none() {
            return self.error_result(
                request.id.clone(),
                GatewayError::AuthFailed("connection is not authenticated".to_string()),
            );
        }

        // 5. Scope enforcement; the handler is never invoked on violation.
        if let Some(claims) = &conn.claims {
            let allowed = match entry.access {
                MethodAccess::ReadOnly => claims.can_read(),
                MethodAccess::Write => claims.can_write(),
                MethodAccess::AdminOnly => claims.can_admin(),
            };
            if !allowed {
                return self.error_result(
                    request.id.clone(),
                    GatewayError::AuthFailed(format!(
                        "method {} requires elevated scope",
                        request.method
                    )),
                );
            }
        }

        // Session requirement for non-initialize methods.
        if entry.requires_session && !server.sessions.contains_key(&conn.id) {
            return self.error_result(
                request.id.clone(),
                GatewayError::SessionNotFound(format!(
                    "no session for connection {}; call initialize first",
                    conn.id
                )),
            );
        }

        let params = request.params.clone().unwrap_or(Value::Null);
        let started = Instant::now();
        let outcome = (entry.handler)(server, conn, params).await;
        self.telemetry
            .record(&request.method, started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(output) => DispatchResult {
                response: if is_notification {
                    None
                } else {
                    Some(JsonRpcResponse::success(request.id, output.result))
                },
                post_action: output.post_action,
            },
            Err(error) => {
                tracing::debug!(method = %request.method, "handler error: {error}");
                if is_notification {
                    DispatchResult {
                        response: None,
                        post_action: None,
                    }
                } else {
                    self.error_result(request.id, error)
                }
            }
        }
    }

    fn error_result(&self, id: Option<Value>, error: GatewayError) -> DispatchResult {
        DispatchResult {
            response: Some(JsonRpcResponse::error(
                id,
                error.jsonrpc_code(),
                error.to_string(),
            )),
            post_action: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn sync_post_action_runs_inline() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        PostAction::sync(move || flag.store(true, Ordering::SeqCst)).execute();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn deferred_post_action_runs_after_the_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        PostAction::deferred(Duration::from_millis(20), move || {
            flag.store(true, Ordering::SeqCst)
        })
        .execute();

        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(fired.load(Ordering::SeqCst));
    }
}
