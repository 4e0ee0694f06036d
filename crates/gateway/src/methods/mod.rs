//! Control-plane method registry and dispatch.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use tracing::{debug, warn};

use clawdis_protocol::{ErrorShape, ResponseFrame, error_codes};

use crate::state::GatewayState;

mod chat;
mod core;
mod cron;
mod nodes;

/// Context passed to every method handler.
pub struct MethodContext {
    pub request_id: String,
    pub method: String,
    pub params: serde_json::Value,
    pub conn_id: String,
    pub state: Arc<GatewayState>,
}

impl MethodContext {
    /// Deserialize params, mapping failures to `INVALID_REQUEST`.
    pub fn parse_params<T: serde::de::DeserializeOwned>(&self) -> Result<T, ErrorShape> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| ErrorShape::new(error_codes::INVALID_REQUEST, format!("bad params: {e}")))
    }
}

pub type MethodResult = Result<serde_json::Value, ErrorShape>;

pub type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        core::register(&mut registry);
        chat::register(&mut registry);
        nodes::register(&mut registry);
        cron::register(&mut registry);
        registry
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    pub async fn dispatch(&self, ctx: MethodContext) -> ResponseFrame {
        let method = ctx.method.clone();
        let request_id = ctx.request_id.clone();

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method, "unknown method");
            return ResponseFrame::err(
                &request_id,
                ErrorShape::new(
                    error_codes::UNKNOWN_METHOD,
                    format!("unknown method: {method}"),
                ),
            );
        };

        debug!(method, request_id = %request_id, "dispatching method");
        match handler(ctx).await {
            Ok(result) => ResponseFrame::ok(&request_id, result),
            Err(err) => {
                warn!(method, code = %err.code, msg = %err.message, "method error");
                ResponseFrame::err(&request_id, err)
            },
        }
    }

    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Boxing helper for async handler functions.
macro_rules! handler {
    ($f:path) => {
        Box::new(move |ctx| Box::pin($f(ctx)))
    };
}
pub(crate) use handler;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_the_core_surface() {
        let registry = MethodRegistry::new();
        let names = registry.method_names();
        for expected in [
            "health",
            "status",
            "send",
            "agent",
            "chat.send",
            "chat.history",
            "config.get",
            "config.set",
            "nodes.list",
            "nodes.pending",
            "nodes.approve",
            "nodes.reject",
            "nodes.invoke",
            "cron.list",
            "cron.add",
            "cron.remove",
            "cron.runNow",
            "system-event",
            "models.list",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
