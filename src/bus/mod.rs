//! In-process agent bus.
//!
//! A synchronous publish/subscribe primitive keyed by recipient agent name.
//! `send` delivers to every handler currently subscribed for `msg.to` and
//! only returns once all of them have run, which is what gives two sends
//! to the same `(from, to)` pair their relative order: the caller awaits
//! the first `send` before issuing the second.

pub mod revision;

pub use revision::{
    batch_summary_message, cap_reached_message, normalize_payload, Priority, RevisionFilterOutcome, RevisionHandler,
    RevisionInstruction, Severity,
};

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::AgentName;

/// Kind of bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Event,
}

/// A message routed between two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from: AgentName,
    pub to: AgentName,
    pub kind: MessageKind,
    pub domain: String,
    pub payload: serde_json::Value,
}

impl AgentMessage {
    pub fn request(
        from: impl Into<AgentName>,
        to: impl Into<AgentName>,
        domain: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: MessageKind::Request,
            domain: domain.into(),
            payload,
        }
    }

    pub fn response(
        from: impl Into<AgentName>,
        to: impl Into<AgentName>,
        domain: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: MessageKind::Response,
            domain: domain.into(),
            payload,
        }
    }

    pub fn event(
        from: impl Into<AgentName>,
        to: impl Into<AgentName>,
        domain: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: MessageKind::Event,
            domain: domain.into(),
            payload,
        }
    }
}

/// An async handler subscribed to one recipient name.
pub type Handler = Arc<dyn Fn(AgentMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// In-process pub/sub bus. One handler list per recipient name; `send`
/// awaits every handler in registration order before returning, which is
/// the mechanism that preserves per-`(from, to)` delivery order.
#[derive(Default)]
pub struct AgentBus {
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
}

impl std::fmt::Debug for AgentBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBus").finish_non_exhaustive()
    }
}

impl AgentBus {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for `name`. Multiple subscribers for the same
    /// name are permitted; all run, in registration order, on every send.
    pub async fn subscribe(&self, name: &str, handler: Handler) {
        self.handlers
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .push(handler);
    }

    /// Remove every handler registered for `name`.
    pub async fn unsubscribe(&self, name: &str) {
        self.handlers.lock().await.remove(name);
    }

    /// Deliver `msg` to every handler subscribed for `msg.to`, sequentially,
    /// awaiting each before returning. A panic or error inside a handler is
    /// the handler's own responsibility to trap — the bus does not catch
    /// anything (handlers here are revision-style callbacks that already
    /// log and continue on failure).
    pub async fn send(&self, msg: AgentMessage) {
        let handlers = {
            let guard = self.handlers.lock().await;
            guard.get(msg.to.as_str()).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(msg.clone()).await;
        }
    }
}
