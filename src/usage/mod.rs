//! Usage/token accounting.
//!
//! A process-wide `HashMap<String, ResourceUsage>` with `record_usage`/
//! `get_user_usage`/`clear_user_usage`-shaped methods, keyed by session id
//! instead of user id, with `stop` returning-and-removing the entry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::types::{SessionId, UserId};

/// Accumulated token usage for one session's pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    fn add(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }
}

#[derive(Debug)]
struct Entry {
    user_id: UserId,
    usage: Usage,
}

/// Process-wide accumulator, one entry per in-flight session: starting a
/// run installs the accumulator, every LLM wrapper adds to it, and
/// stopping the run returns the final usage and removes the entry.
#[derive(Debug, Default)]
pub struct UsageTracker {
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self, session_id: SessionId, user_id: UserId) {
        self.entries.lock().await.insert(
            session_id,
            Entry {
                user_id,
                usage: Usage::default(),
            },
        );
    }

    pub async fn record(&self, session_id: &SessionId, input_tokens: u64, output_tokens: u64) {
        if let Some(entry) = self.entries.lock().await.get_mut(session_id) {
            entry.usage.add(input_tokens, output_tokens);
        }
    }

    /// Returns and removes the final usage, or `Usage::default()` if the
    /// session was never started (tracker misuse should not be fatal to the
    /// coordinator's finalize step).
    pub async fn stop(&self, session_id: &SessionId) -> Usage {
        self.entries
            .lock()
            .await
            .remove(session_id)
            .map(|e| e.usage)
            .unwrap_or_default()
    }

    pub async fn current(&self, session_id: &SessionId) -> Option<Usage> {
        self.entries.lock().await.get(session_id).map(|e| e.usage)
    }

    pub async fn user_usage(&self, user_id: &UserId) -> Usage {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|e| &e.user_id == user_id)
            .fold(Usage::default(), |mut acc, e| {
                acc.add(e.usage.input_tokens, e.usage.output_tokens);
                acc
            })
    }

    pub async fn in_flight(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Produce a closure suitable as `agent::loop_runner::LoopContext`'s
    /// `usage_recorder` — keeps the agent loop decoupled from this module.
    pub fn recorder(self: &Arc<Self>, session_id: SessionId) -> impl Fn(u64, u64) + Send + Sync + 'static {
        let tracker = Arc::clone(self);
        move |input_tokens, output_tokens| {
            let tracker = Arc::clone(&tracker);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                tracker.record(&session_id, input_tokens, output_tokens).await;
            });
        }
    }
}
