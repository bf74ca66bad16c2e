//! Session checkpoint store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::gate::sse::GateStore;
use crate::state::Stage;
use crate::types::{Error, Result, SessionId};

/// The durable subset of the session row checkpointed after every
/// message-processing turn.
#[derive(Debug, Clone, Default)]
pub struct SessionCheckpoint {
    pub messages: Vec<Value>,
    pub current_phase: String,
    pub pipeline_stage: Option<Stage>,
    pub pipeline_status: String,
    pub pending_tool_call_id: Option<String>,
    pub pending_phase_transition: Option<String>,
    pub last_panel_type: Option<String>,
    pub last_panel_data: Option<Value>,
    pub pending_gate_data: Value,
    pub master_resume_id: Option<String>,
}

/// Persists session-row checkpoints. Implemented against whatever relational
/// store a deployment wires in; the in-memory implementation here stands in
/// for that store — the concrete DB/driver is out of scope here.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn checkpoint(&self, session_id: &SessionId, checkpoint: SessionCheckpoint) -> Result<()>;

    async fn load_checkpoint(&self, session_id: &SessionId) -> Result<Option<SessionCheckpoint>>;

    /// Link a newly-created master resume id back to the session row.
    async fn link_master_resume(&self, session_id: &SessionId, master_resume_id: &str) -> Result<()>;
}

/// In-memory `SessionStore`. Also implements `gate::sse::GateStore` so the
/// same store backs both the checkpoint and the gate-wait protocol, without
/// `gate` depending on `persistence` (the dependency runs the other way:
/// `persistence` depends on `gate::sse::GateStore`).
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    rows: RwLock<HashMap<SessionId, SessionCheckpoint>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn checkpoint(&self, session_id: &SessionId, checkpoint: SessionCheckpoint) -> Result<()> {
        self.rows.write().await.insert(session_id.clone(), checkpoint);
        Ok(())
    }

    async fn load_checkpoint(&self, session_id: &SessionId) -> Result<Option<SessionCheckpoint>> {
        Ok(self.rows.read().await.get(session_id).cloned())
    }

    async fn link_master_resume(&self, session_id: &SessionId, master_resume_id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows.entry(session_id.clone()).or_default();
        row.master_resume_id = Some(master_resume_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl GateStore for InMemorySessionStore {
    async fn read_gate_payload(&self, session: &SessionId) -> Result<Value> {
        Ok(self
            .rows
            .read()
            .await
            .get(session)
            .map(|row| row.pending_gate_data.clone())
            .unwrap_or(Value::Null))
    }

    async fn write_gate_payload(&self, session: &SessionId, payload: Value) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows.entry(session.clone()).or_default();
        row.pending_gate_data = payload;
        Ok(())
    }
}

impl Error {
    /// Used by `persistence` to distinguish "no such row" from a genuine
    /// store failure: a load error other than row-not-found skips the
    /// save entirely rather than treating it as a blank slate.
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let store = InMemorySessionStore::new();
        let session = SessionId::new();
        let checkpoint = SessionCheckpoint {
            current_phase: "section_writing".to_string(),
            pipeline_stage: Some(Stage::SectionWriting),
            ..Default::default()
        };
        store.checkpoint(&session, checkpoint.clone()).await.unwrap();

        let loaded = store.load_checkpoint(&session).await.unwrap().unwrap();
        assert_eq!(loaded.current_phase, "section_writing");
        assert_eq!(loaded.pipeline_stage, Some(Stage::SectionWriting));
    }

    #[tokio::test]
    async fn missing_session_returns_none() {
        let store = InMemorySessionStore::new();
        let loaded = store.load_checkpoint(&SessionId::new()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn gate_payload_isolated_from_checkpoint_fields() {
        let store = InMemorySessionStore::new();
        let session = SessionId::new();
        store
            .write_gate_payload(&session, serde_json::json!({"current_gate": {"gate": "architect_review"}}))
            .await
            .unwrap();
        let payload = store.read_gate_payload(&session).await.unwrap();
        assert_eq!(payload["current_gate"]["gate"], "architect_review");

        let loaded = store.load_checkpoint(&session).await.unwrap().unwrap();
        assert_eq!(loaded.pending_gate_data["current_gate"]["gate"], "architect_review");
    }

    #[tokio::test]
    async fn link_master_resume_sets_id() {
        let store = InMemorySessionStore::new();
        let session = SessionId::new();
        store.link_master_resume(&session, "mr-123").await.unwrap();
        let loaded = store.load_checkpoint(&session).await.unwrap().unwrap();
        assert_eq!(loaded.master_resume_id.as_deref(), Some("mr-123"));
    }
}
