//! SSE event taxonomy.
//!
//! Every variant carries the session id and, where applicable, the stage.
//! Serialized with `#[serde(tag = "event", content = "data")]`
//! so a transport layer can split `event:`/`data:` straight off the tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::Stage;
use crate::types::SessionId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SseEvent {
    Connected {
        session_id: SessionId,
    },
    SessionRestore {
        session_id: SessionId,
        messages: Vec<Value>,
        current_phase: String,
        pending_tool_call_id: Option<String>,
        pending_phase_transition: Option<String>,
        last_panel_type: Option<String>,
        last_panel_data: Option<Value>,
        pipeline_status: Option<String>,
    },
    StageStart {
        session_id: SessionId,
        stage: Stage,
        message: String,
    },
    StageComplete {
        session_id: SessionId,
        stage: Stage,
        message: String,
        duration_ms: u64,
    },
    Transparency {
        session_id: SessionId,
        stage: Stage,
        message: String,
    },
    QualityScores {
        session_id: SessionId,
        scores: Value,
        details: Option<Value>,
    },
    RevisionStart {
        session_id: SessionId,
        instructions: Value,
    },
    BlueprintReady {
        session_id: SessionId,
        data: Value,
    },
    Questionnaire {
        session_id: SessionId,
        data: Value,
    },
    WorkflowReplanRequested {
        session_id: SessionId,
        reason: String,
        benchmark_edit_version: u32,
        rebuild_from_stage: Stage,
        requires_restart: bool,
        current_stage: Stage,
    },
    WorkflowReplanStarted {
        session_id: SessionId,
        reason: String,
        benchmark_edit_version: u32,
        rebuild_from_stage: Stage,
        requires_restart: bool,
        current_stage: Stage,
    },
    WorkflowReplanCompleted {
        session_id: SessionId,
        reason: String,
        benchmark_edit_version: u32,
        rebuild_from_stage: Stage,
        requires_restart: bool,
        current_stage: Stage,
    },
    PipelineComplete {
        session_id: SessionId,
        contact_info: Option<Value>,
        company_name: String,
        resume: Value,
        export_validation: Value,
    },
    PipelineError {
        session_id: SessionId,
        stage: String,
        error: String,
    },
    Heartbeat {
        session_id: SessionId,
    },
}

impl SseEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SseEvent::Connected { session_id }
            | SseEvent::SessionRestore { session_id, .. }
            | SseEvent::StageStart { session_id, .. }
            | SseEvent::StageComplete { session_id, .. }
            | SseEvent::Transparency { session_id, .. }
            | SseEvent::QualityScores { session_id, .. }
            | SseEvent::RevisionStart { session_id, .. }
            | SseEvent::BlueprintReady { session_id, .. }
            | SseEvent::Questionnaire { session_id, .. }
            | SseEvent::WorkflowReplanRequested { session_id, .. }
            | SseEvent::WorkflowReplanStarted { session_id, .. }
            | SseEvent::WorkflowReplanCompleted { session_id, .. }
            | SseEvent::PipelineComplete { session_id, .. }
            | SseEvent::PipelineError { session_id, .. }
            | SseEvent::Heartbeat { session_id } => session_id,
        }
    }

    /// The `event:` frame name the wire format uses: the tag's
    /// snake_case rendering, read back out of the tagged serialization so
    /// the two never drift apart.
    pub fn event_name(&self) -> &'static str {
        match self {
            SseEvent::Connected { .. } => "connected",
            SseEvent::SessionRestore { .. } => "session_restore",
            SseEvent::StageStart { .. } => "stage_start",
            SseEvent::StageComplete { .. } => "stage_complete",
            SseEvent::Transparency { .. } => "transparency",
            SseEvent::QualityScores { .. } => "quality_scores",
            SseEvent::RevisionStart { .. } => "revision_start",
            SseEvent::BlueprintReady { .. } => "blueprint_ready",
            SseEvent::Questionnaire { .. } => "questionnaire",
            SseEvent::WorkflowReplanRequested { .. } => "workflow_replan_requested",
            SseEvent::WorkflowReplanStarted { .. } => "workflow_replan_started",
            SseEvent::WorkflowReplanCompleted { .. } => "workflow_replan_completed",
            SseEvent::PipelineComplete { .. } => "pipeline_complete",
            SseEvent::PipelineError { .. } => "pipeline_error",
            SseEvent::Heartbeat { .. } => "heartbeat",
        }
    }

    /// The `data:` JSON payload, with the `event`/`data` tagging stripped
    /// back off (the tag itself becomes the frame's `event:` line).
    pub fn data_json(&self) -> Value {
        let full = serde_json::to_value(self).unwrap_or(Value::Null);
        full.get("data").cloned().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_matches_tag() {
        let ev = SseEvent::Heartbeat {
            session_id: SessionId::new(),
        };
        assert_eq!(ev.event_name(), "heartbeat");
    }

    #[test]
    fn stage_events_carry_session_and_stage() {
        let sid = SessionId::new();
        let ev = SseEvent::StageStart {
            session_id: sid.clone(),
            stage: Stage::Intake,
            message: "starting".to_string(),
        };
        assert_eq!(ev.session_id(), &sid);
        let data = ev.data_json();
        assert_eq!(data["message"], "starting");
    }
}
