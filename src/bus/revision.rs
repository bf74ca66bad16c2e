//! The Producer → Craftsman revision handler.
//!
//! The coordinator subscribes this handler to the bus for `craftsman`
//! during Phase 3. It normalizes a revision request, enforces the
//! per-section cap and approved-section immutability, then drives a
//! focused Craftsman sub-loop sharing the same pipeline state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentConfig, AgentLoop, LoopContext, Tool, ToolCatalog};
use crate::bus::AgentMessage;
use crate::state::{merge_scratchpad_sections, PipelineState};

/// Urgency the Producer assigned a revision instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Whether the Craftsman should rewrite a section from scratch or apply a
/// targeted change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Revision,
    Rewrite,
}

/// A single normalized revision instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionInstruction {
    pub target_section: String,
    pub issue: String,
    pub instruction: String,
    pub priority: Priority,
    pub severity: Severity,
}

/// Parse a Producer revision request payload into instructions. Supports
/// both the batched form (`{"revision_instructions": [...]}`) and the flat
/// single-section form (`{"section", "issue", "instruction", "severity"?}`,
/// implicitly `priority: high`).
pub fn normalize_payload(payload: &serde_json::Value) -> Vec<RevisionInstruction> {
    if let Some(batch) = payload.get("revision_instructions").and_then(|v| v.as_array()) {
        return batch.iter().filter_map(parse_batched_entry).collect();
    }
    parse_flat_entry(payload).into_iter().collect()
}

fn parse_batched_entry(entry: &serde_json::Value) -> Option<RevisionInstruction> {
    let target_section = entry.get("target_section").and_then(|v| v.as_str())?.to_string();
    let issue = entry.get("issue").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let instruction = entry
        .get("instruction")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let priority = parse_priority(entry.get("priority").and_then(|v| v.as_str()));
    let severity = parse_severity(entry.get("severity").and_then(|v| v.as_str()));
    Some(RevisionInstruction {
        target_section,
        issue,
        instruction,
        priority,
        severity,
    })
}

fn parse_flat_entry(entry: &serde_json::Value) -> Option<RevisionInstruction> {
    let target_section = entry.get("section").and_then(|v| v.as_str())?.to_string();
    let issue = entry.get("issue").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let instruction = entry
        .get("instruction")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let severity = parse_severity(entry.get("severity").and_then(|v| v.as_str()));
    Some(RevisionInstruction {
        target_section,
        issue,
        instruction,
        // Flat single-section requests are implicitly high priority.
        priority: Priority::High,
        severity,
    })
}

fn parse_priority(s: Option<&str>) -> Priority {
    match s {
        Some("medium") => Priority::Medium,
        Some("low") => Priority::Low,
        _ => Priority::High,
    }
}

fn parse_severity(s: Option<&str>) -> Severity {
    match s {
        Some("rewrite") => Severity::Rewrite,
        _ => Severity::Revision,
    }
}

/// Outcome of a `RevisionHandler::filter` call — what survived the cap and
/// approved-section filters. Kept plain data so callers can emit
/// cap-reached/revision-start events from it before driving the sub-loop,
/// without the handler owning an emitter.
#[derive(Debug)]
pub struct RevisionFilterOutcome {
    pub surviving: Vec<RevisionInstruction>,
    pub dropped_cap_reached: Vec<String>,
    pub dropped_approved: Vec<String>,
}

/// Drives the Craftsman sub-loop in response to a Producer revision
/// request.
pub struct RevisionHandler {
    agent_loop: Arc<AgentLoop>,
    craftsman_config: AgentConfig,
    catalog: Arc<ToolCatalog>,
    tools: Arc<HashMap<String, Arc<dyn Tool>>>,
}

impl std::fmt::Debug for RevisionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionHandler").finish_non_exhaustive()
    }
}

impl RevisionHandler {
    pub fn new(
        agent_loop: Arc<AgentLoop>,
        craftsman_config: AgentConfig,
        catalog: Arc<ToolCatalog>,
        tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    ) -> Self {
        Self {
            agent_loop,
            craftsman_config,
            catalog,
            tools,
        }
    }

    /// Parse the revision request and apply the approved-section and
    /// per-section revision-cap filters. Does not touch the bus or run the
    /// sub-loop — callers emit their drop/survive events off this result
    /// before calling `run_sub_loop`, so a cap-reached notice always
    /// reaches the client before the Craftsman sub-loop that supersedes it
    /// starts.
    pub async fn filter(&self, state: &Mutex<PipelineState>, msg: &AgentMessage) -> RevisionFilterOutcome {
        let instructions = normalize_payload(&msg.payload);

        let mut surviving = Vec::new();
        let mut dropped_cap_reached = Vec::new();
        let mut dropped_approved = Vec::new();

        {
            let mut st = state.lock().await;
            for instr in instructions {
                if st.is_approved(&instr.target_section) {
                    dropped_approved.push(instr.target_section.clone());
                    continue;
                }
                if !st.try_increment_revision_count(&instr.target_section) {
                    dropped_cap_reached.push(instr.target_section.clone());
                    continue;
                }
                surviving.push(instr);
            }
        }

        RevisionFilterOutcome {
            surviving,
            dropped_cap_reached,
            dropped_approved,
        }
    }

    /// Drive the Craftsman sub-loop over the surviving instructions from a
    /// prior `filter` call. Non-fatal by design: a sub-loop error is
    /// captured in the return value, never propagated to the caller.
    pub async fn run_sub_loop(
        &self,
        state: &Mutex<PipelineState>,
        surviving: &[RevisionInstruction],
        cancel: CancellationToken,
    ) -> (bool, Option<String>) {
        if surviving.is_empty() {
            return (false, None);
        }

        let message = build_craftsman_message(surviving);
        let ctx = LoopContext::new(cancel);

        let run_result = self
            .agent_loop
            .run(&self.craftsman_config, &self.catalog, &self.tools, message, ctx)
            .await;

        match run_result {
            Ok(outcome) => {
                let mut st = state.lock().await;
                st.add_token_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
                merge_scratchpad_sections(&mut st, &outcome.scratchpad);
                (true, None)
            }
            Err(e) => {
                tracing::warn!("revision sub-loop failed (non-fatal): {}", e);
                (true, Some(e.to_string()))
            }
        }
    }
}

/// Build the focused message driving the Craftsman sub-loop: rewrites
/// instruct `write_section` from scratch, revisions
/// instruct a targeted change preserving surrounding content.
fn build_craftsman_message(instructions: &[RevisionInstruction]) -> String {
    let (rewrites, revisions): (Vec<_>, Vec<_>) =
        instructions.iter().partition(|i| i.severity == Severity::Rewrite);

    let mut parts = Vec::new();
    if !rewrites.is_empty() {
        parts.push("Rewrite the following sections from scratch using write_section:".to_string());
        for i in &rewrites {
            parts.push(format!("- {}: {} ({})", i.target_section, i.issue, i.instruction));
        }
    }
    if !revisions.is_empty() {
        parts.push(
            "Apply targeted changes to the following sections, preserving surrounding content:"
                .to_string(),
        );
        for i in &revisions {
            parts.push(format!("- {}: {} ({})", i.target_section, i.issue, i.instruction));
        }
    }
    parts.join("\n")
}

/// One `transparency`-event line per dropped section.
pub fn cap_reached_message(section: &str) -> String {
    format!("Revision cap reached for {} — accepting current content.", section)
}

/// Summary line for the batch-level `transparency` event.
pub fn batch_summary_message(instructions: &[RevisionInstruction]) -> String {
    format!(
        "Producer requested revisions to {} section(s): {}",
        instructions.len(),
        instructions
            .iter()
            .map(|i| i.target_section.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_batched_form() {
        let payload = serde_json::json!({
            "revision_instructions": [
                {"target_section": "summary", "issue": "weak", "instruction": "punch it up", "priority": "medium", "severity": "rewrite"},
                {"target_section": "experience_role_0", "issue": "vague", "instruction": "add metrics"},
            ]
        });
        let instrs = normalize_payload(&payload);
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].target_section, "summary");
        assert_eq!(instrs[0].priority, Priority::Medium);
        assert_eq!(instrs[0].severity, Severity::Rewrite);
        assert_eq!(instrs[1].priority, Priority::High);
        assert_eq!(instrs[1].severity, Severity::Revision);
    }

    #[test]
    fn normalizes_flat_form_as_implicit_high_priority() {
        let payload = serde_json::json!({
            "section": "skills",
            "issue": "missing keywords",
            "instruction": "add Kubernetes",
        });
        let instrs = normalize_payload(&payload);
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].priority, Priority::High);
        assert_eq!(instrs[0].severity, Severity::Revision);
    }

    #[test]
    fn cap_message_contains_phrase_and_section() {
        let msg = cap_reached_message("summary");
        assert!(msg.contains("Revision cap"));
        assert!(msg.contains("summary"));
    }

    use crate::agent::{Completion, LlmClient, Message, ModelTier, ToolDefinition};
    use crate::state::{SectionArtifact, UserPreferences};
    use crate::types::{Result as CoreResult, SessionId, UserId};
    use async_trait::async_trait;

    struct NoOpLlm;

    #[async_trait]
    impl LlmClient for NoOpLlm {
        fn model_name(&self, _tier: ModelTier) -> &str {
            "noop"
        }
        async fn complete(&self, _tier: ModelTier, _messages: &[Message], _tools: &[ToolDefinition]) -> CoreResult<Completion> {
            Ok(Completion {
                content: "ok".to_string(),
                tool_calls: vec![],
                usage: Default::default(),
            })
        }
    }

    fn handler() -> RevisionHandler {
        RevisionHandler::new(
            Arc::new(AgentLoop::new(Arc::new(NoOpLlm))),
            crate::agent::AgentConfig {
                name: "craftsman".to_string(),
                domain: "craftsman".to_string(),
                model_tier: ModelTier::Mid,
                system_prompt: "test".to_string(),
                allowed_tools: vec![],
                max_rounds: 5,
                round_timeout_ms: 30_000,
                overall_timeout_ms: 60_000,
                parallel_safe_tools: Default::default(),
                loop_max_tokens: None,
            },
            Arc::new(ToolCatalog::new()),
            Arc::new(HashMap::new()),
        )
    }

    fn state_with_section(name: &str, max_revision_rounds: u32) -> Mutex<PipelineState> {
        let mut st = PipelineState::new(SessionId::new(), UserId::must("u1"), UserPreferences::default(), max_revision_rounds);
        st.write_section(
            name,
            SectionArtifact {
                content: "draft".to_string(),
                keywords_used: vec![],
                requirements_addressed: vec![],
                evidence_ids_used: vec![],
            },
        )
        .unwrap();
        Mutex::new(st)
    }

    fn revision_msg(section: &str) -> AgentMessage {
        AgentMessage::request(
            "producer",
            "craftsman",
            "craftsman",
            serde_json::json!({ "section": section, "issue": "vague", "instruction": "tighten it up" }),
        )
    }

    #[tokio::test]
    async fn filter_drops_approved_sections() {
        let state = state_with_section("summary", 3);
        {
            let mut st = state.lock().await;
            st.approve_section("summary").unwrap();
        }
        let outcome = handler().filter(&state, &revision_msg("summary")).await;
        assert!(outcome.surviving.is_empty());
        assert_eq!(outcome.dropped_approved, vec!["summary".to_string()]);
        assert!(outcome.dropped_cap_reached.is_empty());
    }

    #[tokio::test]
    async fn filter_drops_sections_past_the_revision_cap() {
        let state = state_with_section("summary", 1);
        // First instruction consumes the one allowed round.
        let first = handler().filter(&state, &revision_msg("summary")).await;
        assert_eq!(first.surviving.len(), 1);

        // A second instruction for the same section is now over cap.
        let second = handler().filter(&state, &revision_msg("summary")).await;
        assert!(second.surviving.is_empty());
        assert_eq!(second.dropped_cap_reached, vec!["summary".to_string()]);
    }

    #[tokio::test]
    async fn run_sub_loop_is_a_noop_on_empty_surviving_list() {
        let state = state_with_section("summary", 3);
        let (ran, error) = handler().run_sub_loop(&state, &[], CancellationToken::new()).await;
        assert!(!ran);
        assert!(error.is_none());
    }
}
