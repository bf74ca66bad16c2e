//! `PipelineState` — the coordinator's owned per-session value.
//!
//! Mutation goes through a narrow set of methods so the following
//! invariants hold by construction rather than by caller discipline:
//!
//! (i)   a section enters `approved_sections` only after it exists in `sections`
//! (ii)  `revision_counts[s] ≤ MAX_REVISION_ROUNDS`
//! (iii) `current_stage` is monotonic except `quality_review ⇄ revision`
//! (iv)  `token_usage` is monotonically non-decreasing
//! (v)   an approved section is never mutated by the revision handler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Error, Result, SessionId, UserId};

/// Canonical pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Positioning,
    Research,
    GapAnalysis,
    Architect,
    ArchitectReview,
    SectionWriting,
    SectionReview,
    QualityReview,
    Revision,
    Complete,
}

impl Stage {
    /// Canonical order, used for the monotonicity check. `Revision` is
    /// intentionally excluded from the monotone sequence — it is a sibling
    /// state reachable only from `QualityReview` and returning only to it.
    const CANONICAL_ORDER: &'static [Stage] = &[
        Stage::Intake,
        Stage::Positioning,
        Stage::Research,
        Stage::GapAnalysis,
        Stage::Architect,
        Stage::ArchitectReview,
        Stage::SectionWriting,
        Stage::SectionReview,
        Stage::QualityReview,
        Stage::Complete,
    ];

    fn canonical_index(self) -> Option<usize> {
        Self::CANONICAL_ORDER.iter().position(|s| *s == self)
    }

    /// True if transitioning from `self` to `next` is permitted by
    /// invariant (iii) above.
    pub fn can_advance_to(self, next: Stage) -> bool {
        if self == Stage::QualityReview && next == Stage::Revision {
            return true;
        }
        if self == Stage::Revision && next == Stage::QualityReview {
            return true;
        }
        if self == Stage::Revision {
            // Only path out of Revision is back to QualityReview.
            return false;
        }
        match (self.canonical_index(), next.canonical_index()) {
            (Some(a), Some(b)) => b >= a,
            _ => false,
        }
    }
}

/// Section writing/review severity target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionArtifact {
    pub content: String,
    pub keywords_used: Vec<String>,
    pub requirements_addressed: Vec<String>,
    pub evidence_ids_used: Vec<String>,
}

/// Workflow mode selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    FastDraft,
    Balanced,
    DeepDive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    pub workflow_mode: WorkflowMode,
    pub resume_priority: Option<String>,
    pub seniority_delta: Option<i32>,
    pub minimum_evidence_target: Option<u32>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            workflow_mode: WorkflowMode::Balanced,
            resume_priority: None,
            seniority_delta: None,
            minimum_evidence_target: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityReviewDecision {
    Approve,
    Revise,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReview {
    pub decision: QualityReviewDecision,
    pub scores: HashMap<String, f64>,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterviewEntry {
    pub question_id: String,
    pub question_text: String,
    pub category: String,
    pub answer: String,
}

/// Placeholder structured-output type for the Strategist's gap-analysis
/// sub-stage; opaque beyond the fields the coordinator inspects.
pub type GapAnalysis = serde_json::Value;

/// Single per-session value owned exclusively by the coordinator for the
/// duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub session_id: SessionId,
    pub user_id: UserId,

    current_stage: Stage,

    pub intake: Option<serde_json::Value>,
    pub research: Option<serde_json::Value>,
    pub positioning: Option<serde_json::Value>,
    pub gap_analysis: Option<GapAnalysis>,
    pub architect: Option<serde_json::Value>,

    sections: HashMap<String, SectionArtifact>,
    approved_sections: Vec<String>,
    revision_counts: HashMap<String, u32>,

    pub quality_review: Option<QualityReview>,
    pub interview_transcript: Vec<InterviewEntry>,

    token_usage: TokenUsage,

    pub user_preferences: UserPreferences,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    max_revision_rounds: u32,
}

impl PipelineState {
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        user_preferences: UserPreferences,
        max_revision_rounds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            current_stage: Stage::Intake,
            intake: None,
            research: None,
            positioning: None,
            gap_analysis: None,
            architect: None,
            sections: HashMap::new(),
            approved_sections: Vec::new(),
            revision_counts: HashMap::new(),
            quality_review: None,
            interview_transcript: Vec::new(),
            token_usage: TokenUsage::default(),
            user_preferences,
            created_at: now,
            updated_at: now,
            max_revision_rounds,
        }
    }

    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    /// Advance `current_stage`, enforcing invariant (iii). Returns an error
    /// if the transition is not permitted.
    pub fn advance_stage(&mut self, next: Stage) -> Result<()> {
        if !self.current_stage.can_advance_to(next) {
            return Err(Error::state_transition(format!(
                "cannot advance from {:?} to {:?}",
                self.current_stage, next
            )));
        }
        self.current_stage = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn sections(&self) -> &HashMap<String, SectionArtifact> {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&SectionArtifact> {
        self.sections.get(name)
    }

    pub fn approved_sections(&self) -> &[String] {
        &self.approved_sections
    }

    pub fn is_approved(&self, section: &str) -> bool {
        self.approved_sections.iter().any(|s| s == section)
    }

    pub fn revision_count(&self, section: &str) -> u32 {
        *self.revision_counts.get(section).unwrap_or(&0)
    }

    pub fn max_revision_rounds(&self) -> u32 {
        self.max_revision_rounds
    }

    /// Write or overwrite a section's artifact. Fails closed if the section
    /// is approved (invariant (v)): callers that need to bypass this for a
    /// legitimate non-revision write path (e.g. the Craftsman's initial
    /// draft) must check `is_approved` themselves before this is ever
    /// reachable in practice, since nothing is approved before revision.
    pub fn write_section(&mut self, name: impl Into<String>, artifact: SectionArtifact) -> Result<()> {
        let name = name.into();
        if self.is_approved(&name) {
            return Err(Error::state_transition(format!(
                "section '{}' is approved and immutable",
                name
            )));
        }
        self.sections.insert(name, artifact);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark a section approved (invariant (i): only valid if it already
    /// exists in `sections`).
    pub fn approve_section(&mut self, name: &str) -> Result<()> {
        if !self.sections.contains_key(name) {
            return Err(Error::validation(format!(
                "cannot approve unknown section '{}'",
                name
            )));
        }
        if !self.is_approved(name) {
            self.approved_sections.push(name.to_string());
        }
        Ok(())
    }

    /// Increment a section's revision count, enforcing invariant (ii).
    /// Returns `Ok(false)` without mutating if the cap has already been
    /// reached (the caller — the revision handler — treats this as "drop
    /// the instruction", not an error).
    pub fn try_increment_revision_count(&mut self, section: &str) -> bool {
        let count = self.revision_counts.entry(section.to_string()).or_insert(0);
        if *count >= self.max_revision_rounds {
            return false;
        }
        *count += 1;
        true
    }

    /// Accumulate token usage, enforcing invariant (iv) by construction
    /// (only ever adds).
    pub fn add_token_usage(&mut self, input_tokens: u64, output_tokens: u64) {
        self.token_usage.input_tokens += input_tokens;
        self.token_usage.output_tokens += output_tokens;
    }

    pub fn set_estimated_cost(&mut self, cost_usd: f64) {
        self.token_usage.estimated_cost_usd = cost_usd;
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.token_usage
    }
}

/// Harvest every scratchpad key prefixed `section_` whose value carries a
/// `content` field into `state.sections`. Shared between the coordinator's
/// Phase 2 harvest and the revision handler's sub-loop harvest so the two
/// don't drift. Skips any section that is already approved (invariant (v)).
pub fn merge_scratchpad_sections(state: &mut PipelineState, scratchpad: &serde_json::Map<String, serde_json::Value>) {
    for (key, value) in scratchpad {
        let Some(section_name) = key.strip_prefix("section_") else {
            continue;
        };
        if state.is_approved(section_name) {
            continue;
        }
        let Some(content) = value.get("content").and_then(|c| c.as_str()) else {
            continue;
        };
        let artifact = SectionArtifact {
            content: content.to_string(),
            keywords_used: string_list_field(value, "keywords_used"),
            requirements_addressed: string_list_field(value, "requirements_addressed"),
            evidence_ids_used: string_list_field(value, "evidence_ids_used"),
        };
        let _ = state.write_section(section_name, artifact);
    }
}

fn string_list_field(value: &serde_json::Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
