//! Pipeline state: the single per-session value owned by the coordinator.

mod pipeline_state;

pub use pipeline_state::{
    merge_scratchpad_sections, GapAnalysis, InterviewEntry, PipelineState, QualityReview,
    QualityReviewDecision, SectionArtifact, Stage, TokenUsage, UserPreferences, WorkflowMode,
};
