//! The Coordinator: the single owner of
//! `PipelineState` for the lifetime of a run, sequencing the Strategist,
//! Craftsman, and Producer agents and the persistence/SSE side effects
//! around them.

mod cost;
mod deps;
mod projection;
mod run;
mod sections;

pub use cost::{PricingConfig, TierRate};
pub use deps::{AgentTriad, PipelineDeps, ToolFactory};
pub use projection::{build_strategist_message, project_master_resume};
pub use run::{run, RunConfig};
pub use sections::{expand_section_order, sanitize_education_years, AtsValidator, ExportValidation, PassthroughAtsValidator};
