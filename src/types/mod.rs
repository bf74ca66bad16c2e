//! Core shared types: strongly-typed IDs, the error taxonomy, and config.

mod config;
mod errors;
mod ids;

pub use config::{
    Config, FeatureFlags, GateQueueConfig, GuardsConfig, ObservabilityConfig, PipelineLimits,
    ProcessingConfig,
};
pub use errors::{Error, Result, StatusCode};
pub use ids::{AgentName, GateId, RequestId, SessionId, UserId};
