//! Collaborators the coordinator needs for one run: the run's business-data
//! `config` plus every other component this crate builds.
//!
//! `Tool::execute` takes no context parameter — concrete tool
//! implementations are out of scope for this crate; the pipeline state a run's tools
//! mutate has to be closed over at construction time instead of looked up
//! from a static map. `ToolFactory` is the seam a deployment plugs its
//! concrete tools in through, handed the run's own state and cancellation
//! token so every tool call in that run shares them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentConfig, AgentLoop, Tool, ToolCatalog};
use crate::bus::AgentBus;
use crate::coordinator::cost::PricingConfig;
use crate::coordinator::sections::AtsValidator;
use crate::gate::{GateStore, GateWaiter, RunningSet, SseHub};
use crate::persistence::{MasterResumeStore, PositioningProfileStore, SessionStore};
use crate::state::PipelineState;
use crate::types::{FeatureFlags, PipelineLimits};
use crate::usage::UsageTracker;

/// Builds the run-scoped tool map, closing over the shared pipeline state
/// and cancellation token every tool call in this run should observe.
pub trait ToolFactory: Send + Sync {
    fn build(&self, state: Arc<Mutex<PipelineState>>, cancel: CancellationToken) -> HashMap<String, Arc<dyn Tool>>;
}

/// The three fixed pipeline participants.
#[derive(Debug, Clone)]
pub struct AgentTriad {
    pub strategist: AgentConfig,
    pub craftsman: AgentConfig,
    pub producer: AgentConfig,
}

/// Every collaborator `coordinator::run` needs, independent of any one
/// run's business data (that lives in `RunConfig`).
pub struct PipelineDeps {
    pub agent_loop: Arc<AgentLoop>,
    pub catalog: Arc<ToolCatalog>,
    pub agents: AgentTriad,
    pub tool_factory: Arc<dyn ToolFactory>,
    pub bus: Arc<AgentBus>,
    pub usage: Arc<UsageTracker>,
    pub sse: Arc<SseHub>,
    pub running: Arc<RunningSet>,
    pub gate_waiter: Arc<GateWaiter>,
    pub gate_store: Arc<dyn GateStore>,
    pub session_store: Arc<dyn SessionStore>,
    pub master_store: Arc<dyn MasterResumeStore>,
    pub positioning_store: Arc<dyn PositioningProfileStore>,
    pub ats_validator: Arc<dyn AtsValidator>,
    pub pricing: PricingConfig,
    pub limits: PipelineLimits,
    pub features: FeatureFlags,
}

impl std::fmt::Debug for PipelineDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDeps").finish_non_exhaustive()
    }
}
