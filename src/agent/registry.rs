//! Agent registry — the three fixed participants of the pipeline
//! (Strategist, Craftsman, Producer) plus whatever auxiliary agents a
//! deployment wires in.
//!
//! Modeled on a service-registry shape, stripped of the load/health-tracking
//! machinery a single in-process agent loop has no use for — an
//! `AgentConfig` is static for the lifetime of a process.

use std::collections::{HashMap, HashSet};

use crate::agent::llm::ModelTier;
use crate::types::{Error, Result};

/// Static configuration for one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// The agent's domain, e.g. `"strategist"`, `"craftsman"`, `"producer"`
    /// — used to address bus messages.
    pub domain: String,
    pub model_tier: ModelTier,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub max_rounds: u32,
    pub round_timeout_ms: u64,
    pub overall_timeout_ms: u64,
    /// Tool names safe to execute concurrently within a round.
    /// Tools not in this set run sequentially, in order.
    pub parallel_safe_tools: HashSet<String>,
    /// Optional cap on cumulative tokens spent by this agent's loop; `None`
    /// means only `max_rounds`/timeouts bound the run.
    pub loop_max_tokens: Option<u64>,
}

/// In-memory registry of agent configurations, keyed by name.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentConfig>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent. Returns an error if the name is already taken —
    /// unlike tool registration, agent identity is fixed per process and a
    /// silent overwrite would hide a configuration bug.
    pub fn register(&mut self, config: AgentConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(Error::validation("agent name cannot be empty"));
        }
        if self.agents.contains_key(&config.name) {
            return Err(Error::validation(format!(
                "agent '{}' already registered",
                config.name
            )));
        }
        self.agents.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}
