//! # Resume Pipeline Core
//!
//! Orchestration runtime for a three-agent (Strategist → Craftsman →
//! Producer) resume generation pipeline:
//! - Coordinator sequencing and pipeline state ownership
//! - An agent loop driving round-based LLM/tool interaction
//! - An in-process agent bus for targeted revision routing
//! - SSE session transport with a gate suspend/resume protocol
//! - Durable, idempotent checkpointing and usage accounting
//!
//! ## Architecture
//!
//! ```text
//!                  ┌───────────────────────────────────┐
//!  SSE clients  →  │            Coordinator             │
//!                  │  ┌──────────┐   ┌───────────────┐  │
//!                  │  │AgentLoop │   │ Agent Bus      │  │
//!                  │  │(Strat/   │←→│ (revision       │  │
//!                  │  │ Craft/   │   │  routing)       │  │
//!                  │  │ Prod)    │   └───────────────┘  │
//!                  │  └──────────┘                      │
//!                  │  ┌──────────┐   ┌───────────────┐  │
//!                  │  │Gate/SSE  │   │Usage/Guards/   │  │
//!                  │  │Transport │   │Persistence      │  │
//!                  │  └──────────┘   └───────────────┘  │
//!                  └───────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod agent;
pub mod bus;
pub mod cleanup;
pub mod coordinator;
pub mod evidence;
pub mod gate;
pub mod guards;
pub mod persistence;
pub mod recovery;
pub mod state;
pub mod types;
pub mod usage;

pub mod observability;
pub mod validation;

pub use types::{Config, Error, Result};
