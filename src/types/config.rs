//! Configuration structures.
//!
//! Struct-of-structs shape: each sub-struct carries its own hand-written
//! `Default`. There is no config-file loader here — `Config::from_env`
//! reads a fixed set of named environment variables, nothing more.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub pipeline: PipelineLimits,

    #[serde(default)]
    pub gate: GateQueueConfig,

    #[serde(default)]
    pub guards: GuardsConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub features: FeatureFlags,
}

impl Config {
    /// Build a configuration by overlaying recognized environment variables
    /// onto the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_usize("MAX_TOTAL_SSE_CONNECTIONS") {
            cfg.processing.max_total_sse_connections = v;
        }
        if let Some(v) = env_usize("MAX_PROCESSING_SESSIONS") {
            cfg.processing.max_processing_sessions = v;
        }
        if let Some(v) = env_usize("MAX_PROCESSING_SESSIONS_PER_USER") {
            cfg.processing.max_processing_sessions_per_user = v;
        }
        if let Some(v) = env_u64("PROCESSING_TTL_MS") {
            cfg.processing.processing_ttl = Duration::from_millis(v);
        }
        if let Some(v) = env_usize("MAX_SSE_RATE_USERS") {
            cfg.guards.sse_connect_attempt_registry_cap = v;
        }
        if let Some(v) = env_usize("MAX_MESSAGE_BODY_BYTES") {
            cfg.guards.max_message_body_bytes = v;
        }
        if let Some(v) = env_usize("MAX_CREATE_SESSION_BODY_BYTES") {
            cfg.guards.max_create_session_body_bytes = v;
        }

        cfg.features.blueprint_approval_enabled = env_flag("FEATURE_BLUEPRINT_APPROVAL");
        cfg.features.redis_bus_enabled = env_flag("FEATURE_REDIS_BUS");
        cfg.features.redis_rate_limit_enabled = env_flag("FEATURE_REDIS_RATE_LIMIT");
        cfg.features.self_review_model_routing_enabled =
            env_flag("FEATURE_SELF_REVIEW_MODEL_ROUTING");

        cfg
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE")
    )
}

/// Tracing/logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            otlp_endpoint: None,
        }
    }
}

/// Pipeline-level limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLimits {
    /// MAX_REVISION_ROUNDS — cap on `revision_counts[section]`.
    pub max_revision_rounds: u32,
    /// MAX_BULLETS_PER_ROLE — size bound when projecting a master resume
    /// into the Strategist's initial message.
    pub max_bullets_per_role: u32,
    /// MAX_EVIDENCE_ITEMS_INJECTED — across all sources.
    pub max_evidence_items_injected: u32,
    /// MAX_SSE_PER_USER — concurrent SSE connections per user.
    pub max_sse_per_user: u32,
    /// SSE heartbeat cadence.
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Number of trailing chat messages replayed in `session_restore`.
    pub session_restore_max_messages: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_revision_rounds: 3,
            max_bullets_per_role: 15,
            max_evidence_items_injected: 50,
            max_sse_per_user: 5,
            heartbeat_interval: Duration::from_secs(10),
            session_restore_max_messages: 20,
        }
    }
}

/// Pending-gate response queue caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateQueueConfig {
    pub max_buffered_responses: usize,
    pub max_buffered_responses_total_bytes: usize,
    pub max_buffered_response_item_bytes: usize,
}

impl Default for GateQueueConfig {
    fn default() -> Self {
        Self {
            max_buffered_responses: 50,
            max_buffered_responses_total_bytes: 5 * 1024 * 1024,
            max_buffered_response_item_bytes: 100 * 1024,
        }
    }
}

/// Rate/idempotency/body-size guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardsConfig {
    /// Messages per user per 60s.
    pub message_rate_per_minute: u32,
    /// SSE connect attempts per user per 60s.
    pub sse_connect_rate_per_minute: u32,
    /// Cap on the LRU-trimmed SSE connect-attempt registry (MAX_SSE_RATE_USERS).
    pub sse_connect_attempt_registry_cap: usize,
    /// Idempotency key map max entries.
    pub idempotency_max_entries: usize,
    /// Idempotency key retention.
    #[serde(with = "humantime_serde")]
    pub idempotency_ttl: Duration,
    /// Max idempotency key length in characters.
    pub idempotency_max_key_len: usize,
    pub max_message_body_bytes: usize,
    pub max_create_session_body_bytes: usize,
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            message_rate_per_minute: 20,
            sse_connect_rate_per_minute: 10,
            sse_connect_attempt_registry_cap: 10_000,
            idempotency_max_entries: 20_000,
            idempotency_ttl: Duration::from_secs(300),
            idempotency_max_key_len: 128,
            max_message_body_bytes: 50_000,
            max_create_session_body_bytes: 200_000,
        }
    }
}

/// In-flight processing / connection caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub max_processing_sessions_per_user: usize,
    pub max_processing_sessions: usize,
    #[serde(with = "humantime_serde")]
    pub processing_ttl: Duration,
    pub max_total_sse_connections: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processing_sessions_per_user: 6,
            max_processing_sessions: 2_000,
            processing_ttl: Duration::from_secs(15 * 60),
            max_total_sse_connections: 10_000,
        }
    }
}

/// Feature gates. Redis-backed bus/rate-limit are
/// out of scope for this single-process core and recorded
/// here only so the config surface matches what a deployment expects to
/// set; this core always runs the in-process bus and in-memory guards
/// regardless of these two flags.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeatureFlags {
    pub blueprint_approval_enabled: bool,
    pub redis_bus_enabled: bool,
    pub redis_rate_limit_enabled: bool,
    pub self_review_model_routing_enabled: bool,
}
