//! Resume pipeline HTTP entry point.
//!
//! Wires the library's collaborators (coordinator, agent loop, bus, gate/SSE
//! transport, persistence, guards) behind a handful of endpoints that
//! together form the core's HTTP surface. Authentication, the relational
//! store, and every concrete tool/LLM-vendor detail are out of scope —
//! this binary stands in for a real deployment's router with
//! in-memory stores and a bearer-token stand-in.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode as AxumStatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use pipeline_core::agent::{AgentConfig, AgentLoop, GenAiClient, ModelTier, Tool, ToolCatalog};
use pipeline_core::bus::AgentBus;
use pipeline_core::coordinator::{
    run as run_pipeline, AgentTriad, PipelineDeps, PricingConfig, RunConfig, ToolFactory,
};
use pipeline_core::gate::{
    ConnectionRegistry, GateWaiter, RunningSet, SessionLockManager, SseEvent, SseHub,
};
use pipeline_core::guards::{IdempotencyGuard, IdempotencyOutcome, RateLimiter};
use pipeline_core::persistence::{
    InMemoryMasterResumeStore, InMemoryPositioningProfileStore, InMemorySessionStore,
};
use pipeline_core::state::{UserPreferences, WorkflowMode};
use pipeline_core::{Config, Error as CoreError};

/// Concrete tool implementations are out of scope: the Strategist,
/// Craftsman, and Producer's actual `parse_resume`/`design_blueprint`/etc.
/// tool bodies live wherever a deployment's agent-specific code lives. This
/// factory hands each run an empty table, which is enough for the agent
/// loop to run — an LLM that calls a tool not in the table gets the
/// loop's "unknown tool" error result.
struct NoopToolFactory;

impl ToolFactory for NoopToolFactory {
    fn build(
        &self,
        _state: Arc<tokio::sync::Mutex<pipeline_core::state::PipelineState>>,
        _cancel: CancellationToken,
    ) -> HashMap<String, Arc<dyn Tool>> {
        HashMap::new()
    }
}

fn agent_triad() -> AgentTriad {
    let base = |name: &str, domain: &str, tier: ModelTier| AgentConfig {
        name: name.to_string(),
        domain: domain.to_string(),
        model_tier: tier,
        system_prompt: format!("You are the {domain} agent in a resume-writing pipeline."),
        allowed_tools: Vec::new(),
        max_rounds: 12,
        round_timeout_ms: 60_000,
        overall_timeout_ms: 300_000,
        parallel_safe_tools: Default::default(),
        loop_max_tokens: None,
    };
    AgentTriad {
        strategist: base("strategist", "strategist", ModelTier::Primary),
        craftsman: base("craftsman", "craftsman", ModelTier::Mid),
        producer: base("producer", "producer", ModelTier::Mid),
    }
}

#[derive(Clone)]
struct AppState {
    deps: Arc<PipelineDeps>,
    session_lock: Arc<SessionLockManager>,
    connections: Arc<ConnectionRegistry>,
    message_rate: Arc<RateLimiter>,
    idempotency: Arc<IdempotencyGuard>,
    auth_token: Arc<String>,
}

fn bearer_user(headers: &HeaderMap, expected_prefix: &str) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if !expected_prefix.is_empty() && !token.starts_with(expected_prefix) {
        return None;
    }
    Some(token.to_string())
}

fn error_response(err: CoreError) -> Response {
    let status = AxumStatusCode::from_u16(err.to_http_status()).unwrap_or(AxumStatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn health(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn sse_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, Response> {
    let session = pipeline_core::types::SessionId::from_string(session_id)
        .map_err(|e| error_response(CoreError::validation(e)))?;
    let user_id = bearer_user(&headers, &state.auth_token)
        .map(pipeline_core::types::UserId::must)
        .ok_or_else(|| error_response(CoreError::validation("missing or invalid bearer token")))?;

    state
        .connections
        .check_connect_rate(&user_id)
        .map_err(error_response)?;
    let guard = state
        .connections
        .acquire(user_id)
        .await
        .map_err(error_response)?;

    let rx = state.deps.sse.subscribe(&session).await;
    let connected = futures::stream::once(async move {
        Ok(Event::default()
            .event("connected")
            .data(serde_json::to_string(&json!({ "session_id": session.to_string() })).unwrap_or_default()))
    });

    let live = BroadcastStream::new(rx).filter_map(move |msg| {
        let _guard = &guard;
        async move {
            match msg {
                Ok(event) => {
                    let data = serde_json::to_string(&event.data_json()).unwrap_or_default();
                    Some(Ok(Event::default().event(event.event_name()).data(data)))
                }
                Err(_) => None,
            }
        }
    });

    Ok(Sse::new(connected.chain(live)).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(10))))
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    content: String,
    idempotency_key: Option<String>,
    job_description: Option<String>,
    company_name: Option<String>,
    #[serde(default)]
    workflow_mode: Option<WorkflowModeWire>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum WorkflowModeWire {
    FastDraft,
    Balanced,
    DeepDive,
}

impl From<WorkflowModeWire> for WorkflowMode {
    fn from(w: WorkflowModeWire) -> Self {
        match w {
            WorkflowModeWire::FastDraft => WorkflowMode::FastDraft,
            WorkflowModeWire::Balanced => WorkflowMode::Balanced,
            WorkflowModeWire::DeepDive => WorkflowMode::DeepDive,
        }
    }
}

/// `POST /sessions/:id/messages`: body size + message rate +
/// idempotency guards, then a session-locked pipeline run spawned in the
/// background while the caller gets back `{status: "processing"}` — a
/// fire-and-forget contract where the SSE stream carries the real
/// progress.
async fn post_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if body.len() > 50_000 {
        return error_response(CoreError::cap_exceeded("message body exceeds 50,000 characters"));
    }
    let session = match pipeline_core::types::SessionId::from_string(session_id) {
        Ok(s) => s,
        Err(e) => return error_response(CoreError::validation(e)),
    };
    let user_id = match bearer_user(&headers, &state.auth_token) {
        Some(t) => pipeline_core::types::UserId::must(t),
        None => return error_response(CoreError::validation("missing or invalid bearer token")),
    };
    let req: SendMessageRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => return error_response(CoreError::validation(e.to_string())),
    };

    if !state.message_rate.try_acquire(user_id.as_str()) {
        return error_response(CoreError::quota_exceeded("message rate exceeded"));
    }

    if let Some(key) = &req.idempotency_key {
        match state.idempotency.check_and_record(user_id.as_str(), key) {
            IdempotencyOutcome::Duplicate => {
                return Json(json!({ "status": "duplicate" })).into_response();
            }
            IdempotencyOutcome::Fresh => {}
        }
    }

    let lock_guard = match state.session_lock.begin(&session, &user_id).await {
        Ok(g) => g,
        Err(e) => return error_response(e),
    };

    let deps = Arc::clone(&state.deps);
    let config = RunConfig {
        session_id: session.clone(),
        user_id,
        raw_resume_text: req.content,
        job_description: req.job_description.unwrap_or_default(),
        company_name: req.company_name.unwrap_or_default(),
        preferences: UserPreferences {
            workflow_mode: req.workflow_mode.map(Into::into).unwrap_or(WorkflowMode::Balanced),
            ..Default::default()
        },
        master_resume: None,
    };

    tokio::spawn(async move {
        let _lock_guard = lock_guard;
        let cancel = CancellationToken::new();
        if let Err(e) = run_pipeline(&deps, config, cancel).await {
            tracing::warn!(session_id = %session, error = %e, "pipeline_run_failed");
        }
    });

    Json(json!({ "status": "processing" })).into_response()
}

fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/{id}/sse", get(sse_handler))
        .route("/sessions/{id}/messages", post(post_message))
        .with_state(state)
}

fn build_state(config: &Config) -> AppState {
    let llm = Arc::new(GenAiClient::new(
        std::env::var("PIPELINE_LIGHT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        std::env::var("PIPELINE_MID_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
        std::env::var("PIPELINE_PRIMARY_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
    ));
    let session_store = Arc::new(InMemorySessionStore::new());
    let deps = Arc::new(PipelineDeps {
        agent_loop: Arc::new(AgentLoop::new(llm)),
        catalog: Arc::new(ToolCatalog::new()),
        agents: agent_triad(),
        tool_factory: Arc::new(NoopToolFactory),
        bus: Arc::new(AgentBus::new()),
        usage: Arc::new(pipeline_core::usage::UsageTracker::new()),
        sse: Arc::new(SseHub::new()),
        running: Arc::new(RunningSet::new()),
        gate_waiter: Arc::new(GateWaiter::new()),
        gate_store: session_store.clone(),
        session_store: session_store.clone(),
        master_store: Arc::new(InMemoryMasterResumeStore::new()),
        positioning_store: Arc::new(InMemoryPositioningProfileStore::new()),
        ats_validator: Arc::new(pipeline_core::coordinator::PassthroughAtsValidator),
        pricing: PricingConfig::default(),
        limits: config.pipeline.clone(),
        features: config.features.clone(),
    });

    AppState {
        connections: Arc::new(ConnectionRegistry::new(
            config.pipeline.max_sse_per_user as usize,
            config.processing.max_total_sse_connections,
            &config.guards,
        )),
        session_lock: Arc::new(SessionLockManager::new(config.processing.clone())),
        message_rate: Arc::new(RateLimiter::new(
            std::time::Duration::from_secs(60),
            config.guards.message_rate_per_minute,
            config.guards.sse_connect_attempt_registry_cap,
        )),
        idempotency: Arc::new(IdempotencyGuard::new(
            config.guards.idempotency_max_entries,
            config.guards.idempotency_ttl,
        )),
        auth_token: Arc::new(std::env::var("PIPELINE_AUTH_TOKEN").unwrap_or_default()),
        deps,
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    pipeline_core::observability::init_tracing();

    let config = Config::from_env();
    let state = build_state(&config);

    let addr: SocketAddr = std::env::var("PIPELINE_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    tracing::info!(%addr, "resume pipeline SSE server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
