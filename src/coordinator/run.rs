//! The coordinator's top-level run loop: drives the Strategist,
//! an optional blueprint gate, the Craftsman, and the Producer (with its
//! revision sub-loop) over one shared `PipelineState`, then assembles and
//! persists the final resume.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::LoopContext;
use crate::bus::AgentMessage;
use crate::coordinator::deps::PipelineDeps;
use crate::coordinator::projection::{build_strategist_message, project_master_resume};
use crate::coordinator::sections::{expand_section_order, sanitize_education_years};
use crate::evidence::{EvidenceItem, EvidenceSource};
use crate::gate::events::SseEvent;
use crate::persistence::{save_master_resume, MasterResume, SessionCheckpoint};
use crate::state::{merge_scratchpad_sections, PipelineState, Stage, UserPreferences};
use crate::types::{Error, Result, SessionId, UserId};

/// Business-data inputs for one pipeline run, minus the `emit`/`waitForUser`
/// callbacks — those live on `PipelineDeps` as the `sse`/`gate_waiter`
/// collaborators instead of ad hoc closures.
pub struct RunConfig {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub raw_resume_text: String,
    pub job_description: String,
    pub company_name: String,
    pub preferences: UserPreferences,
    pub master_resume: Option<MasterResume>,
}

/// Drive one pipeline run to completion or failure.
pub async fn run(deps: &PipelineDeps, config: RunConfig, cancel: CancellationToken) -> Result<PipelineState> {
    let state = Arc::new(Mutex::new(PipelineState::new(
        config.session_id.clone(),
        config.user_id.clone(),
        config.preferences.clone(),
        deps.limits.max_revision_rounds,
    )));

    deps.usage.start(config.session_id.clone(), config.user_id.clone()).await;
    deps.running.insert(config.session_id.clone()).await;

    let tools = Arc::new(deps.tool_factory.build(Arc::clone(&state), cancel.clone()));

    let outcome = run_phases(deps, &config, Arc::clone(&state), Arc::clone(&tools), cancel.clone()).await;

    deps.running.remove(&config.session_id).await;
    // Each phase already folded its own `LoopOutcome.usage` into `state`
    // synchronously as it completed; `stop` here only retires the tracker
    // entry used for the live `recorder` feed, its return value is not the
    // total — a late-arriving spawned `record()` racing this removal would
    // otherwise be silently dropped and undercount the total.
    deps.usage.stop(&config.session_id).await;
    {
        let mut st = state.lock().await;
        let cost = deps.pricing.estimate_cost_usd(st.token_usage().input_tokens, st.token_usage().output_tokens);
        st.set_estimated_cost(cost);
    }

    if let Err(e) = outcome {
        cancel.cancel();
        let stage_label = stage_label(state.lock().await.current_stage());
        deps.sse
            .emit(
                &config.session_id,
                SseEvent::PipelineError {
                    session_id: config.session_id.clone(),
                    stage: stage_label,
                    error: e.to_string(),
                },
            )
            .await;
        return Err(e);
    }

    let final_state = state.lock().await.clone();
    Ok(final_state)
}

fn stage_label(stage: Stage) -> String {
    serde_json::to_value(stage)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn run_phases(
    deps: &PipelineDeps,
    config: &RunConfig,
    state: Arc<Mutex<PipelineState>>,
    tools: Arc<std::collections::HashMap<String, Arc<dyn crate::agent::Tool>>>,
    cancel: CancellationToken,
) -> Result<()> {
    run_strategist_phase(deps, config, &state, &tools, &cancel).await?;
    run_blueprint_gate(deps, config, &state, &cancel).await?;
    run_craftsman_phase(deps, config, &state, &tools, &cancel).await;
    run_producer_phase(deps, config, &state, &tools, &cancel).await?;
    finalize(deps, config, &state, &cancel).await?;
    Ok(())
}

async fn run_strategist_phase(
    deps: &PipelineDeps,
    config: &RunConfig,
    state: &Arc<Mutex<PipelineState>>,
    tools: &Arc<std::collections::HashMap<String, Arc<dyn crate::agent::Tool>>>,
    cancel: &CancellationToken,
) -> Result<()> {
    deps.sse
        .emit(
            &config.session_id,
            SseEvent::StageStart {
                session_id: config.session_id.clone(),
                stage: Stage::Intake,
                message: "Analyzing your resume and the target role.".to_string(),
            },
        )
        .await;

    let started = Instant::now();

    let projected = config.master_resume.as_ref().map(|master| {
        project_master_resume(
            master,
            deps.limits.max_bullets_per_role as usize,
            deps.limits.max_evidence_items_injected as usize,
        )
    });
    let preferences_json = serde_json::to_value(&config.preferences).unwrap_or(Value::Null);
    let message = build_strategist_message(
        &config.raw_resume_text,
        &config.job_description,
        &config.company_name,
        &preferences_json,
        projected.as_ref(),
    );

    let ctx = LoopContext::new(cancel.clone())
        .with_usage_recorder(Arc::new(deps.usage.recorder(config.session_id.clone())));

    let outcome = deps
        .agent_loop
        .run(&deps.agents.strategist, &deps.catalog, tools, message, ctx)
        .await?;

    let (intake_present, architect_present, positioning) = {
        let mut st = state.lock().await;
        st.add_token_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
        (st.intake.is_some(), st.architect.is_some(), st.positioning.clone())
    };

    if !intake_present || !architect_present {
        return Err(Error::fatal(
            "intake",
            "Strategist did not populate both intake and architect outputs",
        ));
    }

    if let Err(e) = deps
        .positioning_store
        .upsert(&config.user_id, positioning.unwrap_or(Value::Null), Utc::now())
        .await
    {
        tracing::warn!(error = %e, "positioning_profile_save_failed_non_fatal");
    }

    deps.sse
        .emit(
            &config.session_id,
            SseEvent::StageComplete {
                session_id: config.session_id.clone(),
                stage: Stage::Architect,
                message: "Positioning and resume blueprint ready.".to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        )
        .await;

    Ok(())
}

async fn run_blueprint_gate(
    deps: &PipelineDeps,
    config: &RunConfig,
    state: &Arc<Mutex<PipelineState>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let workflow_mode = {
        let st = state.lock().await;
        st.user_preferences.workflow_mode
    };
    if !deps.features.blueprint_approval_enabled || workflow_mode == crate::state::WorkflowMode::FastDraft {
        return Ok(());
    }

    let architect = { state.lock().await.architect.clone().unwrap_or(Value::Null) };
    deps.sse
        .emit(
            &config.session_id,
            SseEvent::BlueprintReady {
                session_id: config.session_id.clone(),
                data: architect,
            },
        )
        .await;

    let response = deps
        .gate_waiter
        .wait_for_user(deps.gate_store.as_ref(), &config.session_id, "architect_review", cancel.clone())
        .await?;

    let mut st = state.lock().await;
    if let Some(architect) = st.architect.as_mut() {
        if let Some(angle) = response.get("positioning_angle") {
            architect["positioning_angle"] = angle.clone();
        }
        if let Some(order) = response.get("section_plan").and_then(|sp| sp.get("order")) {
            architect["section_plan"]["order"] = order.clone();
        }
    }
    st.advance_stage(Stage::ArchitectReview)?;
    Ok(())
}

/// Missing Craftsman output is logged but the Producer still runs.
async fn run_craftsman_phase(
    deps: &PipelineDeps,
    config: &RunConfig,
    state: &Arc<Mutex<PipelineState>>,
    tools: &Arc<std::collections::HashMap<String, Arc<dyn crate::agent::Tool>>>,
    cancel: &CancellationToken,
) {
    deps.sse
        .emit(
            &config.session_id,
            SseEvent::StageStart {
                session_id: config.session_id.clone(),
                stage: Stage::SectionWriting,
                message: "Drafting resume sections.".to_string(),
            },
        )
        .await;

    let message = {
        let st = state.lock().await;
        build_craftsman_message(&st)
    };

    let ctx = LoopContext::new(cancel.clone())
        .with_usage_recorder(Arc::new(deps.usage.recorder(config.session_id.clone())));

    match deps
        .agent_loop
        .run(&deps.agents.craftsman, &deps.catalog, tools, message, ctx)
        .await
    {
        Ok(outcome) => {
            let mut st = state.lock().await;
            st.add_token_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
            merge_scratchpad_sections(&mut st, &outcome.scratchpad);
        }
        Err(e) => {
            tracing::warn!(error = %e, "craftsman_phase_failed_non_fatal");
        }
    }

    deps.sse
        .emit(
            &config.session_id,
            SseEvent::StageComplete {
                session_id: config.session_id.clone(),
                stage: Stage::SectionWriting,
                message: "Draft sections ready for review.".to_string(),
                duration_ms: 0,
            },
        )
        .await;
}

fn build_craftsman_message(state: &PipelineState) -> String {
    format!(
        "Blueprint:\n{}\n\nEvidence library (positioning profile):\n{}\n\nInterview transcript:\n{}\n\nGap analysis:\n{}",
        state.architect.clone().unwrap_or(Value::Null),
        state.positioning.clone().unwrap_or(Value::Null),
        serde_json::to_value(&state.interview_transcript).unwrap_or(Value::Null),
        state.gap_analysis.clone().unwrap_or(Value::Null),
    )
}

async fn run_producer_phase(
    deps: &PipelineDeps,
    config: &RunConfig,
    state: &Arc<Mutex<PipelineState>>,
    tools: &Arc<std::collections::HashMap<String, Arc<dyn crate::agent::Tool>>>,
    cancel: &CancellationToken,
) -> Result<()> {
    deps.sse
        .emit(
            &config.session_id,
            SseEvent::StageStart {
                session_id: config.session_id.clone(),
                stage: Stage::QualityReview,
                message: "Reviewing resume quality.".to_string(),
            },
        )
        .await;

    {
        let mut st = state.lock().await;
        st.advance_stage(Stage::QualityReview)?;
    }

    let revision_handler = Arc::new(crate::bus::RevisionHandler::new(
        Arc::clone(&deps.agent_loop),
        deps.agents.craftsman.clone(),
        Arc::clone(&deps.catalog),
        Arc::clone(tools),
    ));

    let handler_state = Arc::clone(state);
    let handler_sse = Arc::clone(&deps.sse);
    let handler_session = config.session_id.clone();
    let handler_cancel = cancel.clone();
    let handler = revision_handler;

    deps.bus
        .subscribe(
            "craftsman",
            Arc::new(move |msg: AgentMessage| {
                let handler = Arc::clone(&handler);
                let state = Arc::clone(&handler_state);
                let sse = Arc::clone(&handler_sse);
                let session = handler_session.clone();
                let cancel = handler_cancel.clone();
                Box::pin(async move {
                    let filtered = handler.filter(&state, &msg).await;

                    for section in &filtered.dropped_cap_reached {
                        sse.emit(
                            &session,
                            SseEvent::Transparency {
                                session_id: session.clone(),
                                stage: Stage::Revision,
                                message: crate::bus::cap_reached_message(section),
                            },
                        )
                        .await;
                    }

                    sse.emit(
                        &session,
                        SseEvent::RevisionStart {
                            session_id: session.clone(),
                            instructions: serde_json::to_value(&filtered.surviving).unwrap_or(Value::Null),
                        },
                    )
                    .await;
                    if !filtered.surviving.is_empty() {
                        sse.emit(
                            &session,
                            SseEvent::Transparency {
                                session_id: session.clone(),
                                stage: Stage::Revision,
                                message: crate::bus::batch_summary_message(&filtered.surviving),
                            },
                        )
                        .await;
                    }

                    {
                        let mut st = state.lock().await;
                        let _ = st.advance_stage(Stage::Revision);
                    }

                    let _ = handler.run_sub_loop(&state, &filtered.surviving, cancel).await;

                    {
                        let mut st = state.lock().await;
                        let _ = st.advance_stage(Stage::QualityReview);
                    }
                })
            }),
        )
        .await;

    let message = {
        let st = state.lock().await;
        build_producer_message(&st)
    };

    let ctx = LoopContext::new(cancel.clone())
        .with_usage_recorder(Arc::new(deps.usage.recorder(config.session_id.clone())));

    let run_result = deps
        .agent_loop
        .run(&deps.agents.producer, &deps.catalog, tools, message, ctx)
        .await;

    deps.bus.unsubscribe("craftsman").await;

    let outcome = run_result?;

    let quality_review = {
        let mut st = state.lock().await;
        st.add_token_usage(outcome.usage.input_tokens, outcome.usage.output_tokens);
        st.quality_review.clone()
    };
    let details = outcome.scratchpad.get("_quality_details").cloned();
    if let Some(review) = &quality_review {
        deps.sse
            .emit(
                &config.session_id,
                SseEvent::QualityScores {
                    session_id: config.session_id.clone(),
                    scores: serde_json::to_value(&review.scores).unwrap_or(Value::Null),
                    details,
                },
            )
            .await;
    }

    Ok(())
}

fn build_producer_message(state: &PipelineState) -> String {
    let sections: Vec<(&String, &crate::state::SectionArtifact)> = state.sections().iter().collect();
    format!(
        "Blueprint:\n{}\n\nDraft sections:\n{}",
        state.architect.clone().unwrap_or(Value::Null),
        serde_json::to_value(
            sections
                .iter()
                .map(|(name, artifact)| serde_json::json!({"section": name, "content": artifact.content}))
                .collect::<Vec<_>>()
        )
        .unwrap_or(Value::Null),
    )
}

async fn finalize(
    deps: &PipelineDeps,
    config: &RunConfig,
    state: &Arc<Mutex<PipelineState>>,
    _cancel: &CancellationToken,
) -> Result<()> {
    let (order, sections, intake, contact_info) = {
        let st = state.lock().await;
        let order: Vec<String> = st
            .architect
            .as_ref()
            .and_then(|a| a.get("section_plan"))
            .and_then(|sp| sp.get("order"))
            .and_then(|o| o.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let expanded = expand_section_order(&order, &st);
        let intake = st.intake.clone();
        let contact_info = intake.as_ref().and_then(|i| i.get("contact_info")).cloned();
        (expanded, st.sections().clone(), intake, contact_info)
    };

    let audit_clean = intake
        .as_ref()
        .and_then(|i| i.get("age_protection"))
        .and_then(|a| a.get("audit_clean"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let flagged_years: Vec<i32> = intake
        .as_ref()
        .and_then(|i| i.get("age_protection"))
        .and_then(|a| a.get("flagged_years"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_i64()).map(|v| v as i32).collect())
        .unwrap_or_default();
    let current_year = Utc::now().year();

    let resume_sections: Vec<Value> = order
        .iter()
        .filter_map(|name| sections.get(name).map(|artifact| (name, artifact)))
        .map(|(name, artifact)| {
            let content = if name == "education" || name == "earlier_career" {
                sanitize_education_years(&artifact.content, &flagged_years, audit_clean, current_year)
            } else {
                artifact.content.clone()
            };
            serde_json::json!({ "section": name, "content": content })
        })
        .collect();

    let resume_value = serde_json::json!({ "sections": resume_sections });
    let validation = deps.ats_validator.validate(&resume_value).await;

    {
        let mut st = state.lock().await;
        st.advance_stage(Stage::Complete)?;
    }

    // Checkpoint (and surface any failure) before `pipeline_complete` goes
    // out — that event is the last one a successful run emits, so a
    // checkpoint-failure notice has to precede it, not follow.
    let checkpoint = SessionCheckpoint {
        pipeline_stage: Some(Stage::Complete),
        pipeline_status: "complete".to_string(),
        ..Default::default()
    };
    if let Err(e) = deps.session_store.checkpoint(&config.session_id, checkpoint).await {
        tracing::warn!(error = %e, "session_checkpoint_failed_non_fatal");
        deps.sse
            .emit(
                &config.session_id,
                SseEvent::Transparency {
                    session_id: config.session_id.clone(),
                    stage: Stage::Complete,
                    message: "We couldn't save your progress just now — please retry if you reconnect.".to_string(),
                },
            )
            .await;
    }

    deps.sse
        .emit(
            &config.session_id,
            SseEvent::PipelineComplete {
                session_id: config.session_id.clone(),
                contact_info,
                company_name: config.company_name.clone(),
                resume: resume_value,
                export_validation: serde_json::to_value(&validation).unwrap_or(Value::Null),
            },
        )
        .await;

    let new_evidence: Vec<EvidenceItem> = resume_sections
        .iter()
        .filter_map(|s| {
            let text = s.get("content")?.as_str()?;
            let category = s.get("section")?.as_str()?;
            EvidenceItem::new(text, EvidenceSource::Crafted, category, config.session_id.to_string(), Utc::now())
        })
        .collect();

    if let Err(e) = save_master_resume(
        deps.master_store.as_ref(),
        deps.session_store.as_ref(),
        &config.session_id,
        &config.user_id,
        config.master_resume.as_ref().map(|m| m.id.as_str()),
        new_evidence,
        config.raw_resume_text.clone(),
        Utc::now(),
    )
    .await
    {
        tracing::warn!(error = %e, "master_resume_save_failed_best_effort");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{Completion, LlmClient, Message, NativeToolCall, TokenUsage, ToolDefinition};
    use crate::agent::tool::{Tool, ToolCatalog, ToolEntry};
    use crate::agent::{AgentConfig, AgentLoop, ModelTier};
    use crate::bus::AgentBus;
    use crate::gate::{GateWaiter, RunningSet, SseHub};
    use crate::persistence::{InMemoryMasterResumeStore, InMemoryPositioningProfileStore, InMemorySessionStore};
    use crate::state::{QualityReview, QualityReviewDecision, SectionArtifact};
    use crate::types::{FeatureFlags, PipelineLimits};
    use crate::usage::UsageTracker;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Feeds back a fixed script of completions regardless of which of the
    /// three agent-loop invocations is calling — the phases share one
    /// `AgentLoop`/`LlmClient` for the whole run.
    struct ScriptedLlm {
        rounds: StdMutex<Vec<Completion>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn model_name(&self, _tier: ModelTier) -> &str {
            "scripted"
        }

        async fn complete(&self, _tier: ModelTier, _messages: &[Message], _tools: &[ToolDefinition]) -> Result<Completion> {
            let mut rounds = self.rounds.lock().unwrap();
            if rounds.is_empty() {
                return Ok(Completion {
                    content: "done".to_string(),
                    tool_calls: vec![],
                    usage: TokenUsage::default(),
                });
            }
            Ok(rounds.remove(0))
        }
    }

    fn tool_call(name: &str) -> Completion {
        Completion {
            content: String::new(),
            tool_calls: vec![NativeToolCall {
                id: format!("call-{name}"),
                name: name.to_string(),
                arguments: serde_json::json!({}),
            }],
            usage: TokenUsage::default(),
        }
    }

    fn no_tool_calls() -> Completion {
        Completion {
            content: "ok".to_string(),
            tool_calls: vec![],
            usage: TokenUsage::default(),
        }
    }

    /// Writes `state.intake`/`state.architect`/`state.positioning` the way a
    /// concrete Strategist tool would — directly through the narrow
    /// `PipelineState` interface it closed over at construction, rather
    /// than through a free-form scratchpad bag.
    struct PopulateStrategist {
        state: Arc<Mutex<PipelineState>>,
    }

    #[async_trait]
    impl Tool for PopulateStrategist {
        fn name(&self) -> &str {
            "populate_strategist"
        }
        async fn execute(&self, _params: Value) -> Result<Value> {
            let mut st = self.state.lock().await;
            st.intake = Some(serde_json::json!({
                "contact": { "name": "Jane Smith" },
                "contact_info": { "name": "Jane Smith" },
            }));
            st.architect = Some(serde_json::json!({
                "target_role": "CTO at TechCorp",
                "positioning_angle": "engineering leadership",
                "section_plan": { "order": ["summary"] },
            }));
            st.positioning = Some(serde_json::json!({ "angle": "engineering leadership" }));
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    struct PopulateCraftsman {
        state: Arc<Mutex<PipelineState>>,
    }

    #[async_trait]
    impl Tool for PopulateCraftsman {
        fn name(&self) -> &str {
            "write_summary"
        }
        async fn execute(&self, _params: Value) -> Result<Value> {
            let mut st = self.state.lock().await;
            st.write_section(
                "summary",
                SectionArtifact {
                    content: "Engineering leader with a track record in distributed systems.".to_string(),
                    keywords_used: vec!["engineering".to_string()],
                    requirements_addressed: vec![],
                    evidence_ids_used: vec![],
                },
            )?;
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    struct ApproveResume {
        state: Arc<Mutex<PipelineState>>,
    }

    #[async_trait]
    impl Tool for ApproveResume {
        fn name(&self) -> &str {
            "approve_resume"
        }
        async fn execute(&self, _params: Value) -> Result<Value> {
            let mut st = self.state.lock().await;
            let mut scores = std::collections::HashMap::new();
            scores.insert("hiring_manager_impact".to_string(), 4.0);
            scores.insert("ats_score".to_string(), 88.0);
            st.quality_review = Some(QualityReview {
                decision: QualityReviewDecision::Approve,
                scores,
                issues: vec![],
            });
            Ok(serde_json::json!({ "ok": true }))
        }
    }

    struct HappyPathToolFactory;

    impl ToolFactory for HappyPathToolFactory {
        fn build(&self, state: Arc<Mutex<PipelineState>>, _cancel: CancellationToken) -> HashMap<String, Arc<dyn Tool>> {
            let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
            map.insert(
                "populate_strategist".to_string(),
                Arc::new(PopulateStrategist { state: Arc::clone(&state) }),
            );
            map.insert(
                "write_summary".to_string(),
                Arc::new(PopulateCraftsman { state: Arc::clone(&state) }),
            );
            map.insert("approve_resume".to_string(), Arc::new(ApproveResume { state }));
            map
        }
    }

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        for id in ["populate_strategist", "write_summary", "approve_resume"] {
            catalog
                .register(ToolEntry {
                    id: id.to_string(),
                    description: "test tool".to_string(),
                    parameters: vec![],
                    parallel_safe: false,
                })
                .unwrap();
        }
        catalog
    }

    fn agent(name: &str, domain: &str, tool: &str) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            domain: domain.to_string(),
            model_tier: ModelTier::Mid,
            system_prompt: "test agent".to_string(),
            allowed_tools: vec![tool.to_string()],
            max_rounds: 5,
            round_timeout_ms: 30_000,
            overall_timeout_ms: 60_000,
            parallel_safe_tools: Default::default(),
            loop_max_tokens: None,
        }
    }

    fn test_deps(llm: Arc<dyn LlmClient>) -> PipelineDeps {
        let session_store = Arc::new(InMemorySessionStore::new());
        PipelineDeps {
            agent_loop: Arc::new(AgentLoop::new(llm)),
            catalog: Arc::new(catalog()),
            agents: AgentTriad {
                strategist: agent("strategist", "strategist", "populate_strategist"),
                craftsman: agent("craftsman", "craftsman", "write_summary"),
                producer: agent("producer", "producer", "approve_resume"),
            },
            tool_factory: Arc::new(HappyPathToolFactory),
            bus: Arc::new(AgentBus::new()),
            usage: Arc::new(UsageTracker::new()),
            sse: Arc::new(SseHub::new()),
            running: Arc::new(RunningSet::new()),
            gate_waiter: Arc::new(GateWaiter::new()),
            gate_store: session_store.clone(),
            session_store: session_store.clone(),
            master_store: Arc::new(InMemoryMasterResumeStore::new()),
            positioning_store: Arc::new(InMemoryPositioningProfileStore::new()),
            ats_validator: Arc::new(crate::coordinator::sections::PassthroughAtsValidator),
            pricing: crate::coordinator::cost::PricingConfig::default(),
            limits: PipelineLimits::default(),
            features: FeatureFlags::default(),
        }
    }

    fn sample_config(session_id: SessionId) -> RunConfig {
        RunConfig {
            session_id,
            user_id: UserId::must("u1"),
            raw_resume_text: "Jane Smith VP Engineering with 12 years in platform teams.".to_string(),
            job_description: "CTO at TechCorp".to_string(),
            company_name: "TechCorp".to_string(),
            preferences: UserPreferences::default(),
            master_resume: None,
        }
    }

    /// Happy path, balanced mode — every phase
    /// populates its outputs and the run completes with `pipeline_complete`
    /// as the terminal event, `stage_start{quality_review}` preceding it.
    #[tokio::test]
    async fn happy_path_completes_and_emits_canonical_stage_order() {
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(vec![
                tool_call("populate_strategist"),
                no_tool_calls(),
                tool_call("write_summary"),
                no_tool_calls(),
                tool_call("approve_resume"),
                no_tool_calls(),
            ]),
        });
        let deps = test_deps(llm);
        let session_id = SessionId::new();

        let mut events = deps.sse.subscribe(&session_id).await;

        let final_state = run(&deps, sample_config(session_id.clone()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(final_state.current_stage(), Stage::Complete);
        assert!(final_state.section("summary").is_some());
        assert_eq!(
            final_state.quality_review.as_ref().map(|q| q.decision),
            Some(QualityReviewDecision::Approve)
        );

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event.event_name().to_string());
        }
        assert_eq!(seen.first().map(String::as_str), Some("stage_start"));
        assert_eq!(seen.last().map(String::as_str), Some("pipeline_complete"));
        assert!(seen.contains(&"quality_scores".to_string()));
        let quality_scores_pos = seen.iter().position(|e| e == "quality_scores").unwrap();
        let complete_pos = seen.iter().position(|e| e == "pipeline_complete").unwrap();
        assert!(quality_scores_pos < complete_pos);
    }

    /// The Strategist returns without populating
    /// `intake`/`architect` — fatal, `pipeline_error` is emitted, and the
    /// caller observes the error.
    #[tokio::test]
    async fn fatal_strategist_failure_emits_pipeline_error() {
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(vec![no_tool_calls()]),
        });
        let deps = test_deps(llm);
        let session_id = SessionId::new();
        let mut events = deps.sse.subscribe(&session_id).await;

        let result = run(&deps, sample_config(session_id), CancellationToken::new()).await;
        assert!(result.is_err());

        let mut saw_pipeline_error = false;
        while let Ok(event) = events.try_recv() {
            if event.event_name() == "pipeline_error" {
                saw_pipeline_error = true;
            }
        }
        assert!(saw_pipeline_error);
    }

    /// Missing Craftsman output is logged but the Producer still runs.
    #[tokio::test]
    async fn missing_craftsman_output_does_not_abort_producer_phase() {
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(vec![
                tool_call("populate_strategist"),
                no_tool_calls(),
                // Craftsman produces no tool call at all — no section written.
                no_tool_calls(),
                tool_call("approve_resume"),
                no_tool_calls(),
            ]),
        });
        let deps = test_deps(llm);
        let session_id = SessionId::new();

        let final_state = run(&deps, sample_config(session_id), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(final_state.current_stage(), Stage::Complete);
        assert!(final_state.section("summary").is_none());
        assert!(final_state.quality_review.is_some());
    }
}
