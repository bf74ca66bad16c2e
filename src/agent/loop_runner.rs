//! The agent loop: drives one agent through rounds of
//! LLM inference interleaved with tool execution, sequential and parallel.
//!
//! A policy-free ReAct loop, plus `recovery::with_recovery_async` for
//! panic-isolated tool execution and a `ResourceUsage`-style accounting
//! shape for token totals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::llm::{Completion, LlmClient, Message, NativeToolCall, TokenUsage, ToolDefinition};
use crate::agent::registry::AgentConfig;
use crate::agent::tool::{Tool, ToolCatalog, ToolResult};
use crate::recovery::with_recovery_async;
use crate::types::{Error, Result};

/// Invoked once per round with the tokens that round consumed, so the
/// session-scoped usage accumulator reflects partial progress even if
/// the loop later times out or errors.
pub type UsageRecorder = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Per-run context threaded into the loop: cancellation and the usage sink.
/// Does not carry pipeline state — tool implementations (out of scope here)
/// close over whatever shared state they need at construction time.
#[derive(Clone)]
pub struct LoopContext {
    pub cancel: CancellationToken,
    pub usage_recorder: Option<UsageRecorder>,
}

impl std::fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl LoopContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            usage_recorder: None,
        }
    }

    pub fn with_usage_recorder(mut self, recorder: UsageRecorder) -> Self {
        self.usage_recorder = Some(recorder);
        self
    }

    fn record_usage(&self, input_tokens: u64, output_tokens: u64) {
        if let Some(recorder) = &self.usage_recorder {
            recorder(input_tokens, output_tokens);
        }
    }
}

/// Result of one full agent-loop invocation.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Free-form key/value scratchpad a tool or the loop itself can write
    /// to. `_final_text` holds the last no-tool-call completion's text.
    pub scratchpad: Map<String, Value>,
    pub messages_out: Vec<Message>,
    pub usage: TokenUsage,
    pub rounds_used: u32,
}

/// Drives one agent through its round loop.
pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop").finish_non_exhaustive()
    }
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Run `config`'s agent to completion: LLM call, tool dispatch
    /// (sequential then parallel, preserving call order on reassembly),
    /// repeat until the model stops calling tools or a bound is hit.
    pub async fn run(
        &self,
        config: &AgentConfig,
        catalog: &ToolCatalog,
        tools: &HashMap<String, Arc<dyn Tool>>,
        initial_message: impl Into<String>,
        ctx: LoopContext,
    ) -> Result<LoopOutcome> {
        let mut messages = vec![
            Message::system(config.system_prompt.clone()),
            Message::user(initial_message.into()),
        ];
        let mut scratchpad = Map::new();
        let mut total_usage = TokenUsage::default();
        let mut rounds_used = 0u32;

        let tool_defs = Self::build_tool_defs(catalog, &config.allowed_tools);

        let overall_timeout = Duration::from_millis(config.overall_timeout_ms);
        let round_result = tokio::time::timeout(overall_timeout, async {
            loop {
                if ctx.cancel.is_cancelled() {
                    return Err(Error::cancelled(format!(
                        "agent loop for '{}' cancelled",
                        config.name
                    )));
                }
                if rounds_used >= config.max_rounds {
                    break;
                }
                if let Some(cap) = config.loop_max_tokens {
                    if total_usage.input_tokens + total_usage.output_tokens >= cap {
                        break;
                    }
                }
                rounds_used += 1;

                let completion = self
                    .call_llm_with_round_timeout(config, &messages, &tool_defs)
                    .await?;

                total_usage.input_tokens += completion.usage.input_tokens;
                total_usage.output_tokens += completion.usage.output_tokens;
                ctx.record_usage(completion.usage.input_tokens, completion.usage.output_tokens);

                if completion.tool_calls.is_empty() {
                    scratchpad.insert("_final_text".to_string(), Value::String(completion.content.clone()));
                    messages.push(Message::assistant(completion.content));
                    break;
                }

                messages.push(Message::assistant_with_tool_calls(
                    completion.content.clone(),
                    completion.tool_calls.clone(),
                ));

                let results = self
                    .dispatch_round(tools, &completion.tool_calls, &config.parallel_safe_tools, &ctx)
                    .await;

                for result in &results {
                    messages.push(Message::tool_result(result.call_id.clone(), result.content.clone()));
                }
            }
            Ok(())
        })
        .await;

        match round_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::timeout(format!(
                    "agent '{}' exceeded overall_timeout_ms={}",
                    config.name, config.overall_timeout_ms
                )))
            }
        }

        Ok(LoopOutcome {
            scratchpad,
            messages_out: messages,
            usage: total_usage,
            rounds_used,
        })
    }

    async fn call_llm_with_round_timeout(
        &self,
        config: &AgentConfig,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
    ) -> Result<Completion> {
        let round_timeout = Duration::from_millis(config.round_timeout_ms);
        match tokio::time::timeout(
            round_timeout,
            self.llm.complete(config.model_tier, messages, tool_defs),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "agent '{}' round exceeded round_timeout_ms={}",
                config.name, config.round_timeout_ms
            ))),
        }
    }

    /// Partition `calls` into sequential/parallel by `parallel_safe`,
    /// execute sequential calls first in order, then the parallel calls
    /// concurrently (all-settled), then reassemble results in the
    /// original call order.
    async fn dispatch_round(
        &self,
        tools: &HashMap<String, Arc<dyn Tool>>,
        calls: &[NativeToolCall],
        parallel_safe: &std::collections::HashSet<String>,
        ctx: &LoopContext,
    ) -> Vec<ToolResult> {
        let mut slots: Vec<Option<ToolResult>> = (0..calls.len()).map(|_| None).collect();

        let sequential_idxs: Vec<usize> = (0..calls.len())
            .filter(|i| !parallel_safe.contains(&calls[*i].name))
            .collect();
        let parallel_idxs: Vec<usize> = (0..calls.len())
            .filter(|i| parallel_safe.contains(&calls[*i].name))
            .collect();

        for i in sequential_idxs {
            slots[i] = Some(Self::execute_one(tools, &calls[i], ctx).await);
        }

        if !parallel_idxs.is_empty() {
            let futures = parallel_idxs.iter().map(|&i| {
                let call = calls[i].clone();
                async move { (i, Self::execute_one(tools, &call, ctx).await) }
            });
            for (i, result) in join_all(futures).await {
                slots[i] = Some(result);
            }
        }

        slots.into_iter().map(|s| s.expect("every index assigned")).collect()
    }

    /// Execute a single tool call, non-fatally: an unknown tool name, a
    /// thrown error, or a panic all become an error result block rather
    /// than aborting the round.
    async fn execute_one(
        tools: &HashMap<String, Arc<dyn Tool>>,
        call: &NativeToolCall,
        ctx: &LoopContext,
    ) -> ToolResult {
        if ctx.cancel.is_cancelled() {
            return ToolResult::error(call.id.clone(), call.name.clone(), "cancelled");
        }

        let Some(tool) = tools.get(&call.name) else {
            return ToolResult::unknown_tool(call.id.clone(), call.name.clone());
        };

        let tool = Arc::clone(tool);
        let params = call.arguments.clone();
        let name_for_recovery = call.name.clone();

        let outcome = with_recovery_async(
            move || {
                let tool = Arc::clone(&tool);
                async move { tool.execute(params).await }
            },
            &name_for_recovery,
        )
        .await;

        match outcome {
            Ok(value) => ToolResult::ok(call.id.clone(), call.name.clone(), value.to_string()),
            Err(e) => ToolResult::error(call.id.clone(), call.name.clone(), e.to_string()),
        }
    }

    fn build_tool_defs(catalog: &ToolCatalog, allowed: &[String]) -> Vec<ToolDefinition> {
        allowed
            .iter()
            .filter_map(|id| catalog.get(id))
            .map(|entry| ToolDefinition {
                name: entry.id.clone(),
                description: entry.description.clone(),
                parameters_schema: schema_from_params(entry),
            })
            .collect()
    }
}

fn schema_from_params(entry: &crate::agent::tool::ToolEntry) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for p in &entry.parameters {
        properties.insert(
            p.name.clone(),
            serde_json::json!({ "type": p.param_type.display_name(), "description": p.description }),
        );
        if p.is_required() {
            required.push(Value::String(p.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{ModelTier, Role};
    use crate::agent::tool::ToolEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ScriptedLlm {
        rounds: StdMutex<Vec<Completion>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn model_name(&self, _tier: ModelTier) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _tier: ModelTier,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<Completion> {
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

    struct EchoTool {
        name: String,
        fails: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, params: Value) -> Result<Value> {
            if self.fails {
                return Err(Error::tool_error("boom"));
            }
            Ok(params)
        }
    }

    fn sample_config() -> AgentConfig {
        AgentConfig {
            name: "craftsman".to_string(),
            domain: "craftsman".to_string(),
            model_tier: ModelTier::Mid,
            system_prompt: "You write resumes.".to_string(),
            allowed_tools: vec!["a".to_string(), "b".to_string()],
            max_rounds: 8,
            round_timeout_ms: 30_000,
            overall_timeout_ms: 120_000,
            parallel_safe_tools: ["a".to_string(), "b".to_string()].into_iter().collect(),
            loop_max_tokens: None,
        }
    }

    fn catalog_with(ids: &[&str]) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        for id in ids {
            catalog
                .register(ToolEntry {
                    id: id.to_string(),
                    description: "test tool".to_string(),
                    parameters: vec![],
                    parallel_safe: true,
                })
                .unwrap();
        }
        catalog
    }

    #[tokio::test]
    async fn terminates_on_no_tool_calls() {
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(vec![]),
        });
        let agent_loop = AgentLoop::new(llm);
        let catalog = catalog_with(&["a"]);
        let tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();

        let outcome = agent_loop
            .run(
                &sample_config(),
                &catalog,
                &tools,
                "hello",
                LoopContext::new(CancellationToken::new()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.rounds_used, 1);
        assert_eq!(
            outcome.scratchpad.get("_final_text").and_then(|v| v.as_str()),
            Some("done")
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_non_fatal() {
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(vec![Completion {
                content: String::new(),
                tool_calls: vec![NativeToolCall {
                    id: "c1".to_string(),
                    name: "nonexistent".to_string(),
                    arguments: serde_json::json!({}),
                }],
                usage: TokenUsage::default(),
            }]),
        });
        let agent_loop = AgentLoop::new(llm);
        let catalog = catalog_with(&["a"]);
        let tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();

        let outcome = agent_loop
            .run(
                &sample_config(),
                &catalog,
                &tools,
                "hello",
                LoopContext::new(CancellationToken::new()),
            )
            .await
            .unwrap();

        // Loop continued past the unknown-tool error into a second round.
        assert_eq!(outcome.rounds_used, 2);
        let tool_result_msg = outcome
            .messages_out
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(tool_result_msg.content.contains("Unknown tool: nonexistent"));
    }

    #[tokio::test]
    async fn parallel_failure_does_not_cancel_siblings_and_preserves_order() {
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(vec![Completion {
                content: String::new(),
                tool_calls: vec![
                    NativeToolCall {
                        id: "c1".to_string(),
                        name: "a".to_string(),
                        arguments: serde_json::json!({"v": "boom"}),
                    },
                    NativeToolCall {
                        id: "c2".to_string(),
                        name: "b".to_string(),
                        arguments: serde_json::json!({"v": "ok"}),
                    },
                ],
                usage: TokenUsage::default(),
            }]),
        });
        let agent_loop = AgentLoop::new(llm);
        let catalog = catalog_with(&["a", "b"]);
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert(
            "a".to_string(),
            Arc::new(EchoTool {
                name: "a".to_string(),
                fails: true,
            }),
        );
        tools.insert(
            "b".to_string(),
            Arc::new(EchoTool {
                name: "b".to_string(),
                fails: false,
            }),
        );

        let outcome = agent_loop
            .run(
                &sample_config(),
                &catalog,
                &tools,
                "hello",
                LoopContext::new(CancellationToken::new()),
            )
            .await
            .unwrap();

        let tool_msgs: Vec<&Message> = outcome
            .messages_out
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_msgs.len(), 2);
        assert!(tool_msgs[0].content.contains("boom"));
        assert!(tool_msgs[1].content.contains("ok"));
    }

    #[tokio::test]
    async fn max_rounds_stops_the_loop() {
        let mut rounds = Vec::new();
        for _ in 0..10 {
            rounds.push(Completion {
                content: String::new(),
                tool_calls: vec![NativeToolCall {
                    id: "c".to_string(),
                    name: "a".to_string(),
                    arguments: serde_json::json!({}),
                }],
                usage: TokenUsage::default(),
            });
        }
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(rounds),
        });
        let agent_loop = AgentLoop::new(llm);
        let catalog = catalog_with(&["a"]);
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert(
            "a".to_string(),
            Arc::new(EchoTool {
                name: "a".to_string(),
                fails: false,
            }),
        );

        let mut config = sample_config();
        config.max_rounds = 3;

        let outcome = agent_loop
            .run(
                &config,
                &catalog,
                &tools,
                "hello",
                LoopContext::new(CancellationToken::new()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.rounds_used, 3);
    }

    #[tokio::test]
    async fn usage_recorder_invoked_per_round() {
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(vec![Completion {
                content: "done".to_string(),
                tool_calls: vec![],
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            }]),
        });
        let agent_loop = AgentLoop::new(llm);
        let catalog = catalog_with(&["a"]);
        let tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();

        let total_in = Arc::new(AtomicU32::new(0));
        let total_out = Arc::new(AtomicU32::new(0));
        let (ti, to) = (total_in.clone(), total_out.clone());
        let ctx = LoopContext::new(CancellationToken::new()).with_usage_recorder(Arc::new(move |i, o| {
            ti.fetch_add(i as u32, Ordering::SeqCst);
            to.fetch_add(o as u32, Ordering::SeqCst);
        }));

        agent_loop
            .run(&sample_config(), &catalog, &tools, "hello", ctx)
            .await
            .unwrap();

        assert_eq!(total_in.load(Ordering::SeqCst), 10);
        assert_eq!(total_out.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let mut rounds = Vec::new();
        for _ in 0..5 {
            rounds.push(Completion {
                content: String::new(),
                tool_calls: vec![NativeToolCall {
                    id: "c".to_string(),
                    name: "a".to_string(),
                    arguments: serde_json::json!({}),
                }],
                usage: TokenUsage::default(),
            });
        }
        let llm = Arc::new(ScriptedLlm {
            rounds: StdMutex::new(rounds),
        });
        let agent_loop = AgentLoop::new(llm);
        let catalog = catalog_with(&["a"]);
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        tools.insert(
            "a".to_string(),
            Arc::new(EchoTool {
                name: "a".to_string(),
                fails: false,
            }),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = agent_loop
            .run(&sample_config(), &catalog, &tools, "hello", LoopContext::new(cancel))
            .await;

        assert!(result.is_err());
    }
}
