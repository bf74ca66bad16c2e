//! The agent subsystem: LLM client abstraction, tool metadata/access,
//! the static agent registry, and the round-based agent loop.

pub mod llm;
pub mod loop_runner;
pub mod registry;
pub mod tool;

pub use llm::{Completion, GenAiClient, LlmClient, Message, ModelTier, NativeToolCall, Role, ToolDefinition};
pub use loop_runner::{AgentLoop, LoopContext, LoopOutcome};
pub use registry::{AgentConfig, AgentRegistry};
pub use tool::{ParamDef, ParamType, Tool, ToolAccessPolicy, ToolCatalog, ToolEntry, ToolResult};
