//! LLM client abstraction used by the agent loop.
//!
//! Provider-agnostic `Message`/`Role`/`ToolDefinition`/`TokenUsage` shapes
//! sitting on top of `genai`, which already speaks to every provider the
//! three agents might be routed to (light/mid/primary model tiers).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single native tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema handed to the model alongside a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<NativeToolCall>,
    /// Set only on `Role::Tool` messages, correlating with the
    /// `NativeToolCall::id` it answers.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// An assistant turn that requested tool calls — recorded in the
    /// transcript so the next round's LLM call sees what it already asked
    /// for — tool results are fed back alongside the calls that produced
    /// them.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<NativeToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One round's completion: assistant text plus any tool calls requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<NativeToolCall>,
    pub usage: TokenUsage,
}

/// Model tier an agent call is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Light,
    Mid,
    Primary,
}

/// Provider abstraction. Implementations translate `Message`/`ToolDefinition`
/// into a concrete provider's wire format.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self, tier: ModelTier) -> &str;

    async fn complete(
        &self,
        tier: ModelTier,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion>;
}

/// `genai`-backed client. Holds one `genai::Client` and a model name per
/// tier; construction is infallible, the client resolves credentials lazily
/// per-call the way `genai` is designed to.
pub struct GenAiClient {
    client: genai::Client,
    light_model: String,
    mid_model: String,
    primary_model: String,
}

impl std::fmt::Debug for GenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAiClient")
            .field("light_model", &self.light_model)
            .field("mid_model", &self.mid_model)
            .field("primary_model", &self.primary_model)
            .finish()
    }
}

impl GenAiClient {
    pub fn new(light_model: impl Into<String>, mid_model: impl Into<String>, primary_model: impl Into<String>) -> Self {
        Self {
            client: genai::Client::default(),
            light_model: light_model.into(),
            mid_model: mid_model.into(),
            primary_model: primary_model.into(),
        }
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Light => &self.light_model,
            ModelTier::Mid => &self.mid_model,
            ModelTier::Primary => &self.primary_model,
        }
    }

    fn to_genai_messages(messages: &[Message]) -> Vec<genai::chat::ChatMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => genai::chat::ChatMessage::system(m.content.clone()),
                Role::User => genai::chat::ChatMessage::user(m.content.clone()),
                Role::Assistant => genai::chat::ChatMessage::assistant(m.content.clone()),
                // genai has no first-class tool-role message; fold the tool
                // result back in as a user turn so the transcript stays
                // linear for providers without native tool-result framing.
                Role::Tool => genai::chat::ChatMessage::user(format!(
                    "[tool result {}]: {}",
                    m.tool_call_id.as_deref().unwrap_or("?"),
                    m.content
                )),
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for GenAiClient {
    fn model_name(&self, tier: ModelTier) -> &str {
        self.model_for(tier)
    }

    async fn complete(
        &self,
        tier: ModelTier,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Completion> {
        let model = self.model_for(tier).to_string();
        let mut chat_req = genai::chat::ChatRequest::new(Self::to_genai_messages(messages));

        for tool in tools {
            chat_req = chat_req.append_tool(genai::chat::Tool::new(tool.name.clone())
                .with_description(tool.description.clone())
                .with_schema(tool.parameters_schema.clone()));
        }

        let response = self
            .client
            .exec_chat(&model, chat_req, None)
            .await
            .map_err(|e| Error::internal(format!("genai chat request failed: {}", e)))?;

        let content = response.first_text().unwrap_or_default().to_string();

        let tool_calls = response
            .tool_calls()
            .into_iter()
            .map(|tc| NativeToolCall {
                id: tc.call_id.clone(),
                name: tc.fn_name.clone(),
                arguments: tc.fn_arguments.clone(),
            })
            .collect();

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens.unwrap_or(0) as u64,
                output_tokens: u.completion_tokens.unwrap_or(0) as u64,
            })
            .unwrap_or_default();

        Ok(Completion {
            content,
            tool_calls,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_expected_roles() {
        assert_eq!(Message::system("x").role, Role::System);
        assert_eq!(Message::user("x").role, Role::User);
        let tool_msg = Message::tool_result("call1", "result");
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call1"));
    }
}
