//! Tool metadata, parameter validation, and access control for the agent
//! loop.
//!
//! Metadata only — the `Tool` trait below owns execution; `ToolCatalog` owns
//! the typed description a tool advertises to an LLM and to the loop's
//! sequential/parallel partitioning step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::types::{Error, Result};

/// Parameter type for tool inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    StringList,
    Enum(Vec<String>),
    Optional(Box<ParamType>),
}

impl ParamType {
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        match self {
            ParamType::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("expected string, got {}", value_type_name(value)))
                }
            }
            ParamType::Int => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(format!("expected integer, got {}", value_type_name(value)))
                }
            }
            ParamType::Float => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(format!("expected number, got {}", value_type_name(value)))
                }
            }
            ParamType::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("expected boolean, got {}", value_type_name(value)))
                }
            }
            ParamType::StringList => {
                if let Some(arr) = value.as_array() {
                    for (i, item) in arr.iter().enumerate() {
                        if !item.is_string() {
                            return Err(format!(
                                "expected string at index {}, got {}",
                                i,
                                value_type_name(item)
                            ));
                        }
                    }
                    Ok(())
                } else {
                    Err(format!("expected array, got {}", value_type_name(value)))
                }
            }
            ParamType::Enum(variants) => {
                if let Some(s) = value.as_str() {
                    if variants.iter().any(|v| v == s) {
                        Ok(())
                    } else {
                        Err(format!(
                            "invalid enum value '{}', expected one of: {}",
                            s,
                            variants.join(", ")
                        ))
                    }
                } else {
                    Err(format!("expected string for enum, got {}", value_type_name(value)))
                }
            }
            ParamType::Optional(inner) => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate(value)
                }
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Float => "number".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::StringList => "string[]".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
            ParamType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.param_type, ParamType::Optional(_))
    }
}

/// Tool metadata entry. `parallel_safe` decides which side of the
/// agent loop's sequential/parallel partition a call
/// lands on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    pub id: String,
    pub description: String,
    pub parameters: Vec<ParamDef>,
    pub parallel_safe: bool,
}

impl ToolEntry {
    /// `- tool_id(param1: type, param2?: type): description`
    pub fn to_prompt_line(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                let optional = if p.is_required() { "" } else { "?" };
                format!("{}{}: {}", p.name, optional, p.param_type.display_name())
            })
            .collect();

        format!("- {}({}): {}", self.id, params.join(", "), self.description)
    }
}

/// In-memory tool catalog. Owns metadata, not implementations.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: HashMap<String, ToolEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, entry: ToolEntry) -> Result<()> {
        if entry.id.is_empty() {
            return Err(Error::validation("tool id cannot be empty"));
        }
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    pub fn get(&self, tool_id: &str) -> Option<&ToolEntry> {
        self.entries.get(tool_id)
    }

    pub fn has_tool(&self, tool_id: &str) -> bool {
        self.entries.contains_key(tool_id)
    }

    /// Names of tools flagged `parallel_safe`.
    pub fn parallel_safe_names(&self) -> HashSet<String> {
        self.entries
            .values()
            .filter(|e| e.parallel_safe)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn list_entries(&self) -> Vec<&ToolEntry> {
        let mut entries: Vec<&ToolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    pub fn validate_params(&self, tool_id: &str, params: &Value) -> Result<Vec<String>> {
        let entry = self
            .entries
            .get(tool_id)
            .ok_or_else(|| Error::not_found(format!("unknown tool: {}", tool_id)))?;

        let param_map = params
            .as_object()
            .ok_or_else(|| Error::validation("parameters must be a JSON object"))?;

        let mut errors = Vec::new();

        for param_def in &entry.parameters {
            if param_def.is_required() && !param_map.contains_key(&param_def.name) {
                errors.push(format!("missing required parameter: {}", param_def.name));
            }
        }

        let known_names: HashMap<&str, &ParamDef> = entry
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();

        for (key, value) in param_map {
            if let Some(param_def) = known_names.get(key.as_str()) {
                if let Err(e) = param_def.param_type.validate(value) {
                    errors.push(format!("parameter '{}': {}", key, e));
                }
            } else {
                errors.push(format!("unknown parameter: {}", key));
            }
        }

        Ok(errors)
    }

    pub fn generate_prompt(&self, allowed_tools: Option<&[String]>) -> String {
        let entries: Vec<&ToolEntry> = if let Some(allowed) = allowed_tools {
            allowed.iter().filter_map(|id| self.entries.get(id)).collect()
        } else {
            self.list_entries()
        };

        if entries.is_empty() {
            return String::new();
        }

        let mut lines = Vec::with_capacity(entries.len() + 1);
        lines.push("Available tools:".to_string());
        for entry in entries {
            lines.push(entry.to_prompt_line());
        }
        lines.join("\n")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Agent → tool access policy. An agent with no grants has access to
/// nothing (fails closed).
#[derive(Debug, Default)]
pub struct ToolAccessPolicy {
    grants: HashMap<String, HashSet<String>>,
}

impl ToolAccessPolicy {
    pub fn new() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    pub fn grant(&mut self, agent_name: &str, tool_id: &str) {
        self.grants
            .entry(agent_name.to_string())
            .or_default()
            .insert(tool_id.to_string());
    }

    pub fn grant_many(&mut self, agent_name: &str, tool_ids: &[String]) {
        let set = self.grants.entry(agent_name.to_string()).or_default();
        for id in tool_ids {
            set.insert(id.clone());
        }
    }

    pub fn check_access(&self, agent_name: &str, tool_id: &str) -> bool {
        self.grants
            .get(agent_name)
            .is_some_and(|set| set.contains(tool_id))
    }

    pub fn tools_for_agent(&self, agent_name: &str) -> Vec<String> {
        self.grants
            .get(agent_name)
            .map(|set| {
                let mut ids: Vec<String> = set.iter().cloned().collect();
                ids.sort();
                ids
            })
            .unwrap_or_default()
    }
}

/// Outcome of one tool invocation, reassembled into the loop's result list
/// in original call order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error: true,
        }
    }

    /// The loop's synthesized block for a call naming a tool the agent was
    /// never registered against. Non-fatal.
    pub fn unknown_tool(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        let tool_name = tool_name.into();
        Self::error(call_id, tool_name.clone(), format!("Unknown tool: {}", tool_name))
    }
}

/// A tool implementation. Metadata lives separately in `ToolCatalog`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, params: Value) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> ToolEntry {
        ToolEntry {
            id: "search_evidence".to_string(),
            description: "Search the master resume for relevant evidence".to_string(),
            parameters: vec![
                ParamDef {
                    name: "query".to_string(),
                    param_type: ParamType::String,
                    description: "Search query".to_string(),
                    default: None,
                },
                ParamDef {
                    name: "max_results".to_string(),
                    param_type: ParamType::Optional(Box::new(ParamType::Int)),
                    description: "Maximum results".to_string(),
                    default: Some(serde_json::json!(10)),
                },
            ],
            parallel_safe: true,
        }
    }

    #[test]
    fn register_and_get() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_entry()).unwrap();
        assert!(catalog.has_tool("search_evidence"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn validate_params_missing_required() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_entry()).unwrap();
        let errors = catalog
            .validate_params("search_evidence", &serde_json::json!({}))
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing required parameter: query"));
    }

    #[test]
    fn parallel_safe_names_filters() {
        let mut catalog = ToolCatalog::new();
        catalog.register(sample_entry()).unwrap();
        catalog
            .register(ToolEntry {
                id: "write_section".to_string(),
                description: "Write a resume section".to_string(),
                parameters: vec![],
                parallel_safe: false,
            })
            .unwrap();

        let safe = catalog.parallel_safe_names();
        assert!(safe.contains("search_evidence"));
        assert!(!safe.contains("write_section"));
    }

    #[test]
    fn access_policy_fails_closed() {
        let policy = ToolAccessPolicy::new();
        assert!(!policy.check_access("strategist", "search_evidence"));
    }

    #[test]
    fn access_policy_grant_and_check() {
        let mut policy = ToolAccessPolicy::new();
        policy.grant("strategist", "search_evidence");
        assert!(policy.check_access("strategist", "search_evidence"));
        assert!(!policy.check_access("craftsman", "search_evidence"));
    }

    #[test]
    fn unknown_tool_result_is_error() {
        let result = ToolResult::unknown_tool("call1", "delete_everything");
        assert!(result.is_error);
        assert_eq!(result.content, "Unknown tool: delete_everything");
    }
}
