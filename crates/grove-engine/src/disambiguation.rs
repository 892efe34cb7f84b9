//! LLM-assisted choice among leaf candidates.
//!
//! The provider sees the branch's system prompt, the candidate leaves, and
//! the query, and answers `{"tool": "<leaf name or path>", "input": {...}}`. Any
//! reply that cannot be mapped back onto a presented candidate degrades to
//! the top-ranked candidate instead of failing the query.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use grove_core::types::{ChatMessage, SelectionMethod};

use crate::selection::LeafCandidate;

/// A parsed provider reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Decision {
    pub tool: String,
    #[serde(default)]
    pub input: Value,
}

/// Outcome of disambiguation.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Position in the candidate list.
    pub index: usize,
    /// Structured arguments from the reply (empty on fallback).
    pub args: Map<String, Value>,
    pub method: SelectionMethod,
}

impl Selection {
    fn fallback(reason: String) -> Self {
        Self {
            index: 0,
            args: Map::new(),
            method: SelectionMethod::Fallback { reason },
        }
    }
}

/// Build the disambiguation request.
pub fn build_messages(
    branch: &str,
    system_prompt: &str,
    candidates: &[LeafCandidate],
    query: &str,
) -> Vec<ChatMessage> {
    let tools = candidates
        .iter()
        .map(|c| {
            if c.parameters.is_empty() {
                format!("- {} [{}]: {}", c.name, c.path, c.description)
            } else {
                format!(
                    "- {} [{}]: {} (parameters: {})",
                    c.name, c.path, c.description, c.parameters
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        r#"You are an AI agent in the {branch} branch.

Available tools:
{tools}

User query: {query}

Select the most appropriate tool and provide the input for it.
If several tools share a name, give the path in brackets as the tool.
Respond with ONLY valid JSON: {{"tool": "tool_name", "input": {{"parameter": "value"}}}}"#,
    );

    let mut messages = Vec::with_capacity(2);
    if !system_prompt.trim().is_empty() {
        messages.push(ChatMessage::system(system_prompt));
    }
    messages.push(ChatMessage::user(prompt));
    messages
}

fn fence_re() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").ok())
        .as_ref()
}

/// Pull the JSON object out of a reply that may carry code fences or prose.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = fence_re()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);

    match (inner.find('{'), inner.rfind('}')) {
        (Some(start), Some(end)) if start < end => &inner[start..=end],
        _ => inner,
    }
}

pub fn parse_decision(reply: &str) -> std::result::Result<Decision, String> {
    let decision: Decision =
        serde_json::from_str(extract_json(reply)).map_err(|e| format!("unparsable reply: {}", e))?;
    if decision.tool.trim().is_empty() {
        return Err("reply names no tool".into());
    }
    Ok(decision)
}

/// Map a provider reply (or request failure) onto a candidate.
pub fn resolve(
    reply: std::result::Result<String, String>,
    candidates: &[LeafCandidate],
    provider: &str,
) -> Selection {
    let reply = match reply {
        Ok(reply) => reply,
        Err(e) => return Selection::fallback(format!("provider request failed: {}", e)),
    };

    let decision = match parse_decision(&reply) {
        Ok(d) => d,
        Err(reason) => {
            warn!(provider, reply = %reply, "Could not parse disambiguation reply");
            return Selection::fallback(reason);
        }
    };

    let wanted = decision.tool.trim();
    let index = candidates
        .iter()
        .position(|c| c.path == wanted)
        .or_else(|| candidates.iter().position(|c| c.name == wanted));

    match index {
        Some(index) => Selection {
            index,
            args: match decision.input {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            method: SelectionMethod::Model {
                provider: provider.to_string(),
            },
        },
        None => Selection::fallback(format!("'{}' was not among the candidates", wanted)),
    }
}
