use std::fmt;

use thiserror::Error;

/// Pipeline stage at which candidate retrieval came up empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStage {
    Branch,
    Leaf,
}

impl fmt::Display for MatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::Leaf => write!(f, "leaf"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GroveError {
    // Routing errors
    #[error("No {stage} candidate above similarity threshold for query: {query}")]
    NoMatch { stage: MatchStage, query: String },

    #[error("Skill execution failed: {leaf}: {message}")]
    SkillExecution { leaf: String, message: String },

    // Provider errors
    #[error("Provider unavailable: {provider}: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("No provider meets constraint: {0}")]
    NoProviderMeetsConstraint(String),

    // Structural errors
    #[error("Duplicate name '{name}' under parent {parent}")]
    DuplicateName { parent: String, name: String },

    #[error("Node already has a parent: {node}")]
    AlreadyParented { node: String },

    #[error("Invalid parent for {child}: {reason}")]
    InvalidParent { child: String, reason: String },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Attaching {child} under {parent} would create a cycle")]
    CycleDetected { parent: String, child: String },

    #[error("Node is registered in the similarity index and cannot be moved: {0}")]
    NodeIndexed(String),

    // Index errors
    #[error("Similarity index error: {0}")]
    Index(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GroveError {
    /// Whether the caller can reasonably retry with a rephrased query.
    pub fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, GroveError>;
