//! Hierarchical skill routing.
//!
//! A [`Tree`] holds branches (agents) and leaves (skills). Queries are
//! matched against the leaves through a [`SimilarityIndex`], narrowed to the
//! best top-level branch, disambiguated by a language model chosen through
//! the [`ProviderRouter`], and finally run on the selected leaf's skill.

pub use grove_core::{
    BranchDocument, BranchSpec, DocumentFormat, EngineConfig, EventBus, GroveError, LeafDocument,
    LeafSpec, MatchStage, NodeId, ParamSpec, ParameterSchema, ProviderConfig, ProviderKind, Result,
    RetryConfig, RouteEvent, RoutePolicy, RoutingConfig, ScopeFilter, SelectionMethod,
    SimilarityIndex, Skill, SkillInput, SkillMode, SkillResult, TreeDocument,
};
pub use grove_core::traits::LlmClient;
pub use grove_engine::{ExecutionResult, HistoryExport, HistoryRecord, SkillCatalog, Tree};
pub use grove_index::{EmbeddingIndex, EmbeddingProvider, HashingEmbedder, HttpEmbeddingProvider};
pub use grove_llm::ProviderRouter;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "grove=info,warn";

/// Install a fmt subscriber filtered by `RUST_LOG`, or `default_filter`
/// when the variable is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
