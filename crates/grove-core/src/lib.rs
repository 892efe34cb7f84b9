pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod node;
pub mod skill;
pub mod traits;
pub mod types;

pub use config::{
    BranchDocument, DocumentFormat, EngineConfig, LeafDocument, ProviderConfig, ProviderKind,
    RetryConfig, RoutePolicy, RoutingConfig, TreeDocument,
};
pub use error::{GroveError, MatchStage, Result};
pub use event::EventBus;
pub use index::{IndexStats, ScopeFilter, ScoredHit, SimilarityIndex};
pub use node::{BranchSpec, LeafSpec, Node, NodeKind, NodeTable};
pub use skill::{ParamSpec, ParameterSchema, Skill, SkillInput, SkillMode, SkillResult};
pub use types::*;
