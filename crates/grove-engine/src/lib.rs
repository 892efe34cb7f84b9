pub mod disambiguation;
pub mod executor;
pub mod history;
pub mod invoke;
pub mod selection;
pub mod tree;

pub use disambiguation::{Decision, Selection};
pub use executor::ExecutionResult;
pub use history::{HistoryExport, HistoryLog, HistoryRecord};
pub use invoke::WorkerPool;
pub use selection::{BranchCandidate, LeafCandidate};
pub use tree::{SkillCatalog, Tree};
