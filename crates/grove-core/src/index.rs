use std::cmp::Ordering;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::NodeId;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    pub id: NodeId,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

/// A metadata condition applied before ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// `metadata[key] == value`
    Eq { key: String, value: Value },
    /// `metadata[key]` is an array containing `value`.
    Contains { key: String, value: Value },
}

/// Conjunction of metadata conditions restricting a search scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeFilter {
    pub conditions: Vec<Condition>,
}

impl ScopeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn contains(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Contains {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|c| match c {
            Condition::Eq { key, value } => metadata.get(key) == Some(value),
            Condition::Contains { key, value } => metadata
                .get(key)
                .and_then(|v| v.as_array())
                .map(|arr| arr.contains(value))
                .unwrap_or(false),
        })
    }
}

/// Summary counters for an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_entries: usize,
    pub backend: String,
}

/// Embedding-backed nearest-neighbour search over node text.
///
/// Implementations must serialize writers: a concurrent reader may never
/// observe a partially replaced entry.
pub trait SimilarityIndex: Send + Sync + 'static {
    /// Register or replace the entry for `id`.
    ///
    /// A replaced entry keeps its original registration position.
    fn index(
        &self,
        id: NodeId,
        text: String,
        metadata: Map<String, Value>,
    ) -> BoxFuture<'_, Result<()>>;

    /// At most `k` hits, descending by score, ties by registration order.
    fn search<'a>(
        &'a self,
        query: &'a str,
        k: usize,
        scope: Option<&'a ScopeFilter>,
    ) -> BoxFuture<'a, Result<Vec<ScoredHit>>>;

    /// Drop the entry for `id`. Returns whether one existed.
    fn remove(&self, id: &NodeId) -> BoxFuture<'_, Result<bool>>;

    /// Number of registered entries.
    fn len(&self) -> BoxFuture<'_, usize>;

    fn stats(&self) -> BoxFuture<'_, IndexStats>;
}

/// Sort `(registration_seq, hit)` pairs into the search contract order and
/// keep the first `k`.
pub fn rank_hits(mut scored: Vec<(u64, ScoredHit)>, k: usize) -> Vec<ScoredHit> {
    scored.sort_by(|(seq_a, a), (seq_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| seq_a.cmp(seq_b))
    });
    scored.into_iter().take(k).map(|(_, hit)| hit).collect()
}
