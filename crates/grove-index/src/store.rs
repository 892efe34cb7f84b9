use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use grove_core::error::{GroveError, Result};
use grove_core::index::{rank_hits, IndexStats, ScopeFilter, ScoredHit, SimilarityIndex};
use grove_core::types::NodeId;

use crate::embeddings::{cosine_similarity, EmbeddingProvider};

struct Entry {
    seq: u64,
    text: String,
    vector: Vec<f32>,
    metadata: Map<String, Value>,
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<NodeId, Entry>,
    next_seq: u64,
}

/// In-memory vector index over node text.
///
/// Embeddings are computed outside the lock; the insert itself happens under
/// a single write guard, so readers see either the old entry or the new one.
pub struct EmbeddingIndex<E: EmbeddingProvider> {
    embedder: Arc<E>,
    entries: RwLock<Entries>,
}

impl<E: EmbeddingProvider> EmbeddingIndex<E> {
    pub fn new(embedder: E) -> Self {
        Self::with_shared(Arc::new(embedder))
    }

    pub fn with_shared(embedder: Arc<E>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Stored text for `id`, if indexed.
    pub async fn text_of(&self, id: &NodeId) -> Option<String> {
        self.entries.read().await.by_id.get(id).map(|e| e.text.clone())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| GroveError::Index("embedder returned no vector".into()))?;
        let dims = self.embedder.dimensions();
        if vector.len() != dims {
            return Err(GroveError::Index(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                dims
            )));
        }
        Ok(vector)
    }
}

impl<E: EmbeddingProvider> SimilarityIndex for EmbeddingIndex<E> {
    fn index(
        &self,
        id: NodeId,
        text: String,
        metadata: Map<String, Value>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let vector = self.embed_one(&text).await?;

            let mut entries = self.entries.write().await;
            let existing = entries.by_id.get(&id).map(|e| e.seq);
            let seq = match existing {
                Some(seq) => seq,
                None => {
                    let seq = entries.next_seq;
                    entries.next_seq += 1;
                    seq
                }
            };
            debug!(node = %id, seq, "Indexed entry");
            entries.by_id.insert(
                id,
                Entry {
                    seq,
                    text,
                    vector,
                    metadata,
                },
            );
            Ok(())
        })
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        k: usize,
        scope: Option<&'a ScopeFilter>,
    ) -> BoxFuture<'a, Result<Vec<ScoredHit>>> {
        Box::pin(async move {
            if k == 0 {
                return Ok(vec![]);
            }
            let query_vec = self.embed_one(query).await?;

            let entries = self.entries.read().await;
            let scored = entries
                .by_id
                .iter()
                .filter(|(_, e)| scope.map_or(true, |s| s.matches(&e.metadata)))
                .map(|(id, e)| {
                    (
                        e.seq,
                        ScoredHit {
                            id: id.clone(),
                            score: cosine_similarity(&query_vec, &e.vector),
                            metadata: e.metadata.clone(),
                        },
                    )
                })
                .collect();
            Ok(rank_hits(scored, k))
        })
    }

    fn remove(&self, id: &NodeId) -> BoxFuture<'_, Result<bool>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.entries.write().await.by_id.remove(&id).is_some()) })
    }

    fn len(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move { self.entries.read().await.by_id.len() })
    }

    fn stats(&self) -> BoxFuture<'_, IndexStats> {
        Box::pin(async move {
            IndexStats {
                total_entries: self.entries.read().await.by_id.len(),
                backend: format!("{}:{}", self.embedder.name(), self.embedder.dimensions()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use serde_json::json;

    fn meta(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn index() -> EmbeddingIndex<HashingEmbedder> {
        EmbeddingIndex::new(HashingEmbedder::new(128))
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let idx = index();
        idx.index(NodeId::from("add"), "add two numbers".into(), Map::new()).await.unwrap();
        idx.index(NodeId::from("translate"), "translate text to french".into(), Map::new())
            .await
            .unwrap();

        let hits = idx.search("please add these numbers", 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id.as_str(), "add");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_identical_text_ties_by_registration() {
        let idx = index();
        for id in ["second", "first", "third"] {
            idx.index(NodeId::from(id), "same description".into(), Map::new())
                .await
                .unwrap();
        }
        let hits = idx.search("same description", 3, None).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first", "third"]);
    }

    #[tokio::test]
    async fn test_reindex_replaces_and_keeps_position() {
        let idx = index();
        idx.index(NodeId::from("a"), "alpha".into(), Map::new()).await.unwrap();
        idx.index(NodeId::from("b"), "beta".into(), Map::new()).await.unwrap();
        idx.index(NodeId::from("a"), "beta".into(), Map::new()).await.unwrap();

        assert_eq!(idx.len().await, 2);
        assert_eq!(idx.text_of(&NodeId::from("a")).await.as_deref(), Some("beta"));
        let hits = idx.search("beta", 2, None).await.unwrap();
        assert_eq!(hits[0].id.as_str(), "a");
        assert_eq!(hits[1].id.as_str(), "b");
    }

    #[tokio::test]
    async fn test_scope_and_k() {
        let idx = index();
        idx.index(
            NodeId::from("leaf1"),
            "add numbers".into(),
            meta(json!({"kind": "leaf", "ancestors": ["math"]})),
        )
        .await
        .unwrap();
        idx.index(
            NodeId::from("leaf2"),
            "add words".into(),
            meta(json!({"kind": "leaf", "ancestors": ["text"]})),
        )
        .await
        .unwrap();
        idx.index(
            NodeId::from("math"),
            "add numbers arithmetic".into(),
            meta(json!({"kind": "branch", "ancestors": []})),
        )
        .await
        .unwrap();

        let scope = ScopeFilter::new().contains("ancestors", "math").eq("kind", "leaf");
        let hits = idx.search("add", 10, Some(&scope)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "leaf1");

        assert_eq!(idx.search("add", 2, None).await.unwrap().len(), 2);
        assert!(idx.search("add", 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_stats() {
        let idx = index();
        idx.index(NodeId::from("a"), "alpha".into(), Map::new()).await.unwrap();
        assert!(idx.remove(&NodeId::from("a")).await.unwrap());
        assert!(!idx.remove(&NodeId::from("a")).await.unwrap());
        let stats = idx.stats().await;
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.backend, "hashing:128");
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        assert!(index().search("anything", 5, None).await.unwrap().is_empty());
    }
}
