//! Candidate retrieval over the similarity index.

use std::collections::HashSet;

use tracing::debug;

use grove_core::index::{ScopeFilter, ScoredHit};
use grove_core::node::NodeTable;
use grove_core::types::NodeId;

/// A top-level branch and its aggregated score.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchCandidate {
    pub id: NodeId,
    pub name: String,
    pub score: f32,
}

/// A leaf presented for disambiguation.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafCandidate {
    pub id: NodeId,
    pub name: String,
    /// Root-to-leaf path, e.g. `garden/math/add`.
    pub path: String,
    pub description: String,
    pub parameters: String,
    pub score: f32,
}

/// Fold hits onto their top-level branches.
///
/// A branch scores the max over its own entry and every descendant entry.
/// `hits` must already be in search order, so the first hit seen for a
/// branch carries its max and ties keep index order. Hits below `threshold`
/// and entries no longer in the table are dropped.
pub fn aggregate_branches(
    table: &NodeTable,
    hits: &[ScoredHit],
    threshold: f32,
) -> Vec<BranchCandidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for hit in hits.iter().filter(|h| h.score >= threshold) {
        let top = match table.top_level_branch(&hit.id) {
            Ok(Some(top)) => top,
            Ok(None) => continue,
            Err(_) => {
                debug!(node = %hit.id, "Skipping stale index entry");
                continue;
            }
        };
        if !seen.insert(top.clone()) {
            continue;
        }
        if let Ok(node) = table.get(&top) {
            out.push(BranchCandidate {
                id: top,
                name: node.name.clone(),
                score: hit.score,
            });
        }
    }
    out
}

/// Scope restricting a search to leaves anywhere under `branch`.
pub fn leaf_scope(branch: &NodeId) -> ScopeFilter {
    ScopeFilter::new()
        .contains("ancestors", branch.as_str())
        .eq("kind", "leaf")
}

/// Resolve scoped leaf hits to candidates, keeping search order.
pub fn leaf_candidates(table: &NodeTable, hits: &[ScoredHit], threshold: f32) -> Vec<LeafCandidate> {
    hits.iter()
        .filter(|h| h.score >= threshold)
        .filter_map(|h| {
            let node = table.get(&h.id).ok()?;
            let spec = node.as_leaf()?;
            Some(LeafCandidate {
                id: h.id.clone(),
                name: node.name.clone(),
                path: table.path_string(&h.id).ok()?,
                description: spec.description.clone(),
                parameters: spec.schema.render(),
                score: h.score,
            })
        })
        .collect()
}
