//! Hierarchical node model.
//!
//! Every node lives in a single id-indexed [`NodeTable`]. Parent and child
//! links are stored as ids, so the tree never holds mutual object references.
//! Shared fields sit on [`Node`]; branch- and leaf-specific payloads sit on
//! the [`NodeKind`] variant.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::error::{GroveError, Result};
use crate::skill::{ParameterSchema, Skill, SkillMode};
use crate::types::NodeId;

pub const DEFAULT_BRANCH_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_BRANCH_MAX_TOKENS: u32 = 2000;

/// Agent-level grouping payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchSpec {
    pub description: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl BranchSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            system_prompt: String::new(),
            temperature: DEFAULT_BRANCH_TEMPERATURE,
            max_tokens: DEFAULT_BRANCH_MAX_TOKENS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

impl Default for BranchSpec {
    fn default() -> Self {
        Self::new("")
    }
}

/// Terminal payload wrapping one skill.
#[derive(Debug, Clone)]
pub struct LeafSpec {
    pub description: String,
    pub skill: Skill,
    pub schema: ParameterSchema,
    /// Catalog key used when the tree is saved and reloaded.
    pub skill_ref: String,
}

impl LeafSpec {
    pub fn new(description: impl Into<String>, skill: Skill, schema: ParameterSchema) -> Self {
        Self {
            description: description.into(),
            skill,
            schema,
            skill_ref: String::new(),
        }
    }

    pub fn with_skill_ref(mut self, key: impl Into<String>) -> Self {
        self.skill_ref = key.into();
        self
    }

    pub fn mode(&self) -> SkillMode {
        self.skill.mode()
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Root,
    Branch(BranchSpec),
    Leaf(LeafSpec),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Branch(_) => "branch",
            Self::Leaf(_) => "leaf",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub provider_hint: Option<String>,
    pub metadata: Map<String, Value>,
    pub kind: NodeKind,
}

impl Node {
    fn with_kind(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            parent: None,
            children: vec![],
            provider_hint: None,
            metadata: Map::new(),
            kind,
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self::with_kind(name, NodeKind::Root)
    }

    pub fn branch(name: impl Into<String>, spec: BranchSpec) -> Self {
        Self::with_kind(name, NodeKind::Branch(spec))
    }

    pub fn leaf(name: impl Into<String>, spec: LeafSpec) -> Self {
        Self::with_kind(name, NodeKind::Leaf(spec))
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider_hint = provider;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn description(&self) -> &str {
        match &self.kind {
            NodeKind::Root => "",
            NodeKind::Branch(b) => &b.description,
            NodeKind::Leaf(l) => &l.description,
        }
    }

    pub fn as_branch(&self) -> Option<&BranchSpec> {
        match &self.kind {
            NodeKind::Branch(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafSpec> {
        match &self.kind {
            NodeKind::Leaf(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::Branch(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }
}

/// Id-indexed node arena with one root.
#[derive(Debug, Clone)]
pub struct NodeTable {
    nodes: HashMap<NodeId, Node>,
    order: Vec<NodeId>,
    root: NodeId,
    indexed: HashSet<NodeId>,
}

impl NodeTable {
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = Node::root(root_name);
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);
        Self {
            nodes,
            order: vec![root_id.clone()],
            root: root_id,
            indexed: HashSet::new(),
        }
    }

    pub fn root(&self) -> &NodeId {
        &self.root
    }

    pub fn root_name(&self) -> &str {
        self.nodes
            .get(&self.root)
            .map(|n| n.name.as_str())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| GroveError::UnknownNode(id.to_string()))
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Insert a detached node. It must be attached with [`add_child`](Self::add_child).
    pub fn insert(&mut self, node: Node) -> Result<NodeId> {
        if matches!(node.kind, NodeKind::Root) {
            return Err(GroveError::InvalidParent {
                child: node.name,
                reason: "a table has exactly one root".into(),
            });
        }
        if self.nodes.contains_key(&node.id) {
            return Err(GroveError::Config(format!("duplicate node id: {}", node.id)));
        }
        let id = node.id.clone();
        let mut node = node;
        node.parent = None;
        node.children.clear();
        self.order.push(id.clone());
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Attach `child` under `parent`.
    pub fn add_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<()> {
        let parent_node = self.get(parent)?;
        let child_node = self.get(child)?;

        if child_node.parent.is_some() {
            return Err(GroveError::AlreadyParented {
                node: child_node.name.clone(),
            });
        }

        match (&parent_node.kind, &child_node.kind) {
            (_, NodeKind::Root) => {
                return Err(GroveError::InvalidParent {
                    child: child_node.name.clone(),
                    reason: "the root cannot be attached".into(),
                });
            }
            (NodeKind::Leaf(_), _) => {
                return Err(GroveError::InvalidParent {
                    child: child_node.name.clone(),
                    reason: format!("leaf '{}' cannot have children", parent_node.name),
                });
            }
            (NodeKind::Root, NodeKind::Leaf(_)) => {
                return Err(GroveError::InvalidParent {
                    child: child_node.name.clone(),
                    reason: "leaves must be attached to a branch".into(),
                });
            }
            _ => {}
        }

        if parent == child || self.ancestors(parent)?.contains(child) {
            return Err(GroveError::CycleDetected {
                parent: parent_node.name.clone(),
                child: child_node.name.clone(),
            });
        }

        if self.find_child(parent, &child_node.name).is_some() {
            return Err(GroveError::DuplicateName {
                parent: parent_node.name.clone(),
                name: child_node.name.clone(),
            });
        }

        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(child.clone());
        }
        if let Some(c) = self.nodes.get_mut(child) {
            c.parent = Some(parent.clone());
        }
        Ok(())
    }

    /// Detach `child` from `parent`. Indexed nodes cannot be detached.
    pub fn remove_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<()> {
        let child_node = self.get(child)?;
        if child_node.parent.as_ref() != Some(parent) {
            return Err(GroveError::UnknownNode(format!(
                "{} is not a child of {}",
                child, parent
            )));
        }
        if self.is_indexed(child) {
            return Err(GroveError::NodeIndexed(child_node.name.clone()));
        }
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.retain(|c| c != child);
        }
        if let Some(c) = self.nodes.get_mut(child) {
            c.parent = None;
        }
        Ok(())
    }

    /// Remove a node and its whole subtree from the table.
    ///
    /// Returns the removed ids in pre-order so callers can drop them from the
    /// similarity index.
    pub fn remove_subtree(&mut self, id: &NodeId) -> Result<Vec<NodeId>> {
        if id == &self.root {
            return Err(GroveError::InvalidParent {
                child: self.root_name().to_string(),
                reason: "the root cannot be removed".into(),
            });
        }
        let parent = self.get(id)?.parent.clone();
        let mut removed = vec![id.clone()];
        removed.extend(self.descendants(id)?);

        if let Some(parent) = parent {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|c| c != id);
            }
        }
        for rid in &removed {
            self.nodes.remove(rid);
            self.indexed.remove(rid);
        }
        self.order.retain(|o| !removed.contains(o));
        Ok(removed)
    }

    pub fn mark_indexed(&mut self, id: &NodeId) {
        self.indexed.insert(id.clone());
    }

    pub fn is_indexed(&self, id: &NodeId) -> bool {
        self.indexed.contains(id)
    }

    /// Names from the root down to `id`, root included.
    pub fn get_path(&self, id: &NodeId) -> Result<Vec<String>> {
        let mut path = vec![self.get(id)?.name.clone()];
        for ancestor in self.ancestors(id)? {
            path.push(self.get(&ancestor)?.name.clone());
        }
        path.reverse();
        Ok(path)
    }

    pub fn path_string(&self, id: &NodeId) -> Result<String> {
        Ok(self.get_path(id)?.join("/"))
    }

    /// Number of ancestors (the root has depth 0).
    pub fn get_depth(&self, id: &NodeId) -> Result<usize> {
        Ok(self.ancestors(id)?.len())
    }

    /// Ancestor ids, nearest first.
    pub fn ancestors(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut current = self.get(id)?.parent.clone();
        while let Some(pid) = current {
            if out.contains(&pid) {
                break;
            }
            current = self.get(&pid)?.parent.clone();
            out.push(pid);
        }
        Ok(out)
    }

    /// Descendant ids in pre-order, excluding `id` itself.
    pub fn descendants(&self, id: &NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.get(id)?.children.iter().rev().cloned().collect();
        while let Some(next) = stack.pop() {
            let node = self.get(&next)?;
            stack.extend(node.children.iter().rev().cloned());
            out.push(next);
        }
        Ok(out)
    }

    pub fn children(&self, id: &NodeId) -> Result<Vec<&Node>> {
        self.get(id)?.children.iter().map(|c| self.get(c)).collect()
    }

    pub fn find_child(&self, parent: &NodeId, name: &str) -> Option<&Node> {
        let p = self.nodes.get(parent)?;
        p.children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .find(|c| c.name == name)
    }

    pub fn siblings(&self, id: &NodeId) -> Result<Vec<&Node>> {
        match self.get(id)?.parent {
            Some(ref parent) => Ok(self
                .children(parent)?
                .into_iter()
                .filter(|n| &n.id != id)
                .collect()),
            None => Ok(vec![]),
        }
    }

    pub fn leaves_of(&self, id: &NodeId) -> Result<Vec<&Node>> {
        Ok(self.children(id)?.into_iter().filter(|n| n.is_leaf()).collect())
    }

    pub fn branches_of(&self, id: &NodeId) -> Result<Vec<&Node>> {
        Ok(self.children(id)?.into_iter().filter(|n| n.is_branch()).collect())
    }

    /// The ancestor (or `id` itself) sitting at `depth`, if the node is that deep.
    pub fn ancestor_at_depth(&self, id: &NodeId, depth: usize) -> Result<Option<NodeId>> {
        let mut chain = self.ancestors(id)?;
        chain.reverse();
        chain.push(id.clone());
        Ok(chain.get(depth).cloned())
    }

    /// The top-level branch containing `id` (itself if it is one).
    pub fn top_level_branch(&self, id: &NodeId) -> Result<Option<NodeId>> {
        if id == &self.root {
            return Ok(None);
        }
        let ancestors = self.ancestors(id)?;
        match ancestors.last() {
            Some(last) if last == &self.root => {
                if ancestors.len() == 1 {
                    Ok(Some(id.clone()))
                } else {
                    Ok(Some(ancestors[ancestors.len() - 2].clone()))
                }
            }
            // Detached subtree
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::{ParameterSchema, Skill, SkillResult};

    fn leaf(name: &str) -> Node {
        Node::leaf(
            name,
            LeafSpec::new(
                format!("{} skill", name),
                Skill::blocking(|_| SkillResult::success("ok")),
                ParameterSchema::default(),
            ),
        )
    }

    fn table_with_branch() -> (NodeTable, NodeId) {
        let mut table = NodeTable::new("tree");
        let root = table.root().clone();
        let branch = table.insert(Node::branch("math", BranchSpec::new("arithmetic"))).unwrap();
        table.add_child(&root, &branch).unwrap();
        (table, branch)
    }

    #[test]
    fn test_add_child_links_both_ways() {
        let (mut table, branch) = table_with_branch();
        let add = table.insert(leaf("add")).unwrap();
        table.add_child(&branch, &add).unwrap();

        assert_eq!(table.get(&add).unwrap().parent.as_ref(), Some(&branch));
        assert_eq!(table.get(&branch).unwrap().children, vec![add.clone()]);
        assert_eq!(table.get_path(&add).unwrap(), vec!["tree", "math", "add"]);
        assert_eq!(table.get_depth(&add).unwrap(), 2);
        assert_eq!(table.get_depth(table.root()).unwrap(), 0);
        assert_eq!(table.ancestor_at_depth(&add, 1).unwrap(), Some(branch.clone()));
        assert_eq!(table.ancestor_at_depth(&add, 2).unwrap(), Some(add.clone()));
        assert_eq!(table.ancestor_at_depth(&add, 3).unwrap(), None);
    }

    #[test]
    fn test_duplicate_sibling_name() {
        let (mut table, branch) = table_with_branch();
        let first = table.insert(leaf("add")).unwrap();
        table.add_child(&branch, &first).unwrap();
        let second = table.insert(leaf("add")).unwrap();
        let err = table.add_child(&branch, &second).unwrap_err();
        assert!(matches!(err, GroveError::DuplicateName { .. }));
    }

    #[test]
    fn test_same_name_under_different_parents() {
        let (mut table, math) = table_with_branch();
        let root = table.root().clone();
        let calc = table.insert(Node::branch("calc", BranchSpec::default())).unwrap();
        table.add_child(&root, &calc).unwrap();

        let a = table.insert(leaf("add")).unwrap();
        let b = table.insert(leaf("add")).unwrap();
        table.add_child(&math, &a).unwrap();
        table.add_child(&calc, &b).unwrap();
    }

    #[test]
    fn test_already_parented() {
        let (mut table, branch) = table_with_branch();
        let root = table.root().clone();
        let other = table.insert(Node::branch("other", BranchSpec::default())).unwrap();
        table.add_child(&root, &other).unwrap();

        let add = table.insert(leaf("add")).unwrap();
        table.add_child(&branch, &add).unwrap();
        let err = table.add_child(&other, &add).unwrap_err();
        assert!(matches!(err, GroveError::AlreadyParented { .. }));
    }

    #[test]
    fn test_leaf_under_root_rejected() {
        let mut table = NodeTable::new("tree");
        let root = table.root().clone();
        let add = table.insert(leaf("add")).unwrap();
        let err = table.add_child(&root, &add).unwrap_err();
        assert!(matches!(err, GroveError::InvalidParent { .. }));
    }

    #[test]
    fn test_leaf_under_leaf_rejected() {
        let (mut table, branch) = table_with_branch();
        let add = table.insert(leaf("add")).unwrap();
        table.add_child(&branch, &add).unwrap();
        let sub = table.insert(leaf("sub")).unwrap();
        let err = table.add_child(&add, &sub).unwrap_err();
        assert!(matches!(err, GroveError::InvalidParent { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut table = NodeTable::new("tree");
        let outer = table.insert(Node::branch("outer", BranchSpec::default())).unwrap();
        let inner = table.insert(Node::branch("inner", BranchSpec::default())).unwrap();
        table.add_child(&outer, &inner).unwrap();
        let err = table.add_child(&inner, &outer).unwrap_err();
        assert!(matches!(err, GroveError::CycleDetected { .. }));
    }

    #[test]
    fn test_remove_child_respects_index_flag() {
        let (mut table, branch) = table_with_branch();
        let add = table.insert(leaf("add")).unwrap();
        table.add_child(&branch, &add).unwrap();
        table.mark_indexed(&add);
        let err = table.remove_child(&branch, &add).unwrap_err();
        assert!(matches!(err, GroveError::NodeIndexed(_)));

        let sub = table.insert(leaf("sub")).unwrap();
        table.add_child(&branch, &sub).unwrap();
        table.remove_child(&branch, &sub).unwrap();
        assert!(table.get(&sub).unwrap().parent.is_none());
    }

    #[test]
    fn test_remove_subtree() {
        let (mut table, branch) = table_with_branch();
        let add = table.insert(leaf("add")).unwrap();
        table.add_child(&branch, &add).unwrap();

        let removed = table.remove_subtree(&branch).unwrap();
        assert_eq!(removed, vec![branch.clone(), add.clone()]);
        assert!(!table.contains(&add));
        assert!(table.get(table.root()).unwrap().children.is_empty());
        let root = table.root().clone();
        assert!(table.remove_subtree(&root).is_err());
    }

    #[test]
    fn test_navigation_helpers() {
        let (mut table, math) = table_with_branch();
        let add = table.insert(leaf("add")).unwrap();
        let sub = table.insert(leaf("sub")).unwrap();
        let nested = table.insert(Node::branch("stats", BranchSpec::default())).unwrap();
        let mean = table.insert(leaf("mean")).unwrap();
        table.add_child(&math, &add).unwrap();
        table.add_child(&math, &sub).unwrap();
        table.add_child(&math, &nested).unwrap();
        table.add_child(&nested, &mean).unwrap();

        assert_eq!(table.find_child(&math, "sub").unwrap().id, sub);
        assert_eq!(table.siblings(&add).unwrap().len(), 2);
        assert_eq!(table.leaves_of(&math).unwrap().len(), 2);
        assert_eq!(table.branches_of(&math).unwrap().len(), 1);
        assert_eq!(
            table.descendants(&math).unwrap(),
            vec![add.clone(), sub.clone(), nested.clone(), mean.clone()]
        );
        assert_eq!(table.top_level_branch(&mean).unwrap(), Some(math.clone()));
        assert_eq!(table.top_level_branch(&math).unwrap(), Some(math.clone()));
        assert_eq!(table.top_level_branch(table.root()).unwrap(), None);
    }
}
