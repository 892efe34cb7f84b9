//! The `Tree` aggregate: node table, provider registry, similarity index
//! handle, history and event plumbing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use grove_core::config::{BranchDocument, EngineConfig, LeafDocument, TreeDocument};
use grove_core::error::{GroveError, Result};
use grove_core::event::EventBus;
use grove_core::index::SimilarityIndex;
use grove_core::node::{BranchSpec, LeafSpec, Node, NodeKind, NodeTable};
use grove_core::skill::{ParameterSchema, Skill, SkillMode};
use grove_core::types::{NodeId, RouteEvent};
use grove_llm::ProviderRouter;

use crate::history::HistoryLog;
use crate::invoke::WorkerPool;

/// Named skills that configuration documents refer to by key.
#[derive(Debug, Clone, Default)]
pub struct SkillCatalog {
    skills: HashMap<String, (Skill, ParameterSchema)>,
}

impl SkillCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, skill: Skill) {
        self.skills.insert(key.into(), (skill, ParameterSchema::default()));
    }

    /// Register a skill with the schema used when a document declares none.
    pub fn register_with_schema(
        &mut self,
        key: impl Into<String>,
        skill: Skill,
        schema: ParameterSchema,
    ) {
        self.skills.insert(key.into(), (skill, schema));
    }

    pub fn with(mut self, key: impl Into<String>, skill: Skill) -> Self {
        self.register(key, skill);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Skill> {
        self.skills.get(key).map(|(skill, _)| skill)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.skills.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    fn resolve(&self, doc: &LeafDocument) -> Result<(Skill, ParameterSchema)> {
        let (skill, schema) = self.skills.get(&doc.skill).ok_or_else(|| {
            GroveError::Config(format!(
                "leaf '{}' references unknown skill '{}'",
                doc.name, doc.skill
            ))
        })?;
        let schema = if doc.parameters.is_empty() {
            schema.clone()
        } else {
            doc.parameters.clone()
        };
        Ok((skill.clone(), schema))
    }
}

/// Root aggregate of the routing hierarchy.
///
/// Structure changes need `&mut Tree`; queries run through `&self`, so an
/// `Arc<Tree>` serves concurrent callers.
pub struct Tree {
    pub(crate) nodes: NodeTable,
    pub(crate) router: ProviderRouter,
    pub(crate) index: Arc<dyn SimilarityIndex>,
    pub(crate) history: HistoryLog,
    pub(crate) events: Arc<EventBus>,
    pub(crate) pool: WorkerPool,
    pub(crate) config: EngineConfig,
}

impl Tree {
    pub fn new(
        name: impl Into<String>,
        index: Arc<dyn SimilarityIndex>,
        router: ProviderRouter,
        config: EngineConfig,
    ) -> Self {
        Self {
            nodes: NodeTable::new(name),
            router,
            index,
            history: HistoryLog::new(),
            events: Arc::new(EventBus::default()),
            pool: WorkerPool::new(config.worker_pool_size),
            config,
        }
    }

    pub fn name(&self) -> &str {
        self.nodes.root_name()
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut ProviderRouter {
        &mut self.router
    }

    pub fn index(&self) -> &Arc<dyn SimilarityIndex> {
        &self.index
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RouteEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Insert and attach in one step, leaving the table unchanged on failure.
    fn attach(&mut self, parent: &NodeId, node: Node) -> Result<NodeId> {
        let id = self.nodes.insert(node)?;
        if let Err(e) = self.nodes.add_child(parent, &id) {
            let _ = self.nodes.remove_subtree(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Grow a top-level branch under the root.
    pub fn grow_branch(
        &mut self,
        name: impl Into<String>,
        spec: BranchSpec,
        provider: Option<&str>,
    ) -> Result<NodeId> {
        let root = self.nodes.root().clone();
        self.grow_sub_branch(&root, name, spec, provider)
    }

    /// Grow a branch under `parent`, which must be a branch (or the root).
    pub fn grow_sub_branch(
        &mut self,
        parent: &NodeId,
        name: impl Into<String>,
        spec: BranchSpec,
        provider: Option<&str>,
    ) -> Result<NodeId> {
        let node = Node::branch(name, spec).with_provider(provider.map(String::from));
        let name = node.name.clone();
        let id = self.attach(parent, node)?;
        info!(branch = %name, "Grew branch");
        Ok(id)
    }

    /// Spawn a leaf onto `branch` and register it with the similarity index.
    ///
    /// If indexing fails the leaf is removed again and the error returned.
    pub async fn spawn_leaf(
        &mut self,
        branch: &NodeId,
        name: impl Into<String>,
        mut spec: LeafSpec,
        provider: Option<&str>,
    ) -> Result<NodeId> {
        let name = name.into();
        if spec.skill_ref.is_empty() {
            spec.skill_ref = name.clone();
        }
        let mode = spec.mode();
        let node = Node::leaf(name.clone(), spec).with_provider(provider.map(String::from));
        let id = self.attach(branch, node)?;

        if let Err(e) = self.index_node(&id).await {
            let _ = self.nodes.remove_subtree(&id);
            return Err(e);
        }
        info!(leaf = %name, mode = ?mode, "Spawned leaf");
        Ok(id)
    }

    async fn index_node(&mut self, id: &NodeId) -> Result<()> {
        let text = self.embedding_text(id)?;
        let metadata = self.index_metadata(id)?;
        self.index.index(id.clone(), text, metadata).await?;
        self.nodes.mark_indexed(id);
        Ok(())
    }

    /// (Re-)index every branch and leaf in pre-order. Returns the entry count.
    pub async fn index_tree(&mut self) -> Result<usize> {
        let root = self.nodes.root().clone();
        let ids = self.nodes.descendants(&root)?;
        for id in &ids {
            self.index_node(id).await?;
        }
        info!(tree = %self.name(), entries = ids.len(), "Indexed tree");
        Ok(ids.len())
    }

    /// Top-level branch by name.
    pub fn branch(&self, name: &str) -> Option<&Node> {
        self.nodes
            .find_child(self.nodes.root(), name)
            .filter(|n| n.is_branch())
    }

    /// Node reached by following child names from the root.
    pub fn find(&self, path: &[&str]) -> Option<&Node> {
        let mut current = self.nodes.get(self.nodes.root()).ok()?;
        for segment in path {
            current = self.nodes.find_child(&current.id, segment)?;
        }
        Some(current)
    }

    /// Remove `id` and its subtree from the similarity index and the table.
    /// Returns the removed ids in pre-order.
    pub async fn prune(&mut self, id: &NodeId) -> Result<Vec<NodeId>> {
        if id == self.nodes.root() {
            return Err(GroveError::InvalidParent {
                child: self.name().to_string(),
                reason: "the root cannot be pruned".into(),
            });
        }
        let mut doomed = vec![id.clone()];
        doomed.extend(self.nodes.descendants(id)?);
        for node in &doomed {
            self.index.remove(node).await?;
        }
        let removed = self.nodes.remove_subtree(id)?;
        debug!(node = %id, removed = removed.len(), "Pruned subtree");
        Ok(removed)
    }

    /// Text registered with the similarity index for a node.
    pub fn embedding_text(&self, id: &NodeId) -> Result<String> {
        let node = self.nodes.get(id)?;
        let label = if node.is_leaf() { "Skill" } else { "Agent" };
        let mut text = format!(
            "{}: {}\nDescription: {}\nPath: {}",
            label,
            node.name,
            node.description(),
            self.nodes.path_string(id)?
        );
        if let Some(leaf) = node.as_leaf() {
            if !leaf.schema.is_empty() {
                text.push_str("\nParameters: ");
                text.push_str(&leaf.schema.render());
            }
        }
        Ok(text)
    }

    /// Metadata stored alongside a node's index entry.
    pub fn index_metadata(&self, id: &NodeId) -> Result<Map<String, Value>> {
        let node = self.nodes.get(id)?;
        let branch = match self.nodes.top_level_branch(id)? {
            Some(top) => self.nodes.get(&top)?.name.clone(),
            None => String::new(),
        };
        let ancestors: Vec<Value> = self
            .nodes
            .ancestors(id)?
            .into_iter()
            .map(|a| Value::String(a.0))
            .collect();

        let mut meta = Map::new();
        meta.insert("kind".into(), node.kind.label().into());
        meta.insert("name".into(), node.name.clone().into());
        meta.insert("branch".into(), branch.into());
        meta.insert("ancestors".into(), Value::Array(ancestors));
        meta.insert("path".into(), self.nodes.path_string(id)?.into());
        if !node.metadata.is_empty() {
            meta.insert("metadata".into(), Value::Object(node.metadata.clone()));
        }
        Ok(meta)
    }

    /// Box-drawing rendering of the hierarchy.
    pub fn visualize(&self) -> String {
        let mut lines = vec![self.name().to_string()];
        self.draw(self.nodes.root(), "", &mut lines);
        lines.join("\n")
    }

    fn draw(&self, id: &NodeId, prefix: &str, lines: &mut Vec<String>) {
        let children = self.nodes.children(id).unwrap_or_default();
        let count = children.len();
        for (i, child) in children.into_iter().enumerate() {
            let last = i + 1 == count;
            let label = match &child.kind {
                NodeKind::Leaf(leaf) => match leaf.mode() {
                    SkillMode::Sync => format!("{} [sync]", child.name),
                    SkillMode::Async => format!("{} [async]", child.name),
                },
                _ => match &child.provider_hint {
                    Some(p) => format!("{}/ ({})", child.name, p),
                    None => format!("{}/", child.name),
                },
            };
            lines.push(format!("{}{}{}", prefix, if last { "└── " } else { "├── " }, label));
            let next = format!("{}{}", prefix, if last { "    " } else { "│   " });
            self.draw(&child.id, &next, lines);
        }
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Structural snapshot: names, hierarchy, provider references and engine
    /// settings. Skills are written as their catalog keys.
    pub fn to_document(&self) -> Result<TreeDocument> {
        let root = self.nodes.root().clone();
        let branches = self
            .nodes
            .branches_of(&root)?
            .into_iter()
            .map(|b| self.branch_document(&b.id))
            .collect::<Result<Vec<_>>>()?;
        Ok(TreeDocument {
            name: self.name().to_string(),
            engine: Some(self.config.clone()),
            branches,
            providers: self.router.providers().to_vec(),
        })
    }

    fn branch_document(&self, id: &NodeId) -> Result<BranchDocument> {
        let node = self.nodes.get(id)?;
        let spec = node.as_branch().cloned().unwrap_or_default();
        let leaves = self
            .nodes
            .leaves_of(id)?
            .into_iter()
            .filter_map(|leaf| {
                let spec = leaf.as_leaf()?;
                Some(LeafDocument {
                    name: leaf.name.clone(),
                    description: spec.description.clone(),
                    skill: spec.skill_ref.clone(),
                    provider_id: leaf.provider_hint.clone(),
                    parameters: spec.schema.clone(),
                    metadata: leaf.metadata.clone(),
                })
            })
            .collect();
        let branches = self
            .nodes
            .branches_of(id)?
            .into_iter()
            .map(|b| self.branch_document(&b.id))
            .collect::<Result<Vec<_>>>()?;

        Ok(BranchDocument {
            name: node.name.clone(),
            description: spec.description,
            provider_id: node.provider_hint.clone(),
            system_prompt: spec.system_prompt,
            temperature: spec.temperature,
            max_tokens: spec.max_tokens,
            metadata: node.metadata.clone(),
            leaves,
            branches,
        })
    }

    /// Build and index a tree from a document, with HTTP provider clients.
    pub async fn from_document(
        doc: &TreeDocument,
        catalog: &SkillCatalog,
        index: Arc<dyn SimilarityIndex>,
    ) -> Result<Self> {
        Self::from_document_with_router(doc, catalog, index, ProviderRouter::new()).await
    }

    /// Like [`from_document`](Self::from_document), registering the
    /// document's providers into `router`.
    pub async fn from_document_with_router(
        doc: &TreeDocument,
        catalog: &SkillCatalog,
        index: Arc<dyn SimilarityIndex>,
        mut router: ProviderRouter,
    ) -> Result<Self> {
        let config = doc.engine.clone().ok_or_else(|| {
            GroveError::Config(format!(
                "tree '{}' has no [engine] section; min_similarity is required",
                doc.name
            ))
        })?;
        for provider in &doc.providers {
            router.register(provider.clone())?;
        }

        let mut tree = Self::new(doc.name.clone(), index, router, config);
        let root = tree.nodes.root().clone();
        for branch in &doc.branches {
            tree.build_branch(&root, branch, catalog)?;
        }
        tree.index_tree().await?;
        Ok(tree)
    }

    fn build_branch(
        &mut self,
        parent: &NodeId,
        doc: &BranchDocument,
        catalog: &SkillCatalog,
    ) -> Result<()> {
        let spec = BranchSpec::new(doc.description.clone())
            .with_system_prompt(doc.system_prompt.clone())
            .with_generation(doc.temperature, doc.max_tokens);
        let node = Node::branch(doc.name.clone(), spec)
            .with_provider(doc.provider_id.clone())
            .with_metadata(doc.metadata.clone());
        let id = self.attach(parent, node)?;

        for leaf in &doc.leaves {
            let (skill, schema) = catalog.resolve(leaf)?;
            let spec = LeafSpec::new(leaf.description.clone(), skill, schema)
                .with_skill_ref(leaf.skill.clone());
            let node = Node::leaf(leaf.name.clone(), spec)
                .with_provider(leaf.provider_id.clone())
                .with_metadata(leaf.metadata.clone());
            self.attach(&id, node)?;
        }
        for sub in &doc.branches {
            self.build_branch(&id, sub, catalog)?;
        }
        Ok(())
    }

    /// Write the tree document (TOML for `.toml`, JSON otherwise).
    pub async fn save(&self, path: &Path) -> Result<()> {
        self.to_document()?.save(path).await?;
        info!(path = %path.display(), "Saved tree");
        Ok(())
    }

    pub async fn load(
        path: &Path,
        catalog: &SkillCatalog,
        index: Arc<dyn SimilarityIndex>,
    ) -> Result<Self> {
        let doc = TreeDocument::load(path).await?;
        Self::from_document(&doc, catalog, index).await
    }

    pub async fn load_with_router(
        path: &Path,
        catalog: &SkillCatalog,
        index: Arc<dyn SimilarityIndex>,
        router: ProviderRouter,
    ) -> Result<Self> {
        let doc = TreeDocument::load(path).await?;
        Self::from_document_with_router(&doc, catalog, index, router).await
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("name", &self.name())
            .field("nodes", &self.nodes.len())
            .field("providers", &self.router.ids())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_core::config::ProviderKind;
    use grove_core::config::ProviderConfig;
    use grove_test_utils::{
        add_schema, add_skill, echo_skill, mock_router, multiply_skill, BrokenIndex, KeywordIndex,
        MockLlmClient,
    };

    fn empty_tree(index: Arc<dyn SimilarityIndex>) -> Tree {
        let router = mock_router("local", Arc::new(MockLlmClient::replying("{}")));
        Tree::new("garden", index, router, EngineConfig::new(0.2))
    }

    async fn math_tree() -> (Tree, NodeId, NodeId) {
        let mut tree = empty_tree(Arc::new(KeywordIndex::new()));
        let math = tree
            .grow_branch("math", BranchSpec::new("arithmetic helpers"), Some("local"))
            .unwrap();
        let add = tree
            .spawn_leaf(
                &math,
                "add",
                LeafSpec::new("adds two numbers", add_skill(), add_schema()),
                None,
            )
            .await
            .unwrap();
        (tree, math, add)
    }

    #[tokio::test]
    async fn test_spawn_leaf_registers_with_index() {
        let (tree, math, add) = math_tree().await;
        assert_eq!(tree.index().len().await, 1);
        assert!(tree.nodes().is_indexed(&add));
        assert!(!tree.nodes().is_indexed(&math));
        assert_eq!(tree.nodes().get_path(&add).unwrap(), vec!["garden", "math", "add"]);
        assert_eq!(tree.nodes().get(&add).unwrap().as_leaf().unwrap().skill_ref, "add");
    }

    #[tokio::test]
    async fn test_embedding_text_and_metadata() {
        let (tree, math, add) = math_tree().await;
        assert_eq!(
            tree.embedding_text(&add).unwrap(),
            "Skill: add\nDescription: adds two numbers\nPath: garden/math/add\nParameters: a: number, b: number"
        );
        assert!(tree.embedding_text(&math).unwrap().starts_with("Agent: math\n"));

        let meta = tree.index_metadata(&add).unwrap();
        assert_eq!(meta["kind"], "leaf");
        assert_eq!(meta["branch"], "math");
        assert_eq!(meta["path"], "garden/math/add");
        let ancestors = meta["ancestors"].as_array().unwrap();
        assert!(ancestors.contains(&Value::String(math.0.clone())));
        assert!(ancestors.contains(&Value::String(tree.nodes().root().0.clone())));
    }

    #[tokio::test]
    async fn test_structural_errors_leave_table_unchanged() {
        let (mut tree, math, _) = math_tree().await;
        let before = tree.nodes().len();

        let dup = tree
            .spawn_leaf(&math, "add", LeafSpec::new("again", add_skill(), add_schema()), None)
            .await;
        assert!(matches!(dup, Err(GroveError::DuplicateName { .. })));

        let root = tree.nodes().root().clone();
        let on_root = tree
            .spawn_leaf(&root, "stray", LeafSpec::new("x", echo_skill(), ParameterSchema::default()), None)
            .await;
        assert!(matches!(on_root, Err(GroveError::InvalidParent { .. })));

        assert!(matches!(
            tree.grow_branch("math", BranchSpec::new("twin"), None),
            Err(GroveError::DuplicateName { .. })
        ));
        assert_eq!(tree.nodes().len(), before);
        assert_eq!(tree.index().len().await, 1);
    }

    #[tokio::test]
    async fn test_spawn_rolls_back_when_indexing_fails() {
        let mut tree = empty_tree(Arc::new(BrokenIndex));
        let math = tree.grow_branch("math", BranchSpec::new("m"), None).unwrap();
        let err = tree
            .spawn_leaf(&math, "add", LeafSpec::new("adds", add_skill(), add_schema()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GroveError::Index(_)));
        assert!(tree.nodes().find_child(&math, "add").is_none());
        assert_eq!(tree.nodes().len(), 2);
    }

    #[tokio::test]
    async fn test_index_tree_is_idempotent() {
        let (mut tree, math, _) = math_tree().await;
        let algebra = tree
            .grow_sub_branch(&math, "algebra", BranchSpec::new("equations"), None)
            .unwrap();
        tree.spawn_leaf(
            &algebra,
            "solve",
            LeafSpec::new("solves equations", echo_skill(), ParameterSchema::default()),
            None,
        )
        .await
        .unwrap();

        assert_eq!(tree.index_tree().await.unwrap(), 4);
        assert_eq!(tree.index_tree().await.unwrap(), 4);
        assert_eq!(tree.index().len().await, 4);
        assert!(tree.nodes().is_indexed(&math));
    }

    #[tokio::test]
    async fn test_indexed_node_cannot_move() {
        let (mut tree, math, add) = math_tree().await;
        let other = tree.grow_branch("other", BranchSpec::new("o"), None).unwrap();
        assert!(matches!(
            tree.nodes.remove_child(&math, &add),
            Err(GroveError::NodeIndexed(_))
        ));
        assert!(matches!(
            tree.nodes.add_child(&other, &add),
            Err(GroveError::AlreadyParented { .. })
        ));
    }

    #[tokio::test]
    async fn test_prune_removes_subtree_from_index() {
        let (mut tree, math, add) = math_tree().await;
        tree.index_tree().await.unwrap();
        assert_eq!(tree.index().len().await, 2);

        let removed = tree.prune(&math).await.unwrap();
        assert_eq!(removed, vec![math.clone(), add]);
        assert_eq!(tree.index().len().await, 0);
        assert!(tree.branch("math").is_none());

        let root = tree.nodes().root().clone();
        assert!(tree.prune(&root).await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_helpers() {
        let (tree, math, add) = math_tree().await;
        assert_eq!(tree.branch("math").unwrap().id, math);
        assert_eq!(tree.find(&["math", "add"]).unwrap().id, add);
        assert!(tree.find(&["math", "nope"]).is_none());
        assert!(tree.branch("add").is_none());
    }

    #[tokio::test]
    async fn test_visualize() {
        let (mut tree, math, _) = math_tree().await;
        tree.spawn_leaf(
            &math,
            "shout",
            LeafSpec::new("echo loudly", echo_skill(), ParameterSchema::default()),
            None,
        )
        .await
        .unwrap();
        tree.grow_branch("text", BranchSpec::new("t"), None).unwrap();

        let expected = "garden\n\
                        ├── math/ (local)\n\
                        │   ├── add [sync]\n\
                        │   └── shout [async]\n\
                        └── text/";
        assert_eq!(tree.visualize(), expected);
    }

    fn catalog() -> SkillCatalog {
        let mut catalog = SkillCatalog::new().with("mul", multiply_skill());
        catalog.register_with_schema("add", add_skill(), add_schema());
        catalog
    }

    #[tokio::test]
    async fn test_document_round_trip() {
        let (mut tree, math, _) = math_tree().await;
        tree.router_mut()
            .register(ProviderConfig::new("cloud", ProviderKind::OpenAi, "gpt-4o").with_credential_ref("OPENAI_API_KEY"))
            .unwrap();
        let algebra = tree
            .grow_sub_branch(&math, "algebra", BranchSpec::new("equations").with_system_prompt("Be exact."), Some("cloud"))
            .unwrap();
        tree.spawn_leaf(
            &algebra,
            "times",
            LeafSpec::new("multiplies", multiply_skill(), ParameterSchema::default()).with_skill_ref("mul"),
            None,
        )
        .await
        .unwrap();

        let doc = tree.to_document().unwrap();
        assert_eq!(doc.providers.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["local", "cloud"]);
        assert_eq!(doc.branches[0].leaves[0].skill, "add");
        assert_eq!(doc.branches[0].branches[0].provider_id.as_deref(), Some("cloud"));

        let router = mock_router("local", Arc::new(MockLlmClient::replying("{}")));
        let loaded = Tree::from_document_with_router(&doc, &catalog(), Arc::new(KeywordIndex::new()), router)
            .await
            .unwrap();
        assert_eq!(loaded.to_document().unwrap(), doc);
        assert_eq!(loaded.visualize(), tree.visualize());
        assert_eq!(loaded.index().len().await, 4);
        assert_eq!(
            loaded.find(&["math", "algebra"]).unwrap().as_branch().unwrap().system_prompt,
            "Be exact."
        );
    }

    #[tokio::test]
    async fn test_document_errors() {
        let (tree, _, _) = math_tree().await;
        let doc = tree.to_document().unwrap();

        let missing = SkillCatalog::new().with("mul", multiply_skill());
        let err = Tree::from_document(&doc, &missing, Arc::new(KeywordIndex::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GroveError::Config(ref m) if m.contains("unknown skill 'add'")));

        let mut no_engine = doc.clone();
        no_engine.engine = None;
        let err = Tree::from_document(&no_engine, &catalog(), Arc::new(KeywordIndex::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GroveError::Config(ref m) if m.contains("min_similarity")));
    }

    #[tokio::test]
    async fn test_save_and_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garden.toml");
        let (tree, _, _) = math_tree().await;
        tree.save(&path).await.unwrap();

        let router = mock_router("local", Arc::new(MockLlmClient::replying("{}")));
        let loaded = Tree::load_with_router(&path, &catalog(), Arc::new(KeywordIndex::new()), router)
            .await
            .unwrap();
        assert_eq!(loaded.name(), "garden");
        assert_eq!(loaded.to_document().unwrap(), tree.to_document().unwrap());
        assert!((loaded.config().min_similarity - 0.2).abs() < f32::EPSILON);
    }
}
