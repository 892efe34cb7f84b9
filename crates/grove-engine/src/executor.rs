//! Query execution: branch retrieval, leaf retrieval, disambiguation,
//! invocation, recording.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use grove_core::error::{GroveError, MatchStage, Result};
use grove_core::skill::{SkillInput, SkillResult};
use grove_core::types::{GenerationParams, NodeId, RouteEvent, SelectionMethod};

use crate::disambiguation::{self, Selection};
use crate::history::HistoryRecord;
use crate::selection::{aggregate_branches, leaf_candidates, leaf_scope, BranchCandidate, LeafCandidate};
use crate::tree::Tree;

/// Outcome of a query that reached a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub branch: String,
    pub leaf: String,
    /// Names from the root down to the leaf.
    pub path: Vec<String>,
    pub selection: SelectionMethod,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// The skill's value, or its failure as `SkillExecution`.
    pub fn into_result(self) -> Result<Value> {
        match (self.success, self.result) {
            (true, Some(value)) => Ok(value),
            (true, None) => Ok(Value::Null),
            (false, _) => Err(GroveError::SkillExecution {
                leaf: self.leaf,
                message: self.error.unwrap_or_default(),
            }),
        }
    }
}

impl Tree {
    /// Route `query` to a leaf and invoke it.
    ///
    /// Skill failures come back as `Ok` with `success == false`. No-match,
    /// provider and index failures are returned as errors. Either way exactly
    /// one history record is appended.
    pub async fn execute(&self, query: &str) -> Result<ExecutionResult> {
        self.events.publish(RouteEvent::QueryStarted {
            query: query.to_string(),
        });

        let mut branch_seen = None;
        match self.run(query, &mut branch_seen).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(query, error = %e, "Query failed");
                self.history.append(HistoryRecord::new(
                    query,
                    branch_seen,
                    None,
                    SkillResult::failure(e.to_string()),
                    None,
                ));
                self.events.publish(RouteEvent::QueryFailed {
                    query: query.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(&self, query: &str, branch_seen: &mut Option<String>) -> Result<ExecutionResult> {
        let started = Instant::now();
        let threshold = self.config.min_similarity;

        // Branch candidates
        let k = match self.config.branch_search_k {
            Some(k) => k,
            None => self.index.len().await,
        };
        let hits = if k == 0 {
            vec![]
        } else {
            self.index.search(query, k, None).await?
        };
        let branches = aggregate_branches(&self.nodes, &hits, threshold);
        let branch = branches.into_iter().next().ok_or_else(|| GroveError::NoMatch {
            stage: MatchStage::Branch,
            query: query.to_string(),
        })?;
        *branch_seen = Some(branch.name.clone());
        info!(branch = %branch.name, score = branch.score, "Selected branch");
        self.events.publish(RouteEvent::BranchSelected {
            branch: branch.name.clone(),
            score: branch.score,
        });

        // Leaf candidates
        let scope = leaf_scope(&branch.id);
        let hits = self
            .index
            .search(query, self.config.leaf_top_k, Some(&scope))
            .await?;
        let candidates = leaf_candidates(&self.nodes, &hits, threshold);
        if candidates.is_empty() {
            return Err(GroveError::NoMatch {
                stage: MatchStage::Leaf,
                query: query.to_string(),
            });
        }
        debug!(
            branch = %branch.name,
            candidates = ?candidates.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Leaf candidates"
        );

        let selection = self.disambiguate(&branch, &candidates, query).await?;
        if let SelectionMethod::Fallback { ref reason } = selection.method {
            warn!(branch = %branch.name, reason = %reason, "Disambiguation fell back to top candidate");
            self.events.publish(RouteEvent::SelectionFallback {
                branch: branch.name.clone(),
                reason: reason.clone(),
            });
        }

        let chosen = &candidates[selection.index];
        self.events.publish(RouteEvent::LeafSelected {
            branch: branch.name.clone(),
            leaf: chosen.name.clone(),
            selection: selection.method.clone(),
        });

        let outcome = self.invoke_leaf(&chosen.id, query, selection.args).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let success = outcome.is_success();
        info!(branch = %branch.name, leaf = %chosen.name, success, elapsed_ms, "Leaf completed");
        self.events.publish(RouteEvent::LeafCompleted {
            branch: branch.name.clone(),
            leaf: chosen.name.clone(),
            success,
            elapsed_ms,
        });

        self.history.append(HistoryRecord::new(
            query,
            Some(branch.name.clone()),
            Some(chosen.name.clone()),
            outcome.clone(),
            Some(selection.method.clone()),
        ));

        let (result, error) = match outcome {
            SkillResult::Success(value) => (Some(value), None),
            SkillResult::Failure(message) => (None, Some(message)),
        };
        Ok(ExecutionResult {
            success,
            result,
            error,
            branch: branch.name,
            leaf: chosen.name.clone(),
            path: self.nodes.get_path(&chosen.id)?,
            selection: selection.method,
            elapsed_ms,
        })
    }

    /// Ask the branch's provider to pick among the candidates.
    ///
    /// Only failing to obtain a client is an error; anything the provider
    /// says (or fails to say) after that resolves to some candidate.
    async fn disambiguate(
        &self,
        branch: &BranchCandidate,
        candidates: &[LeafCandidate],
        query: &str,
    ) -> Result<Selection> {
        let node = self.nodes.get(&branch.id)?;
        let spec = node.as_branch().cloned().unwrap_or_default();

        let provider_id = match &node.provider_hint {
            Some(hint) => hint.clone(),
            None => {
                let routing = &self.config.routing;
                self.router
                    .route(&routing.policy, routing.fallback.as_deref())
                    .map(|p| p.id.clone())
                    .map_err(|e| GroveError::ProviderUnavailable {
                        provider: format!("{:?}", routing.policy),
                        reason: e.to_string(),
                    })?
            }
        };
        let client = self.router.client(&provider_id).await?;
        let provider = self
            .router
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| GroveError::ProviderUnavailable {
                provider: provider_id.clone(),
                reason: "not registered".into(),
            })?;

        let messages =
            disambiguation::build_messages(&node.name, &spec.system_prompt, candidates, query);
        let params = GenerationParams {
            temperature: spec.temperature,
            max_tokens: spec.max_tokens,
        };
        debug!(branch = %node.name, provider = %provider_id, "Disambiguating");
        let reply = client
            .complete(&provider, params, messages)
            .await
            .map_err(|e| e.to_string());
        Ok(disambiguation::resolve(reply, candidates, &provider_id))
    }

    /// Check arguments against the leaf's schema and run its skill.
    async fn invoke_leaf(
        &self,
        leaf: &NodeId,
        query: &str,
        args: Map<String, Value>,
    ) -> Result<SkillResult> {
        let node = self.nodes.get(leaf)?;
        let spec = node.as_leaf().ok_or_else(|| GroveError::InvalidParent {
            child: node.name.clone(),
            reason: "selected node is not a leaf".into(),
        })?;

        let args = if args.is_empty() {
            spec.schema.defaults()
        } else {
            match spec.schema.validate(&args) {
                Ok(valid) => valid,
                Err(reason) => {
                    warn!(leaf = %node.name, reason = %reason, "Discarding invalid skill arguments");
                    spec.schema.defaults()
                }
            }
        };

        let input = SkillInput::new(query).with_args(args);
        Ok(self.pool.invoke(&spec.skill, input).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use grove_core::config::{EngineConfig, RoutePolicy, RoutingConfig};
    use grove_core::index::SimilarityIndex;
    use grove_core::node::{BranchSpec, LeafSpec};
    use grove_core::skill::{ParamSpec, ParameterSchema};
    use grove_llm::ProviderRouter;
    use grove_test_utils::{
        add_schema, add_skill, echo_skill, failing_skill, label_skill, mock_factory, mock_router,
        multiply_skill, panicking_skill, tool_reply, unavailable_router, BrokenIndex, KeywordIndex,
        MockLlmClient,
    };
    use serde_json::json;

    async fn math_tree(client: Arc<MockLlmClient>) -> Tree {
        let mut tree = Tree::new(
            "garden",
            Arc::new(KeywordIndex::new()),
            mock_router("local", client),
            EngineConfig::new(0.2),
        );
        let math = tree
            .grow_branch(
                "math",
                BranchSpec::new("arithmetic").with_system_prompt("You are precise."),
                Some("local"),
            )
            .unwrap();
        tree.spawn_leaf(&math, "add", LeafSpec::new("adds two numbers", add_skill(), add_schema()), None)
            .await
            .unwrap();
        tree.spawn_leaf(
            &math,
            "multiply",
            LeafSpec::new("multiplies two numbers", multiply_skill(), ParameterSchema::default()),
            None,
        )
        .await
        .unwrap();
        tree
    }

    #[tokio::test]
    async fn test_execute_follows_model_choice() {
        let client = Arc::new(MockLlmClient::choosing("add", json!({})));
        let tree = math_tree(client.clone()).await;

        let result = tree.execute("add 2 and 3 numbers").await.unwrap();
        assert!(result.success);
        assert_eq!(result.result, Some(json!(5.0)));
        assert_eq!(result.path, vec!["garden", "math", "add"]);
        assert_eq!(result.selection, SelectionMethod::Model { provider: "local".into() });

        let prompt = client.last_prompt().unwrap();
        assert!(prompt.contains("You are precise."));
        assert!(prompt.contains("- add [garden/math/add]: adds two numbers (parameters: a: number, b: number)"));
        assert!(prompt.contains("User query: add 2 and 3 numbers"));
    }

    #[tokio::test]
    async fn test_model_args_reach_the_skill() {
        let client = Arc::new(MockLlmClient::choosing("add", json!({"a": 10, "b": 0.5})));
        let tree = math_tree(client).await;
        let result = tree.execute("add some numbers").await.unwrap();
        assert_eq!(result.result, Some(json!(10.5)));
    }

    #[tokio::test]
    async fn test_mistyped_args_are_discarded() {
        let client = Arc::new(MockLlmClient::choosing("add", json!({"a": "ten", "b": 1})));
        let tree = math_tree(client).await;
        let result = tree.execute("add 4 and 4 numbers").await.unwrap();
        assert_eq!(result.result, Some(json!(8.0)));
    }

    #[tokio::test]
    async fn test_unknown_choice_falls_back_to_top_candidate() {
        let client = Arc::new(MockLlmClient::choosing("divide", json!({})));
        let tree = math_tree(client).await;
        let mut events = tree.subscribe();

        let result = tree.execute("multiplies 3 and 4").await.unwrap();
        assert!(result.success);
        assert_eq!(result.leaf, "multiply");
        assert!(result.selection.is_fallback());

        let mut saw_fallback = false;
        while let Ok(event) = events.try_recv() {
            if let RouteEvent::SelectionFallback { branch, .. } = event {
                assert_eq!(branch, "math");
                saw_fallback = true;
            }
        }
        assert!(saw_fallback);
    }

    #[tokio::test]
    async fn test_provider_request_error_falls_back() {
        let client = Arc::new(MockLlmClient::failing("HTTP 503"));
        let tree = math_tree(client).await;
        let result = tree.execute("add 1 and 1 numbers").await.unwrap();
        assert_eq!(result.leaf, "add");
        assert!(matches!(result.selection, SelectionMethod::Fallback { ref reason } if reason.contains("HTTP 503")));
    }

    #[tokio::test]
    async fn test_no_branch_match() {
        let tree = math_tree(Arc::new(MockLlmClient::replying("{}"))).await;
        let err = tree.execute("translate this poem").await.unwrap_err();
        assert!(matches!(err, GroveError::NoMatch { stage: MatchStage::Branch, .. }));

        let records = tree.history().all();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].branch, None);
    }

    #[tokio::test]
    async fn test_empty_tree_is_no_match() {
        let tree = Tree::new(
            "bare",
            Arc::new(KeywordIndex::new()),
            mock_router("local", Arc::new(MockLlmClient::replying("{}"))),
            EngineConfig::new(0.0),
        );
        let err = tree.execute("anything").await.unwrap_err();
        assert!(err.is_no_match());
        assert_eq!(tree.history().len(), 1);
    }

    #[tokio::test]
    async fn test_no_leaf_match_records_branch() {
        let client = Arc::new(MockLlmClient::replying("{}"));
        let mut tree = math_tree(client).await;
        tree.index_tree().await.unwrap();
        // Matches the branch entry but none of its leaves.
        let err = tree.execute("arithmetic").await.unwrap_err();
        assert!(matches!(err, GroveError::NoMatch { stage: MatchStage::Leaf, .. }));
        assert_eq!(tree.history().all()[0].branch.as_deref(), Some("math"));
    }

    #[tokio::test]
    async fn test_skill_failure_and_panic_are_data() {
        let mut tree = Tree::new(
            "garden",
            Arc::new(KeywordIndex::new()),
            mock_router("local", Arc::new(MockLlmClient::choosing("boom", json!({})))),
            EngineConfig::new(0.2),
        );
        let tools = tree.grow_branch("tools", BranchSpec::new("tools"), None).unwrap();
        tree.spawn_leaf(&tools, "boom", LeafSpec::new("explodes loudly", panicking_skill(), ParameterSchema::default()), None)
            .await
            .unwrap();
        tree.spawn_leaf(&tools, "fizzle", LeafSpec::new("fails quietly", failing_skill("no luck"), ParameterSchema::default()), None)
            .await
            .unwrap();

        let panicked = tree.execute("explodes").await.unwrap();
        assert!(!panicked.success);
        assert!(panicked.error.as_deref().unwrap().contains("skill exploded"));

        let failed = tree.execute("fails quietly").await.unwrap();
        assert!(!failed.success);
        assert!(matches!(
            failed.clone().into_result(),
            Err(GroveError::SkillExecution { ref leaf, .. }) if leaf == "fizzle"
        ));
        assert_eq!(failed.error.as_deref(), Some("no luck"));

        let history = tree.history().all();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn test_provider_unavailable() {
        let mut tree = Tree::new(
            "garden",
            Arc::new(KeywordIndex::new()),
            unavailable_router("local"),
            EngineConfig::new(0.2),
        );
        let math = tree.grow_branch("math", BranchSpec::new("m"), Some("local")).unwrap();
        tree.spawn_leaf(&math, "add", LeafSpec::new("adds numbers", add_skill(), add_schema()), None)
            .await
            .unwrap();

        let err = tree.execute("adds 1 and 2").await.unwrap_err();
        assert!(matches!(err, GroveError::ProviderUnavailable { ref provider, .. } if provider == "local"));
        assert_eq!(tree.history().len(), 1);
        assert_eq!(tree.history().all()[0].leaf, None);
    }

    #[tokio::test]
    async fn test_unregistered_hint_is_unavailable() {
        let mut tree = Tree::new(
            "garden",
            Arc::new(KeywordIndex::new()),
            mock_router("local", Arc::new(MockLlmClient::replying("{}"))),
            EngineConfig::new(0.2),
        );
        let math = tree.grow_branch("math", BranchSpec::new("m"), Some("ghost")).unwrap();
        tree.spawn_leaf(&math, "add", LeafSpec::new("adds numbers", add_skill(), add_schema()), None)
            .await
            .unwrap();
        let err = tree.execute("adds 1 and 2").await.unwrap_err();
        assert!(matches!(err, GroveError::ProviderUnavailable { ref reason, .. } if reason.contains("not registered")));
    }

    #[tokio::test]
    async fn test_routing_policy_without_hint() {
        let client = Arc::new(MockLlmClient::choosing("echo", json!({})));
        let mut router = ProviderRouter::with_factory(mock_factory(client));
        let mut pricey = grove_test_utils::mock_provider("pricey");
        pricey.cost_per_unit = 5.0;
        let mut cheap = grove_test_utils::mock_provider("cheap");
        cheap.cost_per_unit = 0.1;
        router.register(pricey).unwrap();
        router.register(cheap).unwrap();

        let config = EngineConfig::new(0.2).with_routing(RoutingConfig {
            policy: RoutePolicy::Cost { max_cost_per_unit: 1.0 },
            fallback: None,
        });
        let mut tree = Tree::new("garden", Arc::new(KeywordIndex::new()), router, config);
        let text = tree.grow_branch("text", BranchSpec::new("text"), None).unwrap();
        tree.spawn_leaf(&text, "echo", LeafSpec::new("echo text back", echo_skill(), ParameterSchema::default()), None)
            .await
            .unwrap();

        let result = tree.execute("echo text").await.unwrap();
        assert_eq!(result.selection, SelectionMethod::Model { provider: "cheap".into() });
        assert_eq!(result.result, Some(json!("echo text")));
    }

    #[tokio::test]
    async fn test_unsatisfiable_policy_is_unavailable() {
        let mut router = ProviderRouter::with_factory(mock_factory(Arc::new(MockLlmClient::replying("{}"))));
        let mut pricey = grove_test_utils::mock_provider("pricey");
        pricey.cost_per_unit = 5.0;
        router.register(pricey).unwrap();
        let config = EngineConfig::new(0.2).with_routing(RoutingConfig {
            policy: RoutePolicy::Cost { max_cost_per_unit: 0.0 },
            fallback: None,
        });
        let mut tree = Tree::new("garden", Arc::new(KeywordIndex::new()), router, config);
        let text = tree.grow_branch("text", BranchSpec::new("text"), None).unwrap();
        tree.spawn_leaf(&text, "echo", LeafSpec::new("echo text back", echo_skill(), ParameterSchema::default()), None)
            .await
            .unwrap();

        let err = tree.execute("echo text").await.unwrap_err();
        assert!(matches!(err, GroveError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_nested_branch_leaves_are_candidates() {
        let client = Arc::new(MockLlmClient::choosing("solve", json!({})));
        let mut tree = math_tree(client).await;
        let math = tree.branch("math").unwrap().id.clone();
        let algebra = tree.grow_sub_branch(&math, "algebra", BranchSpec::new("equations"), None).unwrap();
        tree.spawn_leaf(&algebra, "solve", LeafSpec::new("solves linear equations", label_skill("solved"), ParameterSchema::default()), None)
            .await
            .unwrap();

        let result = tree.execute("solves equations").await.unwrap();
        assert_eq!(result.branch, "math");
        assert_eq!(result.path, vec!["garden", "math", "algebra", "solve"]);
        assert_eq!(result.result, Some(json!("solved")));
    }

    #[tokio::test]
    async fn test_namesake_leaves_resolved_by_path() {
        let client = Arc::new(MockLlmClient::choosing("garden/math/floats/round", json!({})));
        let mut tree = math_tree(client.clone()).await;
        let math = tree.branch("math").unwrap().id.clone();
        for (sub, label) in [("ints", "int"), ("floats", "float")] {
            let id = tree.grow_sub_branch(&math, sub, BranchSpec::new("rounding"), None).unwrap();
            tree.spawn_leaf(&id, "round", LeafSpec::new("rounds numbers", label_skill(label), ParameterSchema::default()), None)
                .await
                .unwrap();
        }

        let result = tree.execute("rounds numbers").await.unwrap();
        assert_eq!(result.path, vec!["garden", "math", "floats", "round"]);
        assert_eq!(result.result, Some(json!("float")));
        assert!(!result.selection.is_fallback());

        let prompt = client.last_prompt().unwrap();
        assert!(prompt.contains("- round [garden/math/ints/round]: rounds numbers"));
        assert!(prompt.contains("- round [garden/math/floats/round]: rounds numbers"));
    }

    #[tokio::test]
    async fn test_required_defaults_fill_args() {
        let client = Arc::new(MockLlmClient::replying(tool_reply("greet", json!("not an object"))));
        let mut tree = Tree::new("garden", Arc::new(KeywordIndex::new()), mock_router("local", client), EngineConfig::new(0.2));
        let text = tree.grow_branch("text", BranchSpec::new("text"), None).unwrap();
        let greet = grove_core::skill::Skill::blocking(|input: SkillInput| {
            SkillResult::success(format!("hello {}", input.arg_str("name").unwrap_or("?")))
        });
        let schema = ParameterSchema::new(vec![ParamSpec::new("name", "string").optional("world")]);
        tree.spawn_leaf(&text, "greet", LeafSpec::new("greets someone", greet, schema), None)
            .await
            .unwrap();

        let result = tree.execute("greets").await.unwrap();
        assert_eq!(result.result, Some(json!("hello world")));
    }

    #[tokio::test]
    async fn test_index_failure_is_recorded() {
        let tree = Tree::new(
            "garden",
            Arc::new(BrokenIndex) as Arc<dyn SimilarityIndex>,
            mock_router("local", Arc::new(MockLlmClient::replying("{}"))),
            EngineConfig::new(0.2),
        );
        let err = tree.execute("anything").await.unwrap_err();
        assert!(matches!(err, GroveError::Index(_)));
        assert_eq!(tree.history().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_share_tree() {
        let client = Arc::new(MockLlmClient::choosing("add", json!({})));
        let tree = Arc::new(math_tree(client).await);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tree = tree.clone();
                tokio::spawn(async move { tree.execute(&format!("add {} and 1 numbers", i)).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().success);
        }
        assert_eq!(tree.history().len(), 8);
    }
}
