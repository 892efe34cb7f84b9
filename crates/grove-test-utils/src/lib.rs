//! Mocks and fixtures shared by grove's unit and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use grove_core::config::{ProviderConfig, ProviderKind};
use grove_core::error::{GroveError, Result};
use grove_core::index::{rank_hits, IndexStats, ScopeFilter, ScoredHit, SimilarityIndex};
use grove_core::skill::{ParamSpec, ParameterSchema, Skill, SkillInput, SkillResult};
use grove_core::traits::LlmClient;
use grove_core::types::*;
use grove_llm::router::{ClientFactory, ProviderRouter};

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

/// Scripted LLM client.
///
/// Replies are consumed in order; once the script runs out every call gets
/// the default reply. `Err` entries fail the request with `LlmRequest`.
pub struct MockLlmClient {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    default_reply: std::result::Result<String, String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlmClient {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: Ok(reply.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: Err(message.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply choosing `tool` with the given input, in the disambiguation format.
    pub fn choosing(tool: &str, input: Value) -> Self {
        Self::replying(tool_reply(tool, input))
    }

    pub fn then(self, reply: std::result::Result<String, String>) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    /// Every message list sent so far.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Concatenated content of the last request.
    pub fn last_prompt(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|msgs| {
            msgs.iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

impl LlmClient for MockLlmClient {
    fn chat_stream(
        &self,
        _config: &ProviderConfig,
        _params: GenerationParams,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.requests.lock().unwrap().push(messages);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        Box::pin(async move {
            let text = reply.map_err(GroveError::LlmRequest)?;
            // Split into a few deltas so callers exercise reassembly.
            let chars: Vec<char> = text.chars().collect();
            let mut deltas: Vec<Result<StreamDelta>> = chars
                .chunks(8)
                .map(|c| Ok(StreamDelta::TextDelta(c.iter().collect())))
                .collect();
            deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, _>)
        })
    }
}

/// A disambiguation reply naming `tool`.
pub fn tool_reply(tool: &str, input: Value) -> String {
    serde_json::json!({ "tool": tool, "input": input }).to_string()
}

/// A local provider config that needs no credential.
pub fn mock_provider(id: &str) -> ProviderConfig {
    ProviderConfig::new(id, ProviderKind::Ollama, "mock-model")
}

/// Factory handing out the same mock client for every provider.
pub fn mock_factory(client: Arc<MockLlmClient>) -> Arc<ClientFactory> {
    Arc::new(move |_config: &ProviderConfig| Ok(client.clone() as Arc<dyn LlmClient>))
}

/// Router with one registered provider `id` backed by `client`.
pub fn mock_router(id: &str, client: Arc<MockLlmClient>) -> ProviderRouter {
    let mut router = ProviderRouter::with_factory(mock_factory(client));
    // Ids from mock_provider are never empty.
    let _ = router.register(mock_provider(id));
    router
}

/// Router whose client construction always fails.
pub fn unavailable_router(id: &str) -> ProviderRouter {
    let mut router = ProviderRouter::with_factory(Arc::new(|config: &ProviderConfig| {
        Err(GroveError::ProviderUnavailable {
            provider: config.id.clone(),
            reason: "mock provider offline".into(),
        })
    }));
    let _ = router.register(mock_provider(id));
    router
}

// ---------------------------------------------------------------------------
// Similarity index
// ---------------------------------------------------------------------------

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

struct KeywordEntry {
    seq: u64,
    tokens: HashSet<String>,
    description: Option<String>,
    metadata: Map<String, Value>,
}

/// The `Description:` line of an embedding text.
fn description_line(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix("Description: "))
        .map(|d| d.trim().to_lowercase())
}

/// Deterministic keyword-overlap index.
///
/// Score is the fraction of distinct query tokens present in the entry text,
/// so entries with identical text always tie exactly.
#[derive(Default)]
pub struct KeywordIndex {
    entries: RwLock<(HashMap<NodeId, KeywordEntry>, u64)>,
    exact_descriptions: bool,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like [`new`](Self::new), but a query equal to an entry's description
    /// scores 1.0 and every other entry is capped at half its overlap.
    pub fn preferring_descriptions() -> Self {
        Self {
            exact_descriptions: true,
            ..Self::default()
        }
    }

    pub fn score(query: &str, text: &str) -> f32 {
        let q = tokens(query);
        if q.is_empty() {
            return 0.0;
        }
        let t = tokens(text);
        q.intersection(&t).count() as f32 / q.len() as f32
    }
}

impl SimilarityIndex for KeywordIndex {
    fn index(
        &self,
        id: NodeId,
        text: String,
        metadata: Map<String, Value>,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut guard = self.entries.write().await;
            let (entries, next) = &mut *guard;
            let seq = match entries.get(&id) {
                Some(existing) => existing.seq,
                None => {
                    *next += 1;
                    *next
                }
            };
            entries.insert(
                id,
                KeywordEntry {
                    seq,
                    tokens: tokens(&text),
                    description: description_line(&text),
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
            let q = tokens(query);
            let wanted = query.trim().to_lowercase();
            let guard = self.entries.read().await;
            let scored = guard
                .0
                .iter()
                .filter(|(_, e)| scope.map_or(true, |s| s.matches(&e.metadata)))
                .map(|(id, e)| {
                    let overlap = if q.is_empty() {
                        0.0
                    } else {
                        q.intersection(&e.tokens).count() as f32 / q.len() as f32
                    };
                    let score = if !self.exact_descriptions {
                        overlap
                    } else if e.description.as_deref() == Some(wanted.as_str()) {
                        1.0
                    } else {
                        overlap * 0.5
                    };
                    (
                        e.seq,
                        ScoredHit {
                            id: id.clone(),
                            score,
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
        Box::pin(async move { Ok(self.entries.write().await.0.remove(&id).is_some()) })
    }

    fn len(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move { self.entries.read().await.0.len() })
    }

    fn stats(&self) -> BoxFuture<'_, IndexStats> {
        Box::pin(async move {
            IndexStats {
                total_entries: self.entries.read().await.0.len(),
                backend: "keyword".into(),
            }
        })
    }
}

/// Index whose every call fails, for error-path tests.
pub struct BrokenIndex;

impl SimilarityIndex for BrokenIndex {
    fn index(&self, _id: NodeId, _text: String, _metadata: Map<String, Value>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(GroveError::Index("index offline".into())) })
    }

    fn search<'a>(
        &'a self,
        _query: &'a str,
        _k: usize,
        _scope: Option<&'a ScopeFilter>,
    ) -> BoxFuture<'a, Result<Vec<ScoredHit>>> {
        Box::pin(async { Err(GroveError::Index("index offline".into())) })
    }

    fn remove(&self, _id: &NodeId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn len(&self) -> BoxFuture<'_, usize> {
        Box::pin(async { 1 })
    }

    fn stats(&self) -> BoxFuture<'_, IndexStats> {
        Box::pin(async { IndexStats::default() })
    }
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

/// Numbers appearing in free text, e.g. "add 2 and 3.5" -> [2.0, 3.5].
pub fn numbers_in(text: &str) -> Vec<f64> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .filter_map(|t| t.trim_matches('.').parse::<f64>().ok())
        .collect()
}

/// Sums `a` and `b` when given, otherwise every number in the query.
pub fn add_skill() -> Skill {
    Skill::blocking(|input: SkillInput| match (input.arg_f64("a"), input.arg_f64("b")) {
        (Some(a), Some(b)) => SkillResult::success(a + b),
        _ => {
            let nums = numbers_in(&input.query);
            if nums.is_empty() {
                SkillResult::failure("no numbers to add")
            } else {
                SkillResult::success(nums.iter().sum::<f64>())
            }
        }
    })
}

/// `a: number, b: number`, both optional so the query can carry the operands.
pub fn add_schema() -> ParameterSchema {
    let optional = |name: &str| ParamSpec {
        required: false,
        ..ParamSpec::new(name, "number")
    };
    ParameterSchema::new(vec![optional("a"), optional("b")])
}

/// Multiplies every number in the query.
pub fn multiply_skill() -> Skill {
    Skill::blocking(|input: SkillInput| {
        let nums = numbers_in(&input.query);
        if nums.is_empty() {
            SkillResult::failure("no numbers to multiply")
        } else {
            SkillResult::success(nums.iter().product::<f64>())
        }
    })
}

/// Returns the query unchanged, asynchronously.
pub fn echo_skill() -> Skill {
    Skill::future(|input: SkillInput| async move { SkillResult::success(input.query) })
}

/// Returns a fixed label, so tests can tell which leaf ran.
pub fn label_skill(label: &'static str) -> Skill {
    Skill::blocking(move |_| SkillResult::success(label))
}

pub fn failing_skill(message: &'static str) -> Skill {
    Skill::blocking(move |_| SkillResult::failure(message))
}

fn explode(_input: SkillInput) -> SkillResult {
    panic!("skill exploded")
}

async fn explode_async(_input: SkillInput) -> SkillResult {
    panic!("async skill exploded")
}

pub fn panicking_skill() -> Skill {
    Skill::blocking(explode)
}

pub fn panicking_async_skill() -> Skill {
    Skill::future(explode_async)
}
