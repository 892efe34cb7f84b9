use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GroveError, Result};
use crate::node::{DEFAULT_BRANCH_MAX_TOKENS, DEFAULT_BRANCH_TEMPERATURE};
use crate::skill::ParameterSchema;

/// Language-model backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Grok,
    Ollama,
    LmStudio,
    /// Any other OpenAI-compatible endpoint.
    Compatible,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Grok => "grok",
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
            Self::Compatible => "compatible",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = GroveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "grok" | "xai" => Ok(Self::Grok),
            "ollama" => Ok(Self::Ollama),
            "lmstudio" => Ok(Self::LmStudio),
            "compatible" => Ok(Self::Compatible),
            other => Err(GroveError::Config(format!("unknown provider kind: {}", other))),
        }
    }
}

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// One registered language-model backend.
///
/// Credentials are referenced by environment variable name and resolved when
/// the client is built; the secret itself never lives in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key. Filled from the map key when loaded from a document.
    #[serde(default, skip_serializing)]
    pub id: String,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    /// Cost per 1k tokens.
    #[serde(default)]
    pub cost_per_unit: f64,
    /// Relative speed, higher is faster.
    #[serde(default = "default_speed_score")]
    pub speed_score: f64,
    #[serde(default = "default_provider_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_max_output")]
    pub default_max_output: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affinity_tags: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

fn default_speed_score() -> f64 { 1.0 }
fn default_provider_temperature() -> f32 { 0.7 }
fn default_max_output() -> u32 { 2000 }
fn default_timeout_secs() -> u64 { 60 }

impl ProviderConfig {
    pub fn new(id: impl Into<String>, kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            model: model.into(),
            endpoint: None,
            credential_ref: None,
            cost_per_unit: 0.0,
            speed_score: default_speed_score(),
            default_temperature: default_provider_temperature(),
            default_max_output: default_max_output(),
            affinity_tags: vec![],
            timeout_secs: default_timeout_secs(),
            retry: None,
        }
    }

    pub fn with_cost(mut self, cost_per_unit: f64) -> Self {
        self.cost_per_unit = cost_per_unit;
        self
    }

    pub fn with_speed(mut self, speed_score: f64) -> Self {
        self.speed_score = speed_score;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credential_ref(mut self, env_var: impl Into<String>) -> Self {
        self.credential_ref = Some(env_var.into());
        self
    }

    pub fn with_affinity(mut self, tags: Vec<String>) -> Self {
        self.affinity_tags = tags;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Provider selection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RoutePolicy {
    /// The first registered provider.
    First,
    /// A specific provider id.
    Named { provider: String },
    /// Cheapest provider at or under the bound.
    Cost { max_cost_per_unit: f64 },
    /// Fastest provider at or above the bound.
    Speed { min_speed_score: f64 },
    /// Provider whose affinity table best matches the tag.
    SkillAffinity { tag: String },
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self::First
    }
}

/// Policy plus an explicit provider to use when the policy finds nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(flatten)]
    pub policy: RoutePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Execution engine tuning.
///
/// `min_similarity` has no default: every deployment must choose its own
/// threshold for "no match" because scores depend on the embedding backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub min_similarity: f32,
    /// Leaf candidates presented for disambiguation.
    #[serde(default = "default_leaf_top_k")]
    pub leaf_top_k: usize,
    /// Entries fetched for branch aggregation (None = every entry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_search_k: Option<usize>,
    /// Concurrent synchronous skill invocations.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Provider choice for branches without a provider hint.
    #[serde(default)]
    pub routing: RoutingConfig,
}

fn default_leaf_top_k() -> usize { 3 }
fn default_worker_pool_size() -> usize { 4 }

impl EngineConfig {
    pub fn new(min_similarity: f32) -> Self {
        Self {
            min_similarity,
            leaf_top_k: default_leaf_top_k(),
            branch_search_k: None,
            worker_pool_size: default_worker_pool_size(),
            routing: RoutingConfig::default(),
        }
    }

    pub fn with_leaf_top_k(mut self, k: usize) -> Self {
        self.leaf_top_k = k.max(1);
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size.max(1);
        self
    }

    pub fn with_routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = routing;
        self
    }
}

/// Serialized form of a leaf. The callable is referenced by catalog key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub skill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "ParameterSchema::is_empty")]
    pub parameters: ParameterSchema,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Serialized form of a branch and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDocument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_branch_temperature")]
    pub temperature: f32,
    #[serde(default = "default_branch_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leaves: Vec<LeafDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<BranchDocument>,
}

fn default_branch_temperature() -> f32 { DEFAULT_BRANCH_TEMPERATURE }
fn default_branch_max_tokens() -> u32 { DEFAULT_BRANCH_MAX_TOKENS }

impl BranchDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            provider_id: None,
            system_prompt: String::new(),
            temperature: DEFAULT_BRANCH_TEMPERATURE,
            max_tokens: DEFAULT_BRANCH_MAX_TOKENS,
            metadata: Map::new(),
            leaves: vec![],
            branches: vec![],
        }
    }
}

/// Tree configuration document: `{name, branches, providers, engine}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub branches: Vec<BranchDocument>,
    #[serde(default, with = "provider_map")]
    pub providers: Vec<ProviderConfig>,
}

/// On-disk document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// `.toml` files are TOML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

impl TreeDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: None,
            branches: vec![],
            providers: vec![],
        }
    }

    /// Load a document, expanding `${ENV_VAR}` references first.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| GroveError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content, DocumentFormat::from_path(path))
    }

    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self> {
        let expanded = expand_env_vars(content);
        match format {
            DocumentFormat::Toml => {
                toml::from_str(&expanded).map_err(|e| GroveError::Config(e.to_string()))
            }
            DocumentFormat::Json => Ok(serde_json::from_str(&expanded)?),
        }
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String> {
        match format {
            DocumentFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| GroveError::Config(e.to_string()))
            }
            DocumentFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let rendered = self.render(DocumentFormat::from_path(path))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, rendered).await?;
        Ok(())
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

/// Serialize the provider list as an id-keyed map, preserving document order.
mod provider_map {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::ProviderConfig;

    pub fn serialize<S: Serializer>(
        providers: &[ProviderConfig],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(providers.len()))?;
        for p in providers {
            map.serialize_entry(&p.id, p)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<ProviderConfig>, D::Error> {
        struct ProviderMapVisitor;

        impl<'de> Visitor<'de> for ProviderMapVisitor {
            type Value = Vec<ProviderConfig>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of provider id to provider config")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some((id, mut config)) =
                    access.next_entry::<String, ProviderConfig>()?
                {
                    config.id = id;
                    out.push(config);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(ProviderMapVisitor)
    }
}

/// Expand `${ENV_VAR}` patterns in a string. Unset variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();
        let mut var_name = String::new();
        for c in chars.by_ref() {
            if c == '}' {
                break;
            }
            var_name.push(c);
        }
        match std::env::var(&var_name) {
            Ok(val) => result.push_str(&val),
            Err(_) => result.push_str(&format!("${{{}}}", var_name)),
        }
    }
    result
}
