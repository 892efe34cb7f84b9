use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use grove_core::config::{ProviderConfig, RoutePolicy};
use grove_core::error::{GroveError, Result};
use grove_core::traits::LlmClient;

use crate::providers::presets::affinity_kinds;

/// Builds a client for a provider config.
pub type ClientFactory = dyn Fn(&ProviderConfig) -> Result<Arc<dyn LlmClient>> + Send + Sync;

/// Registry of providers with policy-based selection and a lazy client cache.
///
/// Registration order is significant: it breaks every tie.
pub struct ProviderRouter {
    providers: Vec<ProviderConfig>,
    factory: Arc<ClientFactory>,
    clients: RwLock<HashMap<String, Arc<dyn LlmClient>>>,
}

impl ProviderRouter {
    /// Router building real HTTP clients.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(crate::create_client))
    }

    pub fn with_factory(factory: Arc<ClientFactory>) -> Self {
        Self {
            providers: Vec::new(),
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider. Re-registering an id replaces its config in
    /// place and drops any cached client.
    pub fn register(&mut self, config: ProviderConfig) -> Result<()> {
        if config.id.is_empty() {
            return Err(GroveError::Config("provider id must not be empty".into()));
        }
        self.clients.get_mut().remove(&config.id);
        match self.providers.iter_mut().find(|p| p.id == config.id) {
            Some(slot) => *slot = config,
            None => self.providers.push(config),
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<ProviderConfig> {
        self.clients.get_mut().remove(id);
        let pos = self.providers.iter().position(|p| p.id == id)?;
        Some(self.providers.remove(pos))
    }

    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn first(&self) -> Result<&ProviderConfig> {
        self.providers
            .first()
            .ok_or_else(|| GroveError::NoProviderMeetsConstraint("no providers registered".into()))
    }

    /// Cheapest provider at or under `max_cost_per_unit`.
    /// Ties go to the faster provider, then the earlier registration.
    pub fn route_by_cost(&self, max_cost_per_unit: f64) -> Result<&ProviderConfig> {
        self.providers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.cost_per_unit <= max_cost_per_unit)
            .min_by(|(ia, a), (ib, b)| {
                cmp_f64(a.cost_per_unit, b.cost_per_unit)
                    .then_with(|| cmp_f64(b.speed_score, a.speed_score))
                    .then_with(|| ia.cmp(ib))
            })
            .map(|(_, p)| p)
            .ok_or_else(|| {
                GroveError::NoProviderMeetsConstraint(format!(
                    "no provider with cost_per_unit <= {}",
                    max_cost_per_unit
                ))
            })
    }

    /// Fastest provider at or above `min_speed_score`.
    /// Ties go to the cheaper provider, then the earlier registration.
    pub fn route_by_speed(&self, min_speed_score: f64) -> Result<&ProviderConfig> {
        self.providers
            .iter()
            .enumerate()
            .filter(|(_, p)| p.speed_score >= min_speed_score)
            .min_by(|(ia, a), (ib, b)| {
                cmp_f64(b.speed_score, a.speed_score)
                    .then_with(|| cmp_f64(a.cost_per_unit, b.cost_per_unit))
                    .then_with(|| ia.cmp(ib))
            })
            .map(|(_, p)| p)
            .ok_or_else(|| {
                GroveError::NoProviderMeetsConstraint(format!(
                    "no provider with speed_score >= {}",
                    min_speed_score
                ))
            })
    }

    /// Provider best suited to a skill tag.
    ///
    /// A provider with explicit `affinity_tags` is ranked by the tag's
    /// position in that list; otherwise by its kind's position in the static
    /// affinity table. With no match the first registered provider is used.
    pub fn route_by_skill_affinity(&self, tag: &str) -> Result<&ProviderConfig> {
        let first = self.first()?;
        let best = self
            .providers
            .iter()
            .enumerate()
            .filter_map(|(i, p)| affinity_rank(p, tag).map(|rank| (rank, i, p)))
            .min_by_key(|(rank, i, _)| (*rank, *i));

        match best {
            Some((_, _, p)) => Ok(p),
            None => {
                debug!(tag, provider = %first.id, "No affinity match, using first provider");
                Ok(first)
            }
        }
    }

    /// Apply a policy, trying `fallback` only when the policy itself finds
    /// nothing.
    pub fn route(&self, policy: &RoutePolicy, fallback: Option<&str>) -> Result<&ProviderConfig> {
        let primary = match policy {
            RoutePolicy::First => self.first(),
            RoutePolicy::Named { provider } => self.get(provider).ok_or_else(|| {
                GroveError::NoProviderMeetsConstraint(format!("provider '{}' is not registered", provider))
            }),
            RoutePolicy::Cost { max_cost_per_unit } => self.route_by_cost(*max_cost_per_unit),
            RoutePolicy::Speed { min_speed_score } => self.route_by_speed(*min_speed_score),
            RoutePolicy::SkillAffinity { tag } => self.route_by_skill_affinity(tag),
        };

        match (primary, fallback) {
            (Ok(p), _) => {
                debug!(provider = %p.id, ?policy, "Provider routed");
                Ok(p)
            }
            (Err(e), Some(fb)) => {
                let p = self.get(fb).ok_or_else(|| {
                    GroveError::NoProviderMeetsConstraint(format!(
                        "{}; fallback provider '{}' is not registered",
                        e, fb
                    ))
                })?;
                warn!(provider = %p.id, error = %e, "Routing policy unmet, using fallback provider");
                Ok(p)
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Client for a registered provider, built on first use and cached for
    /// the router's lifetime.
    ///
    /// Construction has no side effects, so two racing misses may both build;
    /// the first inserted client wins. Failures are not cached.
    pub async fn client(&self, id: &str) -> Result<Arc<dyn LlmClient>> {
        if let Some(client) = self.clients.read().await.get(id) {
            return Ok(client.clone());
        }

        let config = self.get(id).ok_or_else(|| GroveError::ProviderUnavailable {
            provider: id.to_string(),
            reason: "not registered".into(),
        })?;

        let client = (self.factory)(config).map_err(|e| match e {
            GroveError::ProviderUnavailable { .. } => e,
            other => GroveError::ProviderUnavailable {
                provider: id.to_string(),
                reason: other.to_string(),
            },
        })?;

        info!(provider = %id, kind = %config.kind, model = %config.model, "LLM client initialized");
        let mut clients = self.clients.write().await;
        Ok(clients.entry(id.to_string()).or_insert(client).clone())
    }

    /// Number of clients built so far.
    pub async fn cached_clients(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.ids())
            .finish_non_exhaustive()
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn affinity_rank(provider: &ProviderConfig, tag: &str) -> Option<usize> {
    if provider.affinity_tags.is_empty() {
        affinity_kinds(tag).iter().position(|k| *k == provider.kind)
    } else {
        provider
            .affinity_tags
            .iter()
            .position(|t| t.eq_ignore_ascii_case(tag))
    }
}
