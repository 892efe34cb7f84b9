pub mod providers;
pub mod retry;
pub mod router;
pub mod streaming;

use std::sync::Arc;
use std::time::Duration;

use grove_core::config::ProviderConfig;
use grove_core::error::{GroveError, Result};
use grove_core::traits::LlmClient;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use providers::presets::{preset_for, Dialect};
pub use retry::RetryingClient;
pub use router::{ClientFactory, ProviderRouter};

/// Build a client for a provider config.
///
/// Resolves the endpoint and credential from the config, falling back to
/// the kind's preset. The credential is read from the environment here and
/// held only by the client.
pub fn create_client(config: &ProviderConfig) -> Result<Arc<dyn LlmClient>> {
    let unavailable = |reason: String| GroveError::ProviderUnavailable {
        provider: config.id.clone(),
        reason,
    };
    let preset = preset_for(config.kind);

    let endpoint = config
        .endpoint
        .clone()
        .or_else(|| preset.default_endpoint.map(String::from))
        .ok_or_else(|| unavailable(format!("no endpoint configured for kind '{}'", config.kind)))?;

    let api_key = resolve_credential(config).map_err(unavailable)?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| unavailable(format!("HTTP client build failed: {}", e)))?;

    let client: Arc<dyn LlmClient> = match preset.dialect {
        Dialect::Anthropic => {
            let api_key = api_key.ok_or_else(|| unavailable("no credential configured".into()))?;
            Arc::new(AnthropicClient::new(http, endpoint, api_key))
        }
        Dialect::OpenAi => Arc::new(OpenAiClient::new(http, endpoint, api_key)),
    };

    Ok(match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(client, retry.clone())),
        None => client,
    })
}

/// Read the credential named by the config (or the kind's default variable).
///
/// A referenced variable that is unset is an error; kinds without a default
/// variable may run without one.
fn resolve_credential(config: &ProviderConfig) -> std::result::Result<Option<String>, String> {
    let var = config
        .credential_ref
        .as_deref()
        .or(preset_for(config.kind).credential_env);
    match var {
        Some(var) => match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            _ => Err(format!("credential environment variable '{}' is not set", var)),
        },
        None => Ok(None),
    }
}
