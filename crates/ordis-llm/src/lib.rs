pub mod chain;
pub mod decode;
pub mod providers;

use std::time::Duration;

use ordis_core::config::{AgentConfig, AppConfig, ProviderConfig};
use ordis_core::error::Result;

pub use chain::{ChainEntry, ChainOutcome, FallbackChain, FallbackFn};
pub use decode::{decode_stream, repair_partial_json, StreamDecoder, WireDialect};
pub use providers::{build_provider, AnthropicProvider, OllamaProvider, OpenAiProvider};

/// Build the fallback chain for one agent from its `model` plus `fallbacks`
/// list. Chain position sets the priority; config reload builds a fresh
/// chain rather than mutating an existing one.
pub fn build_chain(config: &AppConfig, agent: &AgentConfig) -> Result<FallbackChain> {
    let mut entries = Vec::new();

    for (priority, spec) in agent.model_specs().into_iter().enumerate() {
        let (provider_name, model) = AgentConfig::split_model_spec(spec)?;
        let provider_config = config
            .providers
            .get(provider_name)
            .cloned()
            .unwrap_or_else(|| default_provider_config(provider_name));
        let provider = build_provider(provider_name, model, &provider_config)?;
        entries.push(ChainEntry {
            provider,
            priority: priority as u32,
        });
    }

    Ok(FallbackChain::new(
        entries,
        Duration::from_secs(config.timeouts.model_secs),
    ))
}

/// Provider defaults when the config has no `[providers.<name>]` section:
/// the name itself selects the dialect, keys come from the environment.
fn default_provider_config(name: &str) -> ProviderConfig {
    let env_key = format!("{}_API_KEY", name.to_uppercase().replace('-', "_"));
    ProviderConfig {
        kind: name.to_string(),
        base_url: None,
        api_key: std::env::var(&env_key).ok(),
        extra_headers: Default::default(),
    }
}
