pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use ordis_core::config::ProviderConfig;
use ordis_core::error::Result;
use ordis_core::traits::ModelProvider;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Build a provider for one `name` entry of the config, targeting `model`.
///
/// `kind` selects the wire dialect. Anything not recognized rides the
/// OpenAI-compatible client; hosted presets (groq, openrouter, together,
/// mistral, ...) differ only in `base_url` and headers.
pub fn build_provider(
    name: &str,
    model: &str,
    config: &ProviderConfig,
) -> Result<Arc<dyn ModelProvider>> {
    let provider: Arc<dyn ModelProvider> = match config.kind.as_str() {
        "anthropic" | "claude" => Arc::new(AnthropicProvider::new(name, model, config)),
        "ollama" => Arc::new(OllamaProvider::new(name, model, config)),
        _ => Arc::new(OpenAiProvider::new(name, model, config)),
    };
    Ok(provider)
}

/// Map a failed HTTP response into the provider error carrying its status.
pub(crate) async fn status_error(response: reqwest::Response) -> ordis_core::error::OrdisError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    ordis_core::error::OrdisError::Provider {
        status: Some(status),
        message: body,
    }
}
