use std::sync::Arc;
use std::time::Duration;

use homeagent_core::config::{AgentDefaults, ProviderConfig, ProviderKind};
use homeagent_core::{ComplexityTier, Error, Result};

use crate::{AnthropicProvider, OpenAIProvider, Provider};

/// Default API base for well-known OpenAI-compatible providers.
fn default_api_base(provider_name: &str) -> &'static str {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "mistral" => "https://api.mistral.ai/v1",
        "kimi" | "moonshot" => "https://api.moonshot.cn/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Build the driver for one tier of a configured provider.
pub fn create_provider(
    name: &str,
    config: &ProviderConfig,
    tier: ComplexityTier,
    defaults: &AgentDefaults,
) -> Result<Arc<dyn Provider>> {
    let model = config.models.for_tier(tier);
    if model.trim().is_empty() {
        return Err(Error::Config(format!(
            "provider '{}' has no model for tier {}",
            name,
            u8::from(tier)
        )));
    }
    let timeout = Duration::from_secs(config.timeout_secs);
    let proxy = config.proxy.as_deref();

    let provider: Arc<dyn Provider> = match config.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            &config.api_key,
            config.api_base.as_deref(),
            model,
            defaults.max_tokens,
            defaults.temperature,
            proxy,
            timeout,
        )),
        ProviderKind::OpenAi => {
            let api_base = config
                .api_base
                .as_deref()
                .unwrap_or_else(|| default_api_base(name));
            Arc::new(OpenAIProvider::new_with_client(
                &config.api_key,
                Some(api_base),
                model,
                defaults.max_tokens,
                defaults.temperature,
                proxy,
                timeout,
            ))
        }
    };
    Ok(provider)
}
