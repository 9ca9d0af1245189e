use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use homeagent_core::types::{ChatMessage, FinishReason, LLMResponse};
use homeagent_core::{ComplexityTier, Config, Error, Result, ToolDefinition};
use tracing::{debug, info, warn};

use crate::factory::create_provider;
use crate::rate_limit::IntervalLimiter;
use crate::shaping::ShapingProfile;
use crate::Provider;

/// One configured provider: a driver per complexity tier plus its shaping
/// rules and optional request-interval limiter.
pub struct ProviderEntry {
    tiers: [Arc<dyn Provider>; 3],
    shaping: ShapingProfile,
    limiter: Option<IntervalLimiter>,
}

impl ProviderEntry {
    pub fn new(tiers: [Arc<dyn Provider>; 3], shaping: ShapingProfile) -> Self {
        Self {
            tiers,
            shaping,
            limiter: None,
        }
    }

    /// The same driver for every tier.
    pub fn single(provider: Arc<dyn Provider>, shaping: ShapingProfile) -> Self {
        Self::new([provider.clone(), provider.clone(), provider], shaping)
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.limiter = Some(IntervalLimiter::new(interval));
        }
        self
    }

    fn tier(&self, tier: ComplexityTier) -> &Arc<dyn Provider> {
        &self.tiers[u8::from(tier) as usize]
    }
}

/// Single entry point for model calls: picks provider and model, shapes
/// the request, rate-limits, retries transient failures and validates the
/// response shape.
pub struct LlmGateway {
    providers: HashMap<String, ProviderEntry>,
    default_provider: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl LlmGateway {
    pub fn new(default_provider: &str, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.to_string(),
            max_retries,
            retry_delay,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = &config.agent;
        let mut gateway = Self::new(
            &defaults.default_provider,
            defaults.llm_max_retries,
            Duration::from_millis(defaults.llm_retry_delay_ms),
        );
        for (name, provider_config) in &config.providers {
            let tiers = [
                create_provider(name, provider_config, ComplexityTier::Cheap, defaults)?,
                create_provider(name, provider_config, ComplexityTier::Default, defaults)?,
                create_provider(name, provider_config, ComplexityTier::Heavy, defaults)?,
            ];
            let entry = ProviderEntry::new(tiers, ShapingProfile::resolve(name, provider_config))
                .with_min_interval(Duration::from_millis(provider_config.min_request_interval_ms));
            gateway.register(name, entry);
        }
        if !gateway.providers.contains_key(&gateway.default_provider) {
            return Err(Error::Config(format!(
                "default provider '{}' is not configured",
                gateway.default_provider
            )));
        }
        Ok(gateway)
    }

    pub fn register(&mut self, name: &str, entry: ProviderEntry) {
        debug!(provider = name, "Registering LLM provider");
        self.providers.insert(name.to_string(), entry);
    }

    /// Run one completion. Only `stop` and `tool_calls` responses are
    /// returned; every other outcome is a `Provider` error.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tier: ComplexityTier,
        provider_override: Option<&str>,
    ) -> Result<LLMResponse> {
        let name = match provider_override {
            Some(name) if self.providers.contains_key(name) => name,
            Some(name) => {
                warn!(provider = name, fallback = %self.default_provider, "Unknown provider override, using default");
                self.default_provider.as_str()
            }
            None => self.default_provider.as_str(),
        };
        let entry = self
            .providers
            .get(name)
            .ok_or_else(|| Error::Config(format!("provider '{}' is not configured", name)))?;

        let shaped_tools = entry.shaping.shape_tools(tools);
        let driver = entry.tier(tier);
        let attempts = self.max_retries + 1;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let _permit = match &entry.limiter {
                    Some(limiter) => Some(limiter.acquire().await),
                    None => None,
                };
                driver.chat(messages, &shaped_tools).await
            };

            match result {
                Ok(response) => {
                    validate_response(&response)?;
                    return Ok(response);
                }
                Err(Error::ProviderTransient(msg)) if attempt < attempts => {
                    warn!(
                        provider = name,
                        attempt,
                        max_attempts = attempts,
                        error = %msg,
                        "Transient LLM failure, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(Error::ProviderTransient(msg)) => {
                    info!(provider = name, attempts, "LLM retries exhausted");
                    return Err(Error::Provider(format!(
                        "{} failed after {} attempts: {}",
                        name, attempts, msg
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn validate_response(response: &LLMResponse) -> Result<()> {
    match response.finish() {
        Some(FinishReason::Stop) => Ok(()),
        Some(FinishReason::ToolCalls) if !response.tool_calls.is_empty() => Ok(()),
        Some(FinishReason::ToolCalls) => Err(Error::Provider(
            "finish reason tool_calls without any tool call".to_string(),
        )),
        None => Err(Error::Provider(format!(
            "unexpected finish reason '{}'",
            response.finish_reason
        ))),
    }
}
