pub mod anthropic;
pub mod client;
pub mod factory;
pub mod gateway;
pub mod openai;
pub mod rate_limit;
pub mod shaping;

use async_trait::async_trait;
use homeagent_core::types::{ChatMessage, LLMResponse};
use homeagent_core::Result;
use serde_json::Value;

/// One model behind one endpoint. `tools` are already shaped for this
/// provider (see [`shaping`]).
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;
}

pub use anthropic::AnthropicProvider;
pub use factory::create_provider;
pub use gateway::{LlmGateway, ProviderEntry};
pub use openai::OpenAIProvider;
pub use rate_limit::IntervalLimiter;
pub use shaping::{SamplingProfile, ShapingProfile};
