pub mod anthropic;
pub mod factory;
pub mod openai;

use async_trait::async_trait;
use gptbridge_core::types::{ChatMessage, LLMResponse};
use gptbridge_core::Result;
use serde_json::Value;

#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse>;

    fn name(&self) -> &'static str;
}

pub use anthropic::AnthropicProvider;
pub use factory::{create_provider, infer_provider_from_model};
pub use openai::OpenAIProvider;
