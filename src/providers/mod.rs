/*!
 * Provider implementations for LLM chat services.
 *
 * Every provider exposes the same one-shot chat contract; they differ only
 * in endpoint, auth header shape, request body key names, and the path to
 * the assistant text in the response. Retry and batching policy live above
 * this layer in `translation::batch`.
 */

pub mod anthropic;
pub mod mock;
pub mod openai;

use async_trait::async_trait;

use crate::app_config::{LlmProvider, Settings};
use crate::errors::ProviderError;

/// Uniform chat interface over the supported LLM providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send one system+user exchange and return the assistant text
    async fn chat(&self, system_prompt: &str, user_message: &str)
    -> Result<String, ProviderError>;

    /// Cheap connectivity and credential check
    async fn test_connection(&self) -> Result<(), ProviderError>;

    /// Human-readable provider name for logs
    fn name(&self) -> &str;
}

/// Build the configured client for a provider id.
///
/// The OpenAI-compatible wire shape serves OpenAI, DeepSeek, and GLM with
/// different endpoints; Anthropic uses its own message shape.
pub fn build_provider(settings: &Settings, provider: LlmProvider) -> Box<dyn ChatProvider> {
    let api_key = settings.api_key_for(provider).to_string();
    let model = settings.model_for(provider).to_string();
    let timeout_secs = settings.llm_timeout_secs;

    match provider {
        LlmProvider::Claude => Box::new(anthropic::AnthropicChat::new(
            api_key,
            model,
            timeout_secs,
        )),
        LlmProvider::OpenAI | LlmProvider::DeepSeek | LlmProvider::Glm => {
            let base_url = settings
                .base_url_for(provider)
                .map(str::to_string)
                .unwrap_or_else(|| openai::default_base_url(provider).to_string());
            Box::new(openai::OpenAiCompatChat::new(
                provider.display_name(),
                api_key,
                base_url,
                model,
                timeout_secs,
            ))
        }
    }
}
