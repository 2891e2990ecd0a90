use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::ChatProvider;
use crate::app_config::LlmProvider;
use crate::errors::ProviderError;

/// Client for OpenAI-compatible chat completion APIs.
///
/// OpenAI, DeepSeek, and GLM all speak this wire shape: Bearer auth,
/// `POST {base}/chat/completions`, assistant text at
/// `choices[0].message.content`.
#[derive(Debug)]
pub struct OpenAiCompatChat {
    /// Display name used in logs and errors
    provider_name: &'static str,
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// API endpoint base URL
    base_url: String,
    /// Model name
    model: String,
}

/// Default endpoint for each OpenAI-compatible provider
pub fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAI => "https://api.openai.com/v1",
        LlmProvider::DeepSeek => "https://api.deepseek.com",
        LlmProvider::Glm => "https://open.bigmodel.cn/api/paas/v4",
        LlmProvider::Claude => unreachable!("Claude is not OpenAI-compatible"),
    }
}

/// Chat completion request body
#[derive(Debug, Serialize)]
struct ChatRequest {
    /// The model to use
    model: String,
    /// The conversation messages
    messages: Vec<ChatMessage>,
    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// One chat message
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    /// Role of the message sender (system, user, assistant)
    role: String,
    /// Content of the message
    content: String,
}

/// Chat completion response body
#[derive(Debug, Deserialize)]
struct ChatResponse {
    /// Completion choices; the first carries the assistant message
    choices: Vec<ChatChoice>,
}

/// One completion choice
#[derive(Debug, Deserialize)]
struct ChatChoice {
    /// The assistant message
    message: ChatMessage,
}

impl OpenAiCompatChat {
    /// Create a new client
    pub fn new(
        provider_name: &'static str,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            provider_name,
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self
            .client
            .post(self.api_url())
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::ConnectionError(format!("Request timed out: {}", e))
                } else if e.is_connect() {
                    ProviderError::ConnectionError(format!("Connection failed: {}", e))
                } else {
                    ProviderError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());

            return match status.as_u16() {
                429 => Err(ProviderError::RateLimitExceeded(error_text)),
                401 | 403 => Err(ProviderError::AuthenticationError(error_text)),
                _ => Err(ProviderError::ApiError {
                    status_code: status.as_u16(),
                    message: error_text,
                }),
            };
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatChat {
    async fn chat(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message.to_string(),
                },
            ],
            temperature: Some(0.3),
        };

        let response = self.send_request(&request).await?;
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ProviderError::ParseError("response contained no choices".to_string())
        })?;
        Ok(choice.message.content)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.chat("You are a helpful assistant.", "Say OK.").await?;
        Ok(())
    }

    fn name(&self) -> &str {
        self.provider_name
    }
}
