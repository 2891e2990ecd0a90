use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::ChatProvider;
use crate::errors::ProviderError;

/// Default Anthropic API endpoint
const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";

/// Maximum tokens requested per translation exchange
const MAX_TOKENS: u32 = 4096;

/// Anthropic client for interacting with the messages API
#[derive(Debug)]
pub struct AnthropicChat {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// Model name
    model: String,
}

/// Anthropic message request
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    /// The model to use
    model: String,
    /// The messages for the conversation
    messages: Vec<AnthropicMessage>,
    /// System prompt to guide the model
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Maximum number of tokens to generate
    max_tokens: u32,
}

/// Anthropic message format
#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    role: String,
    /// Content of the message
    content: String,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    /// The content blocks of the response
    content: Vec<AnthropicContent>,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
struct AnthropicContent {
    /// The type of content
    #[serde(rename = "type")]
    content_type: String,
    /// The actual text content; absent for non-text blocks
    #[serde(default)]
    text: String,
}

impl AnthropicChat {
    /// Create a new Anthropic client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn api_url(&self) -> String {
        format!("{}/v1/messages", DEFAULT_ENDPOINT)
    }

    async fn send_request(
        &self,
        request: &AnthropicRequest,
    ) -> Result<AnthropicResponse, ProviderError> {
        let response = self
            .client
            .post(self.api_url())
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
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
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl ChatProvider for AnthropicChat {
    async fn chat(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ProviderError> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: user_message.to_string(),
            }],
            system: Some(system_prompt.to_string()),
            temperature: Some(0.3),
            max_tokens: MAX_TOKENS,
        };

        let response = self.send_request(&request).await?;
        let text: String = response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect();

        if text.is_empty() {
            return Err(ProviderError::ParseError(
                "response contained no text blocks".to_string(),
            ));
        }
        Ok(text)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.chat("You are a helpful assistant.", "Say OK.").await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Claude"
    }
}
