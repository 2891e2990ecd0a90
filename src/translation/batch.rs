//! Batch translation with retry, backoff, and count-mismatch halving.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::prompts;
use crate::app_config::{LlmProvider, Settings};
use crate::errors::ProviderError;
use crate::providers::{ChatProvider, build_provider};

/// Why a batch translation stopped without a result
#[derive(Debug)]
pub enum BatchError {
    /// The task's cancellation token fired; the in-flight request is
    /// considered not applied
    Cancelled,
    /// Terminal provider failure (auth, exhausted retries, bad response)
    Provider(ProviderError),
}

impl From<ProviderError> for BatchError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("translation cancelled"),
            Self::Provider(e) => write!(f, "{}", e),
        }
    }
}

/// Outcome of a provider health check
#[derive(Debug)]
pub enum HealthStatus {
    /// Provider reachable and credentials accepted
    Ok,
    /// Credentials rejected
    AuthError(String),
    /// Provider unreachable or misbehaving
    NetError(String),
}

/// Exponential backoff parameters for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum total attempts (first try included)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    pub cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            cap_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given 1-based attempt, with jitter
    fn delay_after(&self, attempt: u32) -> Duration {
        let exp_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(self.cap_ms);
        let jitter = rand::rng().random_range(0.5..1.0);
        Duration::from_millis((exp_ms as f64 * jitter) as u64)
    }
}

/// Translates batches of dialogue texts through a chat provider
pub struct BatchTranslator {
    provider: Box<dyn ChatProvider>,
    source_language: String,
    target_language: String,
    retry: RetryPolicy,
}

impl BatchTranslator {
    /// Build a translator for the configured provider
    pub fn from_settings(settings: &Settings, provider_id: LlmProvider) -> Self {
        Self::with_provider(
            build_provider(settings, provider_id),
            settings.source_language.clone(),
            settings.target_language.clone(),
        )
    }

    /// Build a translator around an existing provider client
    pub fn with_provider(
        provider: Box<dyn ChatProvider>,
        source_language: String,
        target_language: String,
    ) -> Self {
        Self {
            provider,
            source_language,
            target_language,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy (tests use short delays)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Provider name for logs
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Translate a batch of texts, preserving count and order.
    ///
    /// On a count mismatch the batch is split in half and each half retried
    /// recursively; a mismatch on a single-item batch accepts the whole
    /// response as the sole translation.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, BatchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.translate_slice(texts, cancel).await
    }

    fn translate_slice<'a>(
        &'a self,
        texts: &'a [String],
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<String>, BatchError>> {
        async move {
            let system = prompts::system_prompt(&self.source_language, &self.target_language);
            let user = prompts::batch_user_message(texts);

            let response = self.chat_with_retry(&system, &user, cancel).await?;
            let items = prompts::parse_numbered_response(&response);

            if items.len() == texts.len() {
                return Ok(items);
            }

            if texts.len() == 1 {
                // A lone text that came back unnumbered is still a usable
                // translation.
                let sole = if items.len() == 1 {
                    items.into_iter().next().unwrap_or_default()
                } else {
                    response.trim().to_string()
                };
                return Ok(vec![sole]);
            }

            warn!(
                "{}: expected {} translations, got {}; halving batch",
                self.provider.name(),
                texts.len(),
                items.len()
            );
            let mid = texts.len() / 2;
            let mut left = self.translate_slice(&texts[..mid], cancel).await?;
            let right = self.translate_slice(&texts[mid..], cancel).await?;
            left.extend(right);
            Ok(left)
        }
        .boxed()
    }

    /// One chat exchange with the retry policy applied.
    ///
    /// Transient failures back off exponentially with jitter up to
    /// `max_attempts`; malformed response bodies get exactly one immediate
    /// retry; authentication failures are terminal.
    async fn chat_with_retry(
        &self,
        system: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BatchError> {
        let mut attempt: u32 = 0;
        let mut parse_retry_used = false;

        loop {
            if cancel.is_cancelled() {
                return Err(BatchError::Cancelled);
            }
            attempt += 1;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(BatchError::Cancelled),
                r = self.provider.chat(system, user) => r,
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_auth() => {
                    warn!("{}: authentication failure, not retrying", self.provider.name());
                    return Err(e.into());
                }
                Err(ProviderError::ParseError(msg)) => {
                    if parse_retry_used {
                        return Err(ProviderError::ParseError(msg).into());
                    }
                    parse_retry_used = true;
                    debug!("{}: malformed response, retrying once", self.provider.name());
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    debug!(
                        "{}: transient error ({}), retrying in {:?} (attempt {}/{})",
                        self.provider.name(),
                        e,
                        delay,
                        attempt,
                        self.retry.max_attempts
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(BatchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// One-word trivial translation used as the provider health probe
    pub async fn healthcheck(&self) -> HealthStatus {
        let system = prompts::system_prompt(&self.source_language, &self.target_language);
        match self.provider.chat(&system, "1. Hello\n").await {
            Ok(_) => HealthStatus::Ok,
            Err(e) if e.is_auth() => HealthStatus::AuthError(e.to_string()),
            Err(e) => HealthStatus::NetError(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{MockChatProvider, MockReply};

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1,
            cap_ms: 4,
        }
    }

    fn translator(mock: MockChatProvider) -> BatchTranslator {
        BatchTranslator::with_provider(Box::new(mock), "English".into(), "Chinese".into())
            .with_retry_policy(fast_retry())
    }

    #[tokio::test]
    async fn test_translate_batch_happy_path_preserves_order() {
        let mock = MockChatProvider::with_dictionary([
            ("Hello", "你好"),
            ("World", "世界"),
            ("Goodbye", "再见"),
        ]);
        let t = translator(mock);

        let result = t
            .translate_batch(&texts(&["Hello", "World", "Goodbye"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec!["你好", "世界", "再见"]);
    }

    #[tokio::test]
    async fn test_count_mismatch_should_halve_and_merge_in_order() {
        let mock = MockChatProvider::with_dictionary([
            ("a", "A"),
            ("b", "B"),
            ("c", "C"),
            ("d", "D"),
        ]);
        // First reply drops an item; the two halves then answer correctly.
        mock.push_reply(MockReply::Text("1. A\n2. B\n3. C".to_string()));
        let t = translator(mock);

        let result = t
            .translate_batch(&texts(&["a", "b", "c", "d"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_single_item_mismatch_is_accepted_verbatim() {
        let mock = MockChatProvider::working();
        mock.push_reply(MockReply::Text("就是这样".to_string()));
        let t = translator(mock);

        let result = t
            .translate_batch(&texts(&["That's it"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec!["就是这样"]);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_with_backoff() {
        let mock = MockChatProvider::with_dictionary([("Hello", "你好")]);
        mock.push_reply(MockReply::RateLimited);
        mock.push_reply(MockReply::Disconnect);
        let t = translator(mock);

        let result = t
            .translate_batch(&texts(&["Hello"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, vec!["你好"]);
    }

    #[tokio::test]
    async fn test_auth_error_is_terminal() {
        let mock = MockChatProvider::working();
        mock.push_reply(MockReply::AuthFailure);
        let t = translator(mock);

        let err = t
            .translate_batch(&texts(&["Hello"]), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            BatchError::Provider(e) => assert!(e.is_auth()),
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_after_max_attempts() {
        let mock = MockChatProvider::working();
        for _ in 0..10 {
            mock.push_reply(MockReply::Disconnect);
        }
        let t = translator(mock);

        let err = t
            .translate_batch(&texts(&["Hello"]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Provider(_)));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let mock = MockChatProvider::working();
        let t = translator(mock);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = t
            .translate_batch(&texts(&["Hello"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Cancelled));
    }

    #[tokio::test]
    async fn test_healthcheck_classification() {
        let ok = translator(MockChatProvider::working());
        assert!(matches!(ok.healthcheck().await, HealthStatus::Ok));

        let auth_mock = MockChatProvider::working();
        auth_mock.push_reply(MockReply::AuthFailure);
        let auth = translator(auth_mock);
        assert!(matches!(auth.healthcheck().await, HealthStatus::AuthError(_)));

        let net_mock = MockChatProvider::working();
        net_mock.push_reply(MockReply::Disconnect);
        let net = translator(net_mock);
        assert!(matches!(net.healthcheck().await, HealthStatus::NetError(_)));
    }
}
