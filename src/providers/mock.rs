/*!
 * Mock provider for testing translation behavior.
 *
 * Supports two modes that can be combined:
 * - a scripted reply queue consumed in order (exact responses or failures)
 * - a dictionary fallback that auto-answers numbered translation requests
 *   once the script is exhausted
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::ChatProvider;
use crate::errors::ProviderError;

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(\d+)[.)]\s?(.*)$").expect("mock regex must compile"));

/// One scripted reply
#[derive(Debug)]
pub enum MockReply {
    /// Return this exact text
    Text(String),
    /// Fail with a rate-limit error
    RateLimited,
    /// Fail with an authentication error
    AuthFailure,
    /// Fail with a connection error
    Disconnect,
}

/// Scriptable in-memory chat provider
pub struct MockChatProvider {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<String>>,
    dictionary: HashMap<String, String>,
}

impl MockChatProvider {
    /// A mock with no script: every numbered request is echoed back with a
    /// `[translated]` suffix
    pub fn working() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            dictionary: HashMap::new(),
        }
    }

    /// A mock that answers numbered requests from a source -> translation map
    pub fn with_dictionary<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            dictionary: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Append a scripted reply; scripted replies are consumed before the
    /// dictionary fallback kicks in
    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// All user messages received so far
    pub fn received_requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of chat calls made
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn translate_item(&self, text: &str) -> String {
        self.dictionary
            .get(text)
            .cloned()
            .unwrap_or_else(|| format!("{} [translated]", text))
    }

    fn auto_answer(&self, user_message: &str) -> String {
        let mut lines = Vec::new();
        for caps in NUMBERED_LINE.captures_iter(user_message) {
            let idx = caps.get(1).map(|m| m.as_str()).unwrap_or("0");
            let text = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            lines.push(format!("{}. {}", idx, self.translate_item(text)));
        }
        if lines.is_empty() {
            return self.translate_item(user_message.trim());
        }
        lines.join("\n")
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn chat(
        &self,
        _system_prompt: &str,
        user_message: &str,
    ) -> Result<String, ProviderError> {
        self.requests.lock().unwrap().push(user_message.to_string());

        let scripted = self.replies.lock().unwrap().pop_front();
        match scripted {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::RateLimited) => Err(ProviderError::RateLimitExceeded(
                "scripted rate limit".to_string(),
            )),
            Some(MockReply::AuthFailure) => Err(ProviderError::AuthenticationError(
                "scripted auth failure".to_string(),
            )),
            Some(MockReply::Disconnect) => Err(ProviderError::ConnectionError(
                "scripted disconnect".to_string(),
            )),
            None => Ok(self.auto_answer(user_message)),
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.chat("test", "1. Hello").await.map(|_| ())
    }

    fn name(&self) -> &str {
        "Mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dictionary_mode_answers_numbered_requests() {
        let mock = MockChatProvider::with_dictionary([("Hello", "你好"), ("World", "世界")]);
        let reply = mock.chat("sys", "1. Hello\n2. World").await.unwrap();
        assert_eq!(reply, "1. 你好\n2. 世界");
    }

    #[tokio::test]
    async fn test_scripted_replies_take_precedence_and_drain() {
        let mock = MockChatProvider::working();
        mock.push_reply(MockReply::Disconnect);
        mock.push_reply(MockReply::Text("1. scripted".to_string()));

        assert!(mock.chat("s", "1. a").await.is_err());
        assert_eq!(mock.chat("s", "1. a").await.unwrap(), "1. scripted");
        // Script exhausted: falls back to echo
        assert_eq!(mock.chat("s", "1. a").await.unwrap(), "1. a [translated]");
        assert_eq!(mock.call_count(), 3);
    }
}
