/*!
 * Error types for the subsentry service.
 *
 * This module contains custom error types for different parts of the
 * application, using the thiserror crate for ergonomic error definitions.
 */

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when talking to LLM provider APIs
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection, including timeouts
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Whether a retry with backoff can reasonably succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionError(_) | Self::RateLimitExceeded(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    /// Whether the error is a credential failure that must never be retried
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationError(_))
    }
}

/// Non-zero exit or spawn failure from an external binary
#[derive(Error, Debug)]
#[error("{command} failed (exit code {exit_code:?}): {stderr_tail}")]
pub struct ToolError {
    /// The binary and arguments that were invoked
    pub command: String,
    /// Exit code, if the process ran to completion
    pub exit_code: Option<i32>,
    /// Last portion of captured stderr (at most 1 KiB)
    pub stderr_tail: String,
}

/// Errors that can occur while parsing or serializing subtitle files
#[derive(Error, Debug)]
pub enum CodecError {
    /// File extension does not map to a supported subtitle format
    #[error("Unsupported subtitle format: {0}")]
    UnsupportedFormat(String),

    /// The file content could not be parsed
    #[error("Failed to parse subtitle: {0}")]
    Parse(String),
}

/// Invalid requests rejected synchronously at the service boundary.
///
/// These never produce a task; the caller gets the explanatory message.
#[derive(Error, Debug)]
pub enum UserError {
    #[error("File does not exist: {0}")]
    FileNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("An active task already exists for {file_path} -> {target_language}")]
    DuplicateActiveTask {
        file_path: String,
        target_language: String,
    },

    #[error("A watcher already exists for {0}")]
    WatcherExists(PathBuf),

    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Watcher {0} not found")]
    WatcherNotFound(i64),

    #[error("Task {id} cannot {operation} from status {status}")]
    InvalidTransition {
        id: i64,
        status: String,
        operation: &'static str,
    },

    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// Terminal failure of a translation task.
///
/// The display string of this error becomes the task's `error_message`.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Provider error that exhausted its retries or was terminal
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// External tool failure
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// Subtitle parse or serialization failure
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// Requested output container cannot be produced from this source
    #[error("invalid_output_format: {0}")]
    InvalidOutputFormat(String),

    /// Invariant violation, e.g. translation count mismatch after halving
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Filesystem failure
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything unexpected, including trapped worker panics
    #[error("internal_error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_transient_classification() {
        assert!(ProviderError::ConnectionError("timeout".into()).is_transient());
        assert!(ProviderError::RateLimitExceeded("429".into()).is_transient());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into()
            }
            .is_transient()
        );
        assert!(!ProviderError::AuthenticationError("401".into()).is_transient());
        assert!(!ProviderError::ParseError("garbage".into()).is_transient());
    }

    #[test]
    fn test_tool_error_display_includes_stderr_tail() {
        let err = ToolError {
            command: "mkvmerge -o out.mkv".into(),
            exit_code: Some(2),
            stderr_tail: "Error: no space left".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mkvmerge"));
        assert!(msg.contains("no space left"));
    }

    #[test]
    fn test_task_error_invalid_output_format_message_prefix() {
        let err = TaskError::InvalidOutputFormat("srt source cannot be muxed".into());
        assert!(err.to_string().starts_with("invalid_output_format"));
    }
}
