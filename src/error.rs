//! Error types for the X-Sense cloud client
//!
//! One uniform taxonomy for every failure the client surfaces: transport,
//! timeout, broker rejection, authentication and local configuration errors.
//! No variant terminates the session; callers recover by retrying the
//! originating call or letting the session reconnect.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static CREDENTIAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").unwrap());

/// Main error type for X-Sense client operations
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("timeout after {millis}ms waiting for {operation}")]
    Timeout { operation: String, millis: u64 },

    #[error("request rejected by backend ({code}): {message}")]
    Protocol { code: i64, message: String },

    #[error("authentication failed: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    /// Create a transport error, sanitizing any credential material that
    /// leaked into the underlying message.
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: sanitize_error_message(&message.into()),
        }
    }

    /// Create a protocol error from a broker/backend reply
    pub fn protocol<S: Into<String>>(code: i64, message: S) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Create a timeout error naming the timed-out operation
    pub fn timeout<S: Into<String>>(operation: S, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    /// True for errors that a session reconnect can clear
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Sanitize error messages so credential material never reaches logs or
/// the embedding framework.
pub(crate) fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = CREDENTIAL_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    // Truncate very long messages - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        sanitized = format!("{}{}", &sanitized[..max_content_len], truncate_suffix);
    }

    sanitized
}

/// Result type for client operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_sanitizes_credentials() {
        let error = ApiError::transport("connect failed: sessionToken=abc123 secret: hunter2");

        let message = error.to_string();
        assert!(!message.contains("abc123"));
        assert!(!message.contains("hunter2"));
        assert!(message.contains("Token=***"));
    }

    #[test]
    fn test_protocol_error_carries_broker_code() {
        let error = ApiError::protocol(404, "No shadow exists with name: 2nd_mainpage");

        match &error {
            ApiError::Protocol { code, message } => {
                assert_eq!(*code, 404);
                assert!(message.contains("2nd_mainpage"));
            }
            other => panic!("expected Protocol, got {other:?}"),
        }
        assert!(error.to_string().contains("404"));
    }

    #[test]
    fn test_timeout_error_names_operation() {
        let error = ApiError::timeout("SBS50ABC123/2nd_mainpage get", 100);
        assert!(error.to_string().contains("SBS50ABC123/2nd_mainpage get"));
        assert!(error.to_string().contains("100ms"));
    }

    #[test]
    fn test_is_transport() {
        assert!(ApiError::transport("boom").is_transport());
        assert!(!ApiError::protocol(500, "boom").is_transport());
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let sanitized = sanitize_error_message("PASSWORD=secret123 Token: abc Key=xyz");
        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}
