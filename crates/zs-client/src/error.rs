//! Error types for zs-client.

use crate::response::ResponseMeta;

/// Result type alias for zs-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for zs-client operations.
///
/// When the failure came from an HTTP response, the status, URL and headers
/// of that response are kept in [`Error::response`] so callers can apply
/// their own policy (for example treating 404 as "not found").
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Metadata of the response that produced this error, if any.
    pub response: Option<ResponseMeta>,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            response: None,
            source: None,
        }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            response: None,
            source: Some(Box::new(source)),
        }
    }

    /// Attach response metadata to this error.
    pub fn with_response(mut self, response: ResponseMeta) -> Self {
        self.response = Some(response);
        self
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns true if the upstream rate limit was hit and the budget ran out.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, ErrorKind::RateLimitExceeded { .. })
    }

    /// Returns true if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Authentication(_)
                | ErrorKind::AuthenticationFailed { .. }
                | ErrorKind::CredentialsMissing(_)
                | ErrorKind::Unauthenticated
        )
    }

    /// Returns true if the request was cancelled or ran past its deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }

    /// Returns true if the upstream answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// HTTP status of the response behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Api { status, .. } | ErrorKind::AuthenticationFailed { status, .. } => {
                Some(*status)
            }
            _ => self.response.as_ref().map(|r| r.status),
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// No key ID or secret configured.
    #[error("Missing API credentials: {0}")]
    CredentialsMissing(String),

    /// The token endpoint rejected the handshake.
    #[error("Authentication failed with status {status}: {body}")]
    AuthenticationFailed { status: u16, body: String },

    /// Retry budget exhausted while receiving 429 responses.
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// A request was built without a valid bearer token.
    #[error("No valid authentication token available")]
    Unauthenticated,

    /// Structured error returned by the API.
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Authentication error (HTTP 401 after re-authentication).
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Authorization error (HTTP 403 after re-authentication).
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Other network-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded into the target type.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The request context was cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// The request context deadline passed.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// All retries exhausted on retryable server errors.
    #[error("All {attempts} retry attempts exhausted")]
    RetriesExhausted { attempts: u32 },

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ErrorKind {
    /// Returns true if this error kind is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Timeout => true,
            ErrorKind::Connection(_) => true,
            ErrorKind::Transport(_) => true,
            ErrorKind::Api { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Check if an HTTP status code is retryable under the default policy.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let message = crate::security::redact::sanitize(&err.to_string());
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Connection(message)
        } else if err.is_builder() {
            ErrorKind::Config(message)
        } else {
            ErrorKind::Transport(message)
        };

        Error::with_source(kind, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Decode(err.to_string()), err)
    }
}

impl From<serde_urlencoded::ser::Error> for Error {
    fn from(err: serde_urlencoded::ser::Error) -> Self {
        Error::with_source(ErrorKind::Serialization(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::InvalidUrl(err.to_string()), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestMethod;
    use std::collections::HashMap;

    fn meta(status: u16) -> ResponseMeta {
        ResponseMeta {
            method: RequestMethod::Get,
            url: "https://api.zdxcloud.net/v1/devices".to_string(),
            status,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::new(ErrorKind::Timeout).is_retryable());
        assert!(Error::new(ErrorKind::Connection("refused".into())).is_retryable());

        let err = Error::new(ErrorKind::Api {
            status: 503,
            code: None,
            message: "Service unavailable".to_string(),
        });
        assert!(err.is_retryable());

        assert!(!Error::new(ErrorKind::Unauthenticated).is_retryable());
        assert!(!Error::new(ErrorKind::Decode("eof".into())).is_retryable());
        assert!(!Error::new(ErrorKind::Cancelled).is_retryable());
        assert!(!Error::new(ErrorKind::RateLimitExceeded { attempts: 3 }).is_retryable());
    }

    #[test]
    fn test_retryable_http_status_codes() {
        for status in [429, 500, 502, 503, 504] {
            let err = Error::new(ErrorKind::Api {
                status,
                code: None,
                message: "error".into(),
            });
            assert!(err.is_retryable(), "HTTP {status} should be retryable");
        }

        for status in [400, 401, 403, 404, 405, 409, 422] {
            let err = Error::new(ErrorKind::Api {
                status,
                code: None,
                message: "error".into(),
            });
            assert!(!err.is_retryable(), "HTTP {status} should NOT be retryable");
        }
    }

    #[test]
    fn test_status_and_not_found() {
        let err = Error::new(ErrorKind::Api {
            status: 404,
            code: Some("resource.not.found".into()),
            message: "no such device".into(),
        });
        assert!(err.is_not_found());
        assert_eq!(err.status(), Some(404));

        let err = Error::new(ErrorKind::RateLimitExceeded { attempts: 4 }).with_response(meta(429));
        assert_eq!(err.status(), Some(429));
        assert!(err.is_rate_limited());
        assert!(!err.is_not_found());

        assert_eq!(Error::new(ErrorKind::Timeout).status(), None);
    }

    #[test]
    fn test_error_kind_display_messages() {
        let cases: Vec<(ErrorKind, &str)> = vec![
            (
                ErrorKind::CredentialsMissing("key_id".into()),
                "Missing API credentials: key_id",
            ),
            (
                ErrorKind::AuthenticationFailed {
                    status: 400,
                    body: "bad key".into(),
                },
                "Authentication failed with status 400: bad key",
            ),
            (
                ErrorKind::RateLimitExceeded { attempts: 5 },
                "Rate limit exceeded after 5 attempts",
            ),
            (ErrorKind::Unauthenticated, "No valid authentication token"),
            (
                ErrorKind::Api {
                    status: 409,
                    code: Some("conflict".into()),
                    message: "already exists".into(),
                },
                "API error 409: already exists",
            ),
            (ErrorKind::Timeout, "Request timeout"),
            (ErrorKind::Cancelled, "Request cancelled"),
            (ErrorKind::DeadlineExceeded, "deadline exceeded"),
            (
                ErrorKind::RetriesExhausted { attempts: 3 },
                "All 3 retry attempts exhausted",
            ),
            (
                ErrorKind::Decode("expected value".into()),
                "Failed to decode response: expected value",
            ),
            (ErrorKind::Other("something else".into()), "something else"),
        ];

        for (kind, expected_substring) in cases {
            let display = kind.to_string();
            assert!(
                display.contains(expected_substring),
                "Expected '{display}' to contain '{expected_substring}'"
            );
        }
    }

    #[test]
    fn test_auth_and_cancel_helpers() {
        assert!(Error::new(ErrorKind::Unauthenticated).is_auth_error());
        assert!(Error::new(ErrorKind::Authentication("expired".into())).is_auth_error());
        assert!(!Error::new(ErrorKind::Authorization("forbidden".into())).is_auth_error());

        assert!(Error::new(ErrorKind::Cancelled).is_cancelled());
        assert!(Error::new(ErrorKind::DeadlineExceeded).is_cancelled());
        assert!(!Error::new(ErrorKind::Timeout).is_cancelled());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err.kind, ErrorKind::Decode(_)));
        assert!(err.source.is_some());
    }

    #[test]
    fn test_from_url_parse_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err.kind, ErrorKind::InvalidUrl(_)));
    }
}
