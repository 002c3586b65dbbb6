//! Error types for zs-auth.
//!
//! Error messages are designed to avoid exposing sensitive credential data.

use zscaler_sdk_client::{Error as ClientError, ErrorKind as ClientErrorKind};

/// Result type alias for zs-auth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for zs-auth operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }
}

/// The kind of error that occurred.
///
/// Error messages never include the key secret or issued tokens.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Key ID or secret not configured.
    #[error("Missing API credentials: {0}")]
    CredentialsMissing(String),

    /// The token endpoint answered with a non-2xx, non-429 status.
    #[error("Authentication failed with status {status}: {body}")]
    AuthenticationFailed { status: u16, body: String },

    /// The token endpoint kept answering 429.
    #[error("Rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// Network failure talking to the token endpoint.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Token response could not be parsed.
    #[error("JSON error: {0}")]
    Json(String),

    /// The context was cancelled.
    #[error("Authentication cancelled")]
    Cancelled,

    /// The context deadline passed.
    #[error("Authentication deadline exceeded")]
    DeadlineExceeded,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let message = zscaler_sdk_client::security::redact::sanitize(&err.to_string());
        Error::with_source(ErrorKind::Http(message), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::Config(format!("invalid token URL: {err}")), err)
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        let kind = match &err.kind {
            ClientErrorKind::Cancelled => ErrorKind::Cancelled,
            ClientErrorKind::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            ClientErrorKind::Config(message) | ClientErrorKind::InvalidUrl(message) => {
                ErrorKind::Config(message.clone())
            }
            _ => ErrorKind::Http(zscaler_sdk_client::security::redact::sanitize(
                &err.to_string(),
            )),
        };
        Error::with_source(kind, err)
    }
}

impl From<Error> for ClientError {
    fn from(err: Error) -> Self {
        let kind = match &err.kind {
            ErrorKind::CredentialsMissing(what) => ClientErrorKind::CredentialsMissing(what.clone()),
            ErrorKind::AuthenticationFailed { status, body } => {
                ClientErrorKind::AuthenticationFailed {
                    status: *status,
                    body: body.clone(),
                }
            }
            ErrorKind::RateLimitExceeded { attempts } => ClientErrorKind::RateLimitExceeded {
                attempts: *attempts,
            },
            ErrorKind::Cancelled => ClientErrorKind::Cancelled,
            ErrorKind::DeadlineExceeded => ClientErrorKind::DeadlineExceeded,
            ErrorKind::Http(message) => ClientErrorKind::Transport(message.clone()),
            ErrorKind::Json(message) => ClientErrorKind::Decode(message.clone()),
            ErrorKind::Config(message) => ClientErrorKind::Config(message.clone()),
            ErrorKind::Other(message) => ClientErrorKind::Other(message.clone()),
        };
        ClientError::with_source(kind, err)
    }
}
