//! API key credentials and the signed handshake payload.
//!
//! The key secret never leaves this module in clear text: requests carry
//! `sha256(secret + ":" + timestamp)` and Debug output is redacted.

use sha2::{Digest, Sha256};

use crate::error::{Error, ErrorKind, Result};
use crate::token::AuthRequest;

/// Environment variables for the key ID, in lookup order.
pub const KEY_ID_VARS: [&str; 2] = ["ZDX_API_KEY_ID", "ZSCALER_CLIENT_ID"];

/// Environment variables for the key secret, in lookup order.
pub const KEY_SECRET_VARS: [&str; 2] = ["ZDX_API_SECRET", "ZSCALER_CLIENT_SECRET"];

/// API key ID and secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    key_id: String,
    key_secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .finish()
    }
}

impl ApiCredentials {
    /// Create credentials.
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }

    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup`, trying each variable name in order.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };

        let key_id = first(&KEY_ID_VARS).ok_or_else(|| {
            Error::new(ErrorKind::CredentialsMissing(format!(
                "set {} or {}",
                KEY_ID_VARS[0], KEY_ID_VARS[1]
            )))
        })?;
        let key_secret = first(&KEY_SECRET_VARS).ok_or_else(|| {
            Error::new(ErrorKind::CredentialsMissing(format!(
                "set {} or {}",
                KEY_SECRET_VARS[0], KEY_SECRET_VARS[1]
            )))
        })?;

        Ok(Self::new(key_id, key_secret))
    }

    /// The key ID.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Fail with `CredentialsMissing` when either value is empty.
    pub fn validate(&self) -> Result<()> {
        if self.key_id.trim().is_empty() {
            return Err(Error::new(ErrorKind::CredentialsMissing(
                "key_id is empty".to_string(),
            )));
        }
        if self.key_secret.trim().is_empty() {
            return Err(Error::new(ErrorKind::CredentialsMissing(
                "key_secret is empty".to_string(),
            )));
        }
        Ok(())
    }

    /// Build the handshake payload for `timestamp` (unix seconds).
    pub fn sign(&self, timestamp: i64) -> AuthRequest {
        let mut hasher = Sha256::new();
        hasher.update(self.key_secret.as_bytes());
        hasher.update(b":");
        hasher.update(timestamp.to_string().as_bytes());

        AuthRequest {
            key_id: self.key_id.clone(),
            key_secret: hex::encode(hasher.finalize()),
            timestamp,
        }
    }
}
