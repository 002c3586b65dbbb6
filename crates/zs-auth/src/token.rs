//! Token endpoint payloads and the cached bearer token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/oauth/token`.
#[derive(Clone, Serialize)]
pub struct AuthRequest {
    pub key_id: String,
    /// Hex SHA-256 of `secret + ":" + timestamp`.
    pub key_secret: String,
    pub timestamp: i64,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token_type: String,
    pub token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// A bearer token with its issue time.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token_type: String,
    pub access_token: String,
    /// Lifetime in seconds from `issued_at`.
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token_type", &self.token_type)
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl AuthToken {
    /// Create a token issued at `issued_at`.
    pub fn new(
        token_type: impl Into<String>,
        access_token: impl Into<String>,
        expires_in: u64,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            access_token: access_token.into(),
            expires_in,
            issued_at,
        }
    }

    /// Token from an endpoint response received at `issued_at`.
    pub fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        Self::new(
            response.token_type,
            response.token,
            response.expires_in,
            issued_at,
        )
    }

    /// When the token stops being valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True when the token is empty or expires within `margin` of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        let margin = chrono::TimeDelta::from_std(margin).unwrap_or(chrono::TimeDelta::MAX);
        match now.checked_add_signed(margin) {
            Some(threshold) => threshold >= self.expires_at(),
            None => true,
        }
    }

    /// [`Self::is_expired_at`] against the current time.
    pub fn is_expired(&self, margin: Duration) -> bool {
        self.is_expired_at(Utc::now(), margin)
    }
}
