//! # zs-auth
//!
//! Authentication for Zscaler APIs using an API key ID and secret.
//!
//! ## Security
//!
//! - The key secret is never sent: each handshake carries
//!   `sha256(secret + ":" + timestamp)` with a fresh timestamp
//! - Secrets and tokens are redacted in Debug output
//! - Tracing skips credential parameters
//! - Error bodies from the token endpoint are sanitized
//!
//! ## Token lifecycle
//!
//! [`Authenticator`] owns the cached [`AuthToken`]. A token is reused until it
//! is within [`AuthConfig::expiry_margin`] of expiring. Refreshes are
//! single-flight: callers racing on an expired or rejected token wait for one
//! endpoint call and share its result.
//!
//! ## Example
//!
//! ```rust,ignore
//! use zscaler_sdk_auth::{ApiCredentials, AuthConfig, Authenticator};
//! use zscaler_sdk_client::Context;
//!
//! let auth = Authenticator::new(
//!     "https://api.zdxcloud.net",
//!     ApiCredentials::from_env()?,
//!     AuthConfig::default(),
//! )?;
//! let token = auth.authenticate(&Context::new()).await?;
//! ```

mod authenticator;
mod credentials;
mod error;
mod token;

pub use authenticator::{AuthConfig, Authenticator};
pub use credentials::{ApiCredentials, KEY_ID_VARS, KEY_SECRET_VARS};
pub use error::{Error, ErrorKind, Result};
pub use token::{AuthRequest, AuthToken, TokenResponse};
