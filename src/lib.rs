//! # zscaler-sdk
//!
//! A Zscaler Digital Experience (ZDX) API client library for Rust.
//!
//! This library provides authenticated access to the ZDX API with built-in
//! rate limiting, retry logic and error handling.
//!
//! ## Security
//!
//! - Key secrets never leave the process; the token handshake sends a
//!   timestamped SHA-256 signature
//! - Sensitive data (tokens, secrets, proxy passwords) are redacted in Debug output
//! - Tracing skips credential parameters
//! - Error messages sanitize any credential data
//!
//! ## Crates
//!
//! - **zscaler-sdk-client** - Core HTTP pipeline: throttling, retry, rate limit headers, decoding
//! - **zscaler-sdk-auth** - API key authentication and the shared token cache
//! - **zscaler-sdk-zdx** - ZDX configuration, typed requests and pagination
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use zscaler_sdk::zdx::{Context, QueryBuilder, ZdxClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // ZDX_API_KEY_ID / ZDX_API_SECRET / ZDX_CLOUD, or ~/.zscaler/zdx.yaml
//!     let ctx = Context::new();
//!     let client = ZdxClient::from_env(&ctx).await?;
//!
//!     let query = QueryBuilder::new().push("since", 2);
//!     let apps: Vec<serde_json::Value> = client.get(&ctx, "/v1/apps", &query).await?;
//!
//!     for app in apps {
//!         println!("{}", app["name"]);
//!     }
//!
//!     Ok(())
//! }
//! ```

// Re-export all crates for convenient access
#[cfg(feature = "auth")]
pub use zscaler_sdk_auth as auth;
#[cfg(feature = "client")]
pub use zscaler_sdk_client as client;
#[cfg(feature = "zdx")]
pub use zscaler_sdk_zdx as zdx;

// Re-export commonly used types at the top level
#[cfg(feature = "auth")]
pub use zscaler_sdk_auth::{ApiCredentials, Authenticator};
#[cfg(feature = "client")]
pub use zscaler_sdk_client::{ClientConfig, Context, Error, ErrorKind, Result, ZsHttpClient};
#[cfg(feature = "zdx")]
pub use zscaler_sdk_zdx::{Configuration, ZdxClient};
