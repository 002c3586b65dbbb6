//! # zs-client
//!
//! Core HTTP pipeline for Zscaler APIs.
//!
//! This crate provides the foundational HTTP client with:
//! - Preemptive per-method throttling (sliding window rate limiter)
//! - Automatic retry with exponential backoff and jitter
//! - Rate limit header handling (`RateLimit-*`, `X-Ratelimit-*-Second`)
//! - One-shot re-authentication on 401/403
//! - Buffered response decoding with API error detection
//! - Cancellation and deadlines through [`Context`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  (zs-zdx: Configuration, ZdxClient::new_request_do)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ZsHttpClient                           │
//! │  - Throttle → send → classify → backoff / reauthenticate    │
//! │  - Pulls bearer tokens from a TokenSource (zs-auth)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 RequestBuilder / Response                   │
//! │  - URL joining, query encoding, JSON bodies                 │
//! │  - Body buffered once, API error check, typed decode        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use zscaler_sdk_client::{ClientConfig, Context, RequestBuilder, RequestMethod, ZsHttpClient};
//!
//! let http = ZsHttpClient::new("https://api.zdxcloud.net", ClientConfig::default())?;
//! let request = RequestBuilder::new(RequestMethod::Get, "/v1/devices");
//! let response = http.execute(&Context::new(), &request, &token_source).await?;
//! let devices: serde_json::Value = response.decode()?;
//! ```

mod client;
mod config;
mod context;
mod error;
mod rate_limit;
mod request;
mod response;
mod retry;
pub mod security;

pub use client::{TokenSource, ZsHttpClient};
pub use config::{ClientConfig, ClientConfigBuilder, ProxyConfig};
pub use context::Context;
pub use error::{Error, ErrorKind, Result};
pub use rate_limit::{MethodClass, RateLimitConfig, RateLimiter};
pub use request::{QueryBuilder, QueryParams, RequestBuilder, RequestMethod, Serialized};
pub use response::{unescape_html_twice, PostDecode, Response, ResponseMeta};
pub use retry::{
    classify_error, classify_status, rate_limit_delay, BackoffStrategy, Disposition,
    RateLimitHeaders, RetryConfig, RetryPolicy,
};

/// User-Agent string for the client
pub const USER_AGENT: &str = concat!("zscaler-sdk-rust/", env!("CARGO_PKG_VERSION"));
