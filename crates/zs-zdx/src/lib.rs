//! # zs-zdx
//!
//! Client for the Zscaler Digital Experience (ZDX) API.
//!
//! [`ZdxClient`] ties the pieces together: [`Configuration`] resolves
//! credentials and transport settings from a YAML file, the environment and
//! explicit builder calls; the [`Authenticator`] keeps the bearer token; the
//! zs-client pipeline throttles, retries and decodes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use zscaler_sdk_zdx::{Configuration, Context, QueryBuilder, ZdxClient};
//!
//! let config = Configuration::builder()
//!     .load_environment()?
//!     .with_cloud("zdxcloud")
//!     .build()?;
//! let client = ZdxClient::connect(&Context::new(), config).await?;
//!
//! let query = QueryBuilder::new().push("from", from).push("to", to);
//! let apps: Vec<serde_json::Value> = client.get(&ctx, "/v1/apps", &query).await?;
//! let users: Vec<serde_json::Value> =
//!     client.get_all_pages(&ctx, "/v1/users", &query, "users").await?;
//! ```

mod client;
mod config;
mod pagination;

pub use client::{Decoded, ZdxClient};
pub use config::{
    default_config_path, Configuration, ConfigurationBuilder, Settings, CONFIG_FILE_VAR,
    DEFAULT_CLOUD,
};
pub use pagination::{NEXT_OFFSET_FIELD, OFFSET_PARAM};

pub use zscaler_sdk_auth::{ApiCredentials, AuthConfig, AuthToken, Authenticator};
pub use zscaler_sdk_client::{
    unescape_html_twice, Context, Error, ErrorKind, PostDecode, ProxyConfig, QueryBuilder,
    QueryParams, RateLimitConfig, RequestMethod, Response, ResponseMeta, Result, Serialized,
};
