//! Token acquisition with a single-flight cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::ACCEPT;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;
use zscaler_sdk_client::security::redact;
use zscaler_sdk_client::{BackoffStrategy, Context, RateLimitHeaders, TokenSource};

use crate::credentials::ApiCredentials;
use crate::error::{Error, ErrorKind, Result};
use crate::token::{AuthToken, TokenResponse};

/// Token endpoint behaviour.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Path of the token endpoint relative to the base URL.
    pub token_path: String,
    /// Attempts before giving up on a rate limited token endpoint.
    pub max_attempts: u32,
    /// First backoff when no `RateLimit-Reset` header is sent.
    pub initial_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Added to every header-less backoff.
    pub additional_delay: Duration,
    /// Longest wait honoured from a `RateLimit-Reset` header.
    pub max_reset_wait: Duration,
    /// Tokens this close to expiry are refreshed early.
    pub expiry_margin: Duration,
    /// Request timeout for the token endpoint.
    pub timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_path: "/v1/oauth/token".to_string(),
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            additional_delay: Duration::from_secs(5),
            max_reset_wait: Duration::from_secs(60),
            expiry_margin: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            user_agent: zscaler_sdk_client::USER_AGENT.to_string(),
        }
    }
}

impl AuthConfig {
    /// Set the rate limit attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set backoff bounds and the additional delay.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, additional: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.additional_delay = additional;
        self
    }

    /// Cap waits taken from `RateLimit-Reset`.
    pub fn with_max_reset_wait(mut self, max: Duration) -> Self {
        self.max_reset_wait = max;
        self
    }

    /// Set the expiry safety margin.
    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// Set the token endpoint timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Exchanges API key credentials for bearer tokens and caches them.
///
/// The cache lock is held across check, fetch and store, so concurrent
/// callers that find the token expired cause a single endpoint call and
/// then share its result.
pub struct Authenticator {
    http: reqwest::Client,
    token_url: Url,
    credentials: ApiCredentials,
    config: AuthConfig,
    cache: Mutex<Option<AuthToken>>,
    fetches: AtomicU64,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("token_url", &self.token_url.as_str())
            .field("credentials", &self.credentials)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create an authenticator for the API at `base_url`.
    pub fn new(base_url: &str, credentials: ApiCredentials, config: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Self::with_http_client(base_url, credentials, config, http)
    }

    /// Create an authenticator that sends through `http` (for shared proxy
    /// and pool settings).
    pub fn with_http_client(
        base_url: &str,
        credentials: ApiCredentials,
        config: AuthConfig,
        http: reqwest::Client,
    ) -> Result<Self> {
        credentials.validate()?;

        let base = Url::parse(base_url)?;
        let path = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            config.token_path.trim_start_matches('/')
        );
        let mut token_url = base;
        token_url.set_path(&path);
        token_url.set_query(None);

        Ok(Self {
            http,
            token_url,
            credentials,
            config,
            cache: Mutex::new(None),
            fetches: AtomicU64::new(0),
        })
    }

    /// The token endpoint URL.
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The configured key credentials.
    pub fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    /// The token endpoint behaviour.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Number of token endpoint calls made so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Return the cached token, fetching a new one if it is missing or about
    /// to expire.
    #[instrument(skip(self, ctx), fields(key_id = %self.credentials.key_id()))]
    pub async fn authenticate(&self, ctx: &Context) -> Result<AuthToken> {
        self.credentials.validate()?;

        let mut cache = ctx.run(self.cache.lock()).await?;
        if let Some(token) = cache.as_ref() {
            if !token.is_expired(self.config.expiry_margin) {
                return Ok(token.clone());
            }
            debug!("Cached token expired");
        }

        let token = self.fetch_token(ctx).await?;
        *cache = Some(token.clone());
        Ok(token)
    }

    /// Replace a rejected token.
    ///
    /// Fetches unless another caller already swapped `stale` for a token that
    /// is still valid, in which case that token is returned.
    #[instrument(skip(self, ctx, stale))]
    pub async fn refresh(&self, ctx: &Context, stale: &str) -> Result<AuthToken> {
        self.credentials.validate()?;

        let mut cache = ctx.run(self.cache.lock()).await?;
        if let Some(token) = cache.as_ref() {
            if token.access_token != stale && !token.is_expired(self.config.expiry_margin) {
                return Ok(token.clone());
            }
        }

        let token = self.fetch_token(ctx).await?;
        *cache = Some(token.clone());
        Ok(token)
    }

    /// Put `token` in the cache.
    pub async fn store(&self, token: AuthToken) {
        *self.cache.lock().await = Some(token);
    }

    /// Drop the cached token.
    pub async fn clear(&self) {
        *self.cache.lock().await = None;
    }

    /// The cached token, valid or not.
    pub async fn current(&self) -> Option<AuthToken> {
        self.cache.lock().await.clone()
    }

    /// POST the signed handshake, waiting out 429 responses.
    async fn fetch_token(&self, ctx: &Context) -> Result<AuthToken> {
        let backoff = BackoffStrategy::Exponential { factor: 2.0 };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let payload = self.credentials.sign(Utc::now().timestamp());
            self.fetches.fetch_add(1, Ordering::Relaxed);

            let send = self
                .http
                .post(self.token_url.clone())
                .header(ACCEPT, "application/json")
                .header(reqwest::header::USER_AGENT, self.config.user_agent.as_str())
                .json(&payload)
                .send();
            let response = ctx.run(send).await??;
            let status = response.status().as_u16();

            if response.status().is_success() {
                let body = ctx.run(response.bytes()).await??;
                let parsed: TokenResponse = serde_json::from_slice(&body)?;
                if parsed.token.is_empty() {
                    return Err(Error::new(ErrorKind::AuthenticationFailed {
                        status,
                        body: "token endpoint returned an empty token".to_string(),
                    }));
                }

                info!(expires_in = parsed.expires_in, "Obtained access token");
                return Ok(AuthToken::from_response(parsed, Utc::now()));
            }

            if status == 429 {
                if attempt >= self.config.max_attempts {
                    return Err(Error::new(ErrorKind::RateLimitExceeded { attempts: attempt }));
                }

                let headers = RateLimitHeaders::from_headers(response.headers());
                let delay = match headers.reset_delay(Utc::now()) {
                    // The cache lock is held here, so every caller waits too.
                    Some(until_reset) => until_reset.min(self.config.max_reset_wait),
                    None => {
                        backoff.delay(
                            attempt - 1,
                            self.config.initial_backoff,
                            self.config.max_backoff,
                        ) + self.config.additional_delay
                    }
                };

                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Token endpoint rate limited, retrying"
                );
                ctx.sleep(delay).await?;
                continue;
            }

            let body = ctx.run(response.text()).await??;
            return Err(Error::new(ErrorKind::AuthenticationFailed {
                status,
                body: redact::sanitize(&body),
            }));
        }
    }
}

impl TokenSource for Authenticator {
    async fn token(&self, ctx: &Context) -> zscaler_sdk_client::Result<String> {
        Ok(self.authenticate(ctx).await?.access_token)
    }

    async fn refresh(&self, ctx: &Context, stale: &str) -> zscaler_sdk_client::Result<String> {
        Ok(Authenticator::refresh(self, ctx, stale).await?.access_token)
    }
}
