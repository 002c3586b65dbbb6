//! HTTP client with throttling, retry and re-authentication.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Error, ErrorKind, Result};
use crate::rate_limit::RateLimiter;
use crate::request::RequestBuilder;
use crate::response::Response;
use crate::retry::{
    classify_error, classify_status, Disposition, RateLimitHeaders, RetryConfig, RetryPolicy,
};

/// Supplies bearer tokens to the transport.
///
/// `refresh` is called after a 401/403 with the token that was rejected. An
/// implementation shared between tasks should only fetch a new token when
/// `stale` is still the current one, so a burst of rejections costs a single
/// refresh.
pub trait TokenSource: Send + Sync {
    /// The current token, fetching one if needed.
    fn token(&self, ctx: &Context) -> impl Future<Output = Result<String>> + Send;

    /// Replace `stale` with a fresh token.
    fn refresh(&self, ctx: &Context, stale: &str) -> impl Future<Output = Result<String>> + Send;
}

impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn token(&self, ctx: &Context) -> impl Future<Output = Result<String>> + Send {
        (**self).token(ctx)
    }

    fn refresh(&self, ctx: &Context, stale: &str) -> impl Future<Output = Result<String>> + Send {
        (**self).refresh(ctx, stale)
    }
}

/// HTTP client for one API base URL.
///
/// Cloning is cheap; clones share the connection pool and the rate limiter.
#[derive(Debug, Clone)]
pub struct ZsHttpClient {
    inner: reqwest::Client,
    base_url: Url,
    config: Arc<ClientConfig>,
    limiter: Arc<RateLimiter>,
}

impl ZsHttpClient {
    /// Create a new HTTP client for `base_url`.
    pub fn new(base_url: &str, config: ClientConfig) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::new(ErrorKind::InvalidUrl(format!(
                "unsupported scheme: {}",
                base_url.scheme()
            ))));
        }
        base_url.set_query(None);
        base_url.set_fragment(None);

        let inner = config.build_http_client()?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        Ok(Self {
            inner,
            base_url,
            config: Arc::new(config),
            limiter,
        })
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a ready-to-send request carrying `token` as bearer credential.
    pub fn build_request(
        &self,
        request: &RequestBuilder,
        token: Option<&str>,
    ) -> Result<reqwest::Request> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::new(ErrorKind::Unauthenticated))?;

        let url = request.url(&self.base_url)?;
        let mut req = self
            .inner
            .request(request.method.to_reqwest(), url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");

        if !self.config.user_agent.is_empty() {
            req = req.header(USER_AGENT, self.config.user_agent.as_str());
        }

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        req.build().map_err(Into::into)
    }

    /// Send `request`, retrying and re-authenticating as needed.
    ///
    /// Every attempt first passes the rate limiter. Retryable failures sleep
    /// for the header-derived wait or the backoff schedule. A 401/403 triggers
    /// one token refresh and one re-send; a second rejection is final.
    /// Non-2xx responses that are not retried come back as errors carrying the
    /// response metadata.
    #[instrument(skip(self, ctx, request, tokens), fields(method = %request.method, path = %request.path))]
    pub async fn execute<S: TokenSource>(
        &self,
        ctx: &Context,
        request: &RequestBuilder,
        tokens: &S,
    ) -> Result<Response> {
        let mut policy = RetryPolicy::new(
            self.config
                .retry
                .clone()
                .unwrap_or_else(RetryConfig::no_retry),
        );
        let mut token = tokens.token(ctx).await?;
        let mut reauthenticated = false;

        loop {
            self.limiter.acquire(ctx, request.method).await?;

            let response = match self.send_once(ctx, request, &token).await {
                Ok(response) => response,
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => match classify_error(&err) {
                    Disposition::Retry { .. } => match policy.next_delay(None) {
                        Some(delay) => {
                            warn!(
                                attempt = policy.attempt(),
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Request failed, retrying"
                            );
                            ctx.sleep(delay).await?;
                            continue;
                        }
                        None => return Err(err),
                    },
                    _ => return Err(err),
                },
            };

            let disposition = classify_status(
                response.status(),
                response.headers(),
                policy.config(),
                Utc::now(),
            );
            // A retried response already waits out its own delay.
            if !matches!(disposition, Disposition::Retry { .. }) {
                self.observe_remaining(&response, policy.config());
            }

            match disposition {
                Disposition::Success => return Ok(response),
                Disposition::Reauthenticate if !reauthenticated => {
                    debug!(status = response.status(), "Token rejected, refreshing");
                    reauthenticated = true;
                    token = tokens.refresh(ctx, &token).await?;
                }
                Disposition::Retry { delay_hint } => match policy.next_delay(delay_hint) {
                    Some(delay) => {
                        warn!(
                            attempt = policy.attempt(),
                            status = response.status(),
                            delay_ms = delay.as_millis() as u64,
                            "Request failed, retrying"
                        );
                        ctx.sleep(delay).await?;
                    }
                    None => return Err(exhausted(response, policy.attempt() + 1)),
                },
                Disposition::Reauthenticate | Disposition::Fatal => {
                    return response.check_api_error();
                }
            }
        }
    }

    /// One send plus body read, without retry logic.
    async fn send_once(
        &self,
        ctx: &Context,
        request: &RequestBuilder,
        token: &str,
    ) -> Result<Response> {
        let http_request = self.build_request(request, Some(token))?;

        if self.config.enable_tracing {
            debug!(method = %request.method, url = %http_request.url(), "Sending request");
        }

        let started = Instant::now();
        let response = ctx.run(self.inner.execute(http_request)).await??;
        Response::read(ctx, request.method, response, started, &self.config).await
    }

    /// Cool down every class when the upstream budget runs low.
    fn observe_remaining(&self, response: &Response, retry: &RetryConfig) {
        if retry.remaining_threshold == 0 {
            return;
        }

        let headers = RateLimitHeaders::from_headers(response.headers());
        if let Some(remaining) = headers.remaining() {
            if remaining <= u64::from(retry.remaining_threshold) {
                let delay = self.limiter.defer_with_jitter();
                debug!(
                    remaining,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limit budget low, cooling down"
                );
            }
        }
    }
}

/// Error for a response that was still retryable when the budget ran out.
fn exhausted(response: Response, attempts: u32) -> Error {
    let status = response.status();
    let meta = response.meta();
    let kind = if status == 429 {
        ErrorKind::RateLimitExceeded { attempts }
    } else {
        ErrorKind::RetriesExhausted { attempts }
    };

    match response.check_api_error() {
        Err(api_error) => Error::with_source(kind, api_error).with_response(meta),
        Ok(_) => Error::new(kind).with_response(meta),
    }
}
