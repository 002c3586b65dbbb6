//! Buffered HTTP responses, API error detection and typed decoding.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Error, ErrorKind, Result};
use crate::request::RequestMethod;
use crate::security::redact;

/// Response metadata kept on errors and decoded results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub method: RequestMethod,
    pub url: String,
    pub status: u16,
    /// Header names are lower-case.
    pub headers: HashMap<String, String>,
}

impl ResponseMeta {
    /// Get a header value by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// An HTTP response whose body has been read exactly once.
#[derive(Debug, Clone)]
pub struct Response {
    method: RequestMethod,
    url: Url,
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    elapsed: Duration,
}

impl Response {
    /// Buffer a reqwest response, honouring the context while reading.
    pub(crate) async fn read(
        ctx: &Context,
        method: RequestMethod,
        response: reqwest::Response,
        started: Instant,
        config: &ClientConfig,
    ) -> Result<Self> {
        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers().clone();
        let body = ctx.run(response.bytes()).await??;
        let elapsed = started.elapsed();

        if config.enable_tracing {
            debug!(
                method = %method,
                url = %url,
                status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Response received"
            );
        }
        if config.log_bodies {
            debug!(body = %redact::sanitize(&String::from_utf8_lossy(&body)), "Response body");
        }

        Ok(Self {
            method,
            url,
            status,
            headers,
            body,
            elapsed,
        })
    }

    /// Assemble a response from parts.
    pub fn from_parts(
        method: RequestMethod,
        url: Url,
        status: u16,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            method,
            url,
            status,
            headers,
            body: body.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Get the HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns true if the response status is successful (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// All response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The buffered body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The final request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request method that produced this response.
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Time from send to fully buffered body.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Metadata snapshot for errors and decoded results.
    pub fn meta(&self) -> ResponseMeta {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        ResponseMeta {
            method: self.method,
            url: self.url.to_string(),
            status: self.status,
            headers,
        }
    }

    /// Turn a non-2xx response into an error.
    ///
    /// 401 maps to [`ErrorKind::Authentication`], 403 to
    /// [`ErrorKind::Authorization`], anything else to [`ErrorKind::Api`]. The
    /// response metadata is attached to the error.
    pub fn check_api_error(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let (code, message) = parse_error_body(&self.body, self.status);
        let kind = match self.status {
            401 => ErrorKind::Authentication(message),
            403 => ErrorKind::Authorization(message),
            status => ErrorKind::Api {
                status,
                code,
                message,
            },
        };

        Err(Error::new(kind).with_response(self.meta()))
    }

    /// Deserialize the body and run the [`PostDecode`] hook.
    ///
    /// An empty body decodes as JSON `null`, so `()` and `Option<T>` work for
    /// endpoints that return nothing.
    pub fn decode<T: DeserializeOwned + PostDecode>(&self) -> Result<T> {
        let mut value: T = self.json()?;
        value.post_decode();
        Ok(value)
    }

    /// Deserialize the body without the post-decode hook.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };

        serde_json::from_slice(body).map_err(|e| {
            Error::with_source(ErrorKind::Decode(e.to_string()), e).with_response(self.meta())
        })
    }
}

/// Extract `(code, message)` from an error body.
fn parse_error_body(body: &[u8], status: u16) -> (Option<String>, String) {
    let text = String::from_utf8_lossy(body);

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(body) {
        let field = |names: &[&str]| {
            names.iter().find_map(|name| match map.get(*name)? {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };

        let code = field(&["code", "error", "id", "errorCode"]);
        let message = field(&["message", "reason", "error_description", "detail"]);
        if code.is_some() || message.is_some() {
            let message = message
                .or_else(|| code.clone())
                .unwrap_or_default();
            return (code, redact::sanitize(&message));
        }
    }

    let message = if text.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        redact::sanitize(text.trim())
    };
    (None, message)
}

/// Hook run on a value after it has been decoded from a response.
///
/// The default does nothing. Types whose `name`/`description` fields come
/// back HTML-escaped call [`unescape_html_twice`] on them here.
pub trait PostDecode {
    fn post_decode(&mut self) {}
}

/// Decode HTML entities twice, in place (`&amp;lt;` becomes `<`).
pub fn unescape_html_twice(value: &mut String) {
    let once = html_escape::decode_html_entities(value.as_str()).into_owned();
    let twice = html_escape::decode_html_entities(&once).into_owned();
    *value = twice;
}

const UNESCAPED_FIELDS: [&str; 2] = ["name", "description"];

impl PostDecode for serde_json::Value {
    fn post_decode(&mut self) {
        match self {
            serde_json::Value::Object(map) => {
                for (key, value) in map.iter_mut() {
                    match value {
                        serde_json::Value::String(s) if UNESCAPED_FIELDS.contains(&key.as_str()) => {
                            unescape_html_twice(s);
                        }
                        other => other.post_decode(),
                    }
                }
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(PostDecode::post_decode),
            _ => {}
        }
    }
}

impl<T: PostDecode> PostDecode for Vec<T> {
    fn post_decode(&mut self) {
        self.iter_mut().for_each(PostDecode::post_decode);
    }
}

impl<T: PostDecode> PostDecode for Option<T> {
    fn post_decode(&mut self) {
        if let Some(inner) = self {
            inner.post_decode();
        }
    }
}

impl<T: PostDecode> PostDecode for Box<T> {
    fn post_decode(&mut self) {
        (**self).post_decode();
    }
}

impl PostDecode for () {}

impl PostDecode for String {}
