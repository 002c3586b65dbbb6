//! HTTP request building: URL joining, query encoding and JSON bodies.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use url::Url;

use crate::error::{Error, ErrorKind, Result};
use crate::security;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RequestMethod {
    /// Convert to reqwest::Method.
    pub fn to_reqwest(&self) -> reqwest::Method {
        match self {
            RequestMethod::Get => reqwest::Method::GET,
            RequestMethod::Post => reqwest::Method::POST,
            RequestMethod::Put => reqwest::Method::PUT,
            RequestMethod::Patch => reqwest::Method::PATCH,
            RequestMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion of request options into query string pairs.
///
/// Implemented for plain pair collections, maps, [`QueryBuilder`] and
/// [`Serialized`] (any `serde::Serialize` options struct).
pub trait QueryParams {
    /// The query pairs, in order. Empty optional values are already skipped.
    fn to_query_params(&self) -> Result<Vec<(String, String)>>;
}

impl QueryParams for () {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> QueryParams for [(K, V)] {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect())
    }
}

impl<K: AsRef<str>, V: AsRef<str>, const N: usize> QueryParams for [(K, V); N] {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        self.as_slice().to_query_params()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> QueryParams for Vec<(K, V)> {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        self.as_slice().to_query_params()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> QueryParams for BTreeMap<K, V> {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> QueryParams for HashMap<K, V> {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        let mut pairs: Vec<(String, String)> = self
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        // Stable order keeps URLs comparable across runs.
        pairs.sort();
        Ok(pairs)
    }
}

impl<T: QueryParams + ?Sized> QueryParams for &T {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        (**self).to_query_params()
    }
}

impl<T: QueryParams> QueryParams for Option<T> {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        match self {
            Some(params) => params.to_query_params(),
            None => Ok(Vec::new()),
        }
    }
}

/// Explicit key-value query builder.
///
/// ```rust
/// use zscaler_sdk_client::{QueryBuilder, QueryParams};
///
/// let query = QueryBuilder::new()
///     .push("from", 1_700_000_000)
///     .push_opt("loc", None::<&str>)
///     .push_opt("q", Some(""))
///     .push_all("dept", ["10", "20"]);
///
/// let pairs = query.to_query_params().unwrap();
/// assert_eq!(pairs.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    pairs: Vec<(String, String)>,
}

impl QueryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair.
    pub fn push(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.pairs.push((name.into(), value.to_string()));
        self
    }

    /// Add a pair when the value is present and not empty.
    pub fn push_opt(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value.map(|v| v.to_string()) {
            Some(value) if !value.is_empty() => self.push(name, value),
            _ => self,
        }
    }

    /// Add the same key once per value (repeated parameters).
    pub fn push_all<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let name = name.into();
        for value in values {
            self.pairs.push((name.clone(), value.to_string()));
        }
        self
    }

    /// Returns true when no pair was added.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl QueryParams for QueryBuilder {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        Ok(self.pairs.clone())
    }
}

/// Adapter turning a `Serialize` options struct into query pairs.
///
/// Optional fields should carry `#[serde(skip_serializing_if = "Option::is_none")]`.
///
/// ```rust
/// use serde::Serialize;
/// use zscaler_sdk_client::{QueryParams, Serialized};
///
/// #[derive(Serialize)]
/// struct Window {
///     from: i64,
///     #[serde(skip_serializing_if = "Option::is_none")]
///     to: Option<i64>,
/// }
///
/// let pairs = Serialized(&Window { from: 10, to: None }).to_query_params().unwrap();
/// assert_eq!(pairs, vec![("from".to_string(), "10".to_string())]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Serialized<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> QueryParams for Serialized<'_, T> {
    fn to_query_params(&self) -> Result<Vec<(String, String)>> {
        let encoded = serde_urlencoded::to_string(self.0)?;
        Ok(url::form_urlencoded::parse(encoded.as_bytes())
            .into_owned()
            .collect())
    }
}

/// Builder for an API request relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    pub(crate) method: RequestMethod,
    pub(crate) path: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) query_params: Vec<(String, String)>,
    /// Pre-serialized JSON so every retry re-sends identical bytes.
    pub(crate) body: Option<Bytes>,
}

impl RequestBuilder {
    /// Create a new request builder.
    pub fn new(method: RequestMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            query_params: Vec::new(),
            body: None,
        }
    }

    /// The request method.
    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// The relative path (or absolute URL) as given.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The serialized JSON body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    /// Append all pairs produced by a query options value.
    pub fn query_params<Q: QueryParams + ?Sized>(mut self, params: &Q) -> Result<Self> {
        self.query_params.extend(params.to_query_params()?);
        Ok(self)
    }

    /// Set JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(body)
            .map_err(|e| Error::with_source(ErrorKind::Serialization(e.to_string()), e))?;
        self.body = Some(Bytes::from(encoded));
        Ok(self)
    }

    /// Set raw JSON body.
    pub fn json_value(mut self, body: &serde_json::Value) -> Self {
        self.body = Some(Bytes::from(body.to_string()));
        self
    }

    /// Resolve the full URL against `base`.
    ///
    /// Relative paths are normalized segment by segment (see
    /// [`security::path::normalize`]) and appended to the base path. A query
    /// string already present in the path is kept, then the builder's query
    /// pairs are appended. Absolute `http(s)://` paths must share the origin
    /// of `base`; any other origin fails with [`ErrorKind::InvalidUrl`].
    pub fn url(&self, base: &Url) -> Result<Url> {
        let (raw_path, inline_query) = match self.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.path.as_str(), None),
        };

        let mut url = if raw_path.starts_with("http://") || raw_path.starts_with("https://") {
            let absolute = Url::parse(raw_path)?;
            if absolute.origin() != base.origin() {
                return Err(Error::new(ErrorKind::InvalidUrl(format!(
                    "{} is outside the API origin {}",
                    absolute.origin().ascii_serialization(),
                    base.origin().ascii_serialization()
                ))));
            }
            absolute
        } else {
            let mut url = base.clone();
            let joined = format!(
                "{}{}",
                base.path().trim_end_matches('/'),
                security::path::normalize(raw_path)
            );
            url.set_path(&joined);
            url
        };

        url.set_query(inline_query.filter(|q| !q.is_empty()));
        url.set_fragment(None);

        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query_params {
                pairs.append_pair(name, value);
            }
        }

        Ok(url)
    }
}
