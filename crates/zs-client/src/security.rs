//! Security utilities for Zscaler API requests.
//!
//! ## URL Path Encoding
//!
//! Resource IDs and names end up in request paths and may contain characters
//! that need percent-encoding. Paths are normalized segment by segment so an
//! already-escaped path and its raw form produce the same URL:
//!
//! ```rust
//! use zscaler_sdk_client::security::path;
//!
//! assert_eq!(path::normalize("/v1/users/a b"), "/v1/users/a%20b");
//! assert_eq!(path::normalize("/v1/users/a%20b"), "/v1/users/a%20b");
//! ```
//!
//! ## Redaction
//!
//! Error messages and logged bodies pass through [`redact::sanitize`] so bearer
//! tokens and key secrets never reach logs or error strings.

/// Path segment escaping.
pub mod path {
    use std::borrow::Cow;

    /// Escape a single path segment.
    ///
    /// The segment is percent-decoded first and then re-encoded, so the
    /// result is stable no matter how many times it is applied.
    #[must_use]
    pub fn escape_segment(segment: &str) -> String {
        let decoded = urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment));
        urlencoding::encode(&decoded).into_owned()
    }

    /// Normalize a relative path: leading slash, empty segments dropped,
    /// each segment escaped, trailing slash preserved.
    #[must_use]
    pub fn normalize(path: &str) -> String {
        let segments: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(escape_segment)
            .collect();

        if segments.is_empty() {
            return String::new();
        }

        let mut normalized = format!("/{}", segments.join("/"));
        if path.ends_with('/') {
            normalized.push('/');
        }
        normalized
    }
}

/// Redaction of credentials in free-form text.
pub mod redact {
    use std::sync::LazyLock;

    use regex::Regex;

    const MAX_LENGTH: usize = 500;

    static BEARER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-_.~+/=]+").expect("bearer pattern is valid")
    });

    static JWT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"eyJ[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]*")
            .expect("jwt pattern is valid")
    });

    static SECRET_FIELD: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""(token|key_secret|access_token|secret)"\s*:\s*"[^"]*""#)
            .expect("secret field pattern is valid")
    });

    /// Sanitize a message to prevent exposing sensitive data.
    ///
    /// - Bearer credentials and JWT-shaped strings are replaced
    /// - JSON `token`/`key_secret`/`access_token`/`secret` values are replaced
    /// - Messages longer than 500 characters are truncated
    #[must_use]
    pub fn sanitize(message: &str) -> String {
        let sanitized = BEARER.replace_all(message, "Bearer [REDACTED]");
        let sanitized = JWT.replace_all(&sanitized, "[REDACTED_TOKEN]");
        let mut sanitized = SECRET_FIELD
            .replace_all(&sanitized, r#""$1":"[REDACTED]""#)
            .into_owned();

        if sanitized.len() > MAX_LENGTH {
            let mut cut = MAX_LENGTH;
            while !sanitized.is_char_boundary(cut) {
                cut -= 1;
            }
            sanitized.truncate(cut);
            sanitized.push_str("...[truncated]");
        }

        sanitized
    }
}
