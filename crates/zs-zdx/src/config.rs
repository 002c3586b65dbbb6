//! ZDX client configuration.
//!
//! Settings are layered, later layers winning field by field:
//!
//! 1. YAML file: `~/.zscaler/zdx.yaml`, or the path in `ZDX_CONFIG_FILE`
//! 2. Environment variables (`ZDX_*`, with `ZSCALER_CLIENT_*` fallbacks for
//!    the key ID and secret)
//! 3. Explicit [`ConfigurationBuilder`] calls
//!
//! ```yaml
//! zdx:
//!   key_id: "..."
//!   key_secret: "..."
//!   cloud: zdxcloud
//!   max_retries: 10
//!   min_wait_seconds: 2
//!   max_wait_seconds: 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use zscaler_sdk_auth::{ApiCredentials, AuthConfig, KEY_ID_VARS, KEY_SECRET_VARS};
use zscaler_sdk_client::{
    ClientConfig, Error, ErrorKind, ProxyConfig, RateLimitConfig, Result, RetryConfig,
};

/// Cloud used when neither a cloud nor a base URL is configured.
pub const DEFAULT_CLOUD: &str = "zdxcloud";

/// Environment variable pointing at a YAML config file.
pub const CONFIG_FILE_VAR: &str = "ZDX_CONFIG_FILE";

/// One configuration layer. Unset fields defer to lower layers.
#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub cloud: Option<String>,
    pub base_url: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub max_retries: Option<u32>,
    #[serde(rename = "min_wait_seconds", deserialize_with = "seconds::deserialize")]
    pub min_wait: Option<Duration>,
    #[serde(rename = "max_wait_seconds", deserialize_with = "seconds::deserialize")]
    pub max_wait: Option<Duration>,
    pub rate_limit_remaining_threshold: Option<u32>,
    #[serde(deserialize_with = "seconds::deserialize")]
    pub request_timeout: Option<Duration>,
    pub debug: Option<bool>,
    pub user_agent: Option<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Settings")
            .field("key_id", &self.key_id)
            .field("key_secret", &redacted(&self.key_secret))
            .field("cloud", &self.cloud)
            .field("base_url", &self.base_url)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("proxy_username", &self.proxy_username)
            .field("proxy_password", &redacted(&self.proxy_password))
            .field("max_retries", &self.max_retries)
            .field("min_wait", &self.min_wait)
            .field("max_wait", &self.max_wait)
            .field(
                "rate_limit_remaining_threshold",
                &self.rate_limit_remaining_threshold,
            )
            .field("request_timeout", &self.request_timeout)
            .field("debug", &self.debug)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    zdx: Settings,
}

fn config_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Config(message.into()))
}

impl Settings {
    /// Parse the `zdx:` section of a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: ConfigFile = serde_yaml::from_str(yaml)
            .map_err(|e| config_error(format!("invalid YAML config: {e}")))?;
        Ok(file.zdx)
    }

    /// Read and parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            config_error(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Read settings through `lookup` (normally `std::env::var`).
    pub fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let first = |names: &[&str]| names.iter().find_map(|name| get(*name));

        Ok(Self {
            key_id: first(&KEY_ID_VARS),
            key_secret: first(&KEY_SECRET_VARS),
            cloud: get("ZDX_CLOUD"),
            base_url: get("ZDX_BASE_URL"),
            proxy_host: get("ZDX_PROXY_HOST"),
            proxy_port: parse_var(&get, "ZDX_PROXY_PORT")?,
            proxy_username: get("ZDX_PROXY_USERNAME"),
            proxy_password: get("ZDX_PROXY_PASSWORD"),
            max_retries: parse_var(&get, "ZDX_MAX_RETRIES")?,
            min_wait: parse_seconds(&get, "ZDX_MIN_WAIT_SECONDS")?,
            max_wait: parse_seconds(&get, "ZDX_MAX_WAIT_SECONDS")?,
            rate_limit_remaining_threshold: parse_var(&get, "ZDX_RATE_LIMIT_REMAINING_THRESHOLD")?,
            request_timeout: parse_seconds(&get, "ZDX_REQUEST_TIMEOUT")?,
            debug: get("ZDX_DEBUG").map(|v| parse_bool("ZDX_DEBUG", &v)).transpose()?,
            user_agent: get("ZDX_USER_AGENT"),
        })
    }

    /// Layer `upper` on top of `self`.
    pub fn overlay(self, upper: Settings) -> Settings {
        Settings {
            key_id: upper.key_id.or(self.key_id),
            key_secret: upper.key_secret.or(self.key_secret),
            cloud: upper.cloud.or(self.cloud),
            base_url: upper.base_url.or(self.base_url),
            proxy_host: upper.proxy_host.or(self.proxy_host),
            proxy_port: upper.proxy_port.or(self.proxy_port),
            proxy_username: upper.proxy_username.or(self.proxy_username),
            proxy_password: upper.proxy_password.or(self.proxy_password),
            max_retries: upper.max_retries.or(self.max_retries),
            min_wait: upper.min_wait.or(self.min_wait),
            max_wait: upper.max_wait.or(self.max_wait),
            rate_limit_remaining_threshold: upper
                .rate_limit_remaining_threshold
                .or(self.rate_limit_remaining_threshold),
            request_timeout: upper.request_timeout.or(self.request_timeout),
            debug: upper.debug.or(self.debug),
            user_agent: upper.user_agent.or(self.user_agent),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    get(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| config_error(format!("{name} has an invalid value: {raw}")))
        })
        .transpose()
}

fn parse_seconds(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<Duration>> {
    match parse_var::<f64>(get, name)? {
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(_) => Err(config_error(format!("{name} must be a non-negative number"))),
        None => Ok(None),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(config_error(format!("{name} has an invalid value: {raw}"))),
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        match secs {
            Some(s) if !s.is_finite() || s < 0.0 => Err(serde::de::Error::custom(
                "duration must be a non-negative number of seconds",
            )),
            Some(s) => Ok(Some(Duration::from_secs_f64(s))),
            None => Ok(None),
        }
    }
}

/// The default config file location, `~/.zscaler/zdx.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".zscaler").join("zdx.yaml"))
}

/// Resolved, immutable ZDX client configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// API base URL, e.g. `https://api.zdxcloud.net`.
    pub base_url: String,
    /// API key credentials.
    pub credentials: ApiCredentials,
    /// Transport settings: retry, throttling, timeouts, proxy, logging.
    pub client: ClientConfig,
    /// Token endpoint settings.
    pub auth: AuthConfig,
}

impl Configuration {
    /// Create a configuration builder.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }
}

/// Builder for [`Configuration`].
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    explicit: Settings,
    environment: Settings,
    config_file: Option<PathBuf>,
    config_file_required: bool,
    rate_limit: Option<RateLimitConfig>,
    auth: Option<AuthConfig>,
}

impl ConfigurationBuilder {
    /// Start with defaults only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key ID and secret.
    pub fn with_credentials(
        mut self,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        self.explicit.key_id = Some(key_id.into());
        self.explicit.key_secret = Some(key_secret.into());
        self
    }

    /// Set the cloud name; the base URL becomes `https://api.{cloud}.net`.
    pub fn with_cloud(mut self, cloud: impl Into<String>) -> Self {
        self.explicit.cloud = Some(cloud.into());
        self
    }

    /// Set the base URL directly (takes precedence over the cloud).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.explicit.base_url = Some(base_url.into());
        self
    }

    /// Route all traffic through a proxy.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.explicit.proxy_host = Some(proxy.host);
        self.explicit.proxy_port = Some(proxy.port);
        self.explicit.proxy_username = proxy.username;
        self.explicit.proxy_password = proxy.password;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.explicit.max_retries = Some(retries);
        self
    }

    /// Set the minimum backoff wait.
    pub fn with_min_wait(mut self, wait: Duration) -> Self {
        self.explicit.min_wait = Some(wait);
        self
    }

    /// Set the maximum backoff wait.
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.explicit.max_wait = Some(wait);
        self
    }

    /// Cool down when the upstream remaining budget drops to `threshold`.
    pub fn with_remaining_threshold(mut self, threshold: u32) -> Self {
        self.explicit.rate_limit_remaining_threshold = Some(threshold);
        self
    }

    /// Set the per-attempt request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.explicit.request_timeout = Some(timeout);
        self
    }

    /// Log response bodies at debug level.
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.explicit.debug = Some(enabled);
        self
    }

    /// Set the User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.explicit.user_agent = Some(user_agent.into());
        self
    }

    /// Replace the client-side rate limits.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Replace the token endpoint settings.
    pub fn with_auth_config(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Read settings from this YAML file. A missing file is an error.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self.config_file_required = true;
        self
    }

    /// Pick up environment variables and the config file they point to (or
    /// `~/.zscaler/zdx.yaml` when present).
    pub fn load_environment(self) -> Result<Self> {
        self.load_environment_from(|name| std::env::var(name).ok())
    }

    /// [`Self::load_environment`] reading variables through `lookup`.
    pub fn load_environment_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if self.config_file.is_none() {
            match lookup(CONFIG_FILE_VAR).filter(|v| !v.trim().is_empty()) {
                Some(path) => {
                    self.config_file = Some(PathBuf::from(path));
                    self.config_file_required = true;
                }
                None => {
                    self.config_file = default_config_path().filter(|p| p.is_file());
                }
            }
        }
        self.environment = Settings::from_env_lookup(lookup)?;
        Ok(self)
    }

    /// Merge the layers and validate the result.
    pub fn build(self) -> Result<Configuration> {
        let file = match &self.config_file {
            Some(path) if self.config_file_required || path.is_file() => {
                debug!(path = %path.display(), "Loading config file");
                Settings::from_file(path)?
            }
            _ => Settings::default(),
        };
        let settings = file.overlay(self.environment).overlay(self.explicit);

        let credentials = ApiCredentials::new(
            settings.key_id.clone().unwrap_or_default(),
            settings.key_secret.clone().unwrap_or_default(),
        );
        credentials.validate()?;

        let base_url = resolve_base_url(&settings)?;

        let mut retry = RetryConfig::default();
        if let Some(max_retries) = settings.max_retries {
            retry = retry.with_max_retries(max_retries);
        }
        if let Some(min_wait) = settings.min_wait {
            retry = retry.with_min_wait(min_wait);
        }
        if let Some(max_wait) = settings.max_wait {
            retry = retry.with_max_wait(max_wait);
        }
        if let Some(threshold) = settings.rate_limit_remaining_threshold {
            retry = retry.with_remaining_threshold(threshold);
        }
        if retry.min_wait > retry.max_wait {
            return Err(config_error(format!(
                "min wait ({:?}) exceeds max wait ({:?})",
                retry.min_wait, retry.max_wait
            )));
        }

        let mut client = ClientConfig::builder()
            .with_retry(retry)
            .with_rate_limit(self.rate_limit.unwrap_or_default());
        let mut auth = self.auth.unwrap_or_default();

        if let Some(timeout) = settings.request_timeout {
            client = client.with_timeout(timeout);
            auth = auth.with_timeout(timeout);
        }
        if let Some(user_agent) = &settings.user_agent {
            client = client.with_user_agent(user_agent.as_str());
            auth = auth.with_user_agent(user_agent.as_str());
        }
        if let Some(debug) = settings.debug {
            client = client.with_body_logging(debug);
        }
        if let Some(host) = settings.proxy_host.filter(|h| !h.is_empty()) {
            let port = settings
                .proxy_port
                .ok_or_else(|| config_error("proxy host set without a proxy port"))?;
            let mut proxy = ProxyConfig::new(host, port);
            proxy.username = settings.proxy_username;
            proxy.password = settings.proxy_password;
            client = client.with_proxy(proxy);
        }

        Ok(Configuration {
            base_url,
            credentials,
            client: client.build(),
            auth,
        })
    }
}

fn resolve_base_url(settings: &Settings) -> Result<String> {
    let base_url = match &settings.base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => {
            let cloud = settings.cloud.as_deref().unwrap_or(DEFAULT_CLOUD);
            if cloud.is_empty() || cloud.contains(['/', ':', '.']) {
                return Err(config_error(format!("invalid cloud name: {cloud}")));
            }
            format!("https://api.{cloud}.net")
        }
    };

    url::Url::parse(&base_url)?;
    Ok(base_url)
}
