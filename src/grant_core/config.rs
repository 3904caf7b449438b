//! Configuration of the grant filters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cookie::SameSite;
use http::HeaderName;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Path the provider redirects back to unless overridden.
pub const DEFAULT_CALLBACK_PATH: &str = "/.well-known/oauth2-callback";

/// Name of the session cookie unless overridden.
pub const DEFAULT_COOKIE_NAME: &str = "oauth-grant";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option `{0}`")]
    Missing(&'static str),
    #[error("invalid option `{option}`: {reason}")]
    Invalid { option: &'static str, reason: String },
    #[error("failed to read configuration: {0}")]
    Read(String),
}

/// SameSite policy of the session cookie. `None` is not offered: the cookie
/// must not be sent on cross-site subresource requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    #[default]
    Lax,
    Strict,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::Strict => SameSite::Strict,
        }
    }
}

/// Attributes of the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub name: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSitePolicy,
}

impl Default for CookieSettings {
    fn default() -> Self {
        CookieSettings {
            name: DEFAULT_COOKIE_NAME.to_string(),
            domain: None,
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSitePolicy::Lax,
        }
    }
}

/// Options recognized by the grant filters.
///
/// Deserializable from JSON, with every option except the provider
/// endpoints defaulted. The builder setters cover the same surface for
/// programmatic setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrantConfig {
    /// File holding the encryption secrets, one per line, newest last.
    pub secret_file: Option<PathBuf>,
    /// Token introspection endpoint. When set, held tokens are checked
    /// against it on every request.
    pub tokeninfo_url: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_token_url: Option<String>,
    pub callback_path: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    /// Extra query parameters appended to the authorization redirect.
    pub auth_url_parameters: BTreeMap<String, String>,
    pub cookie: CookieSettings,
    pub refreshable_cookie_max_age_secs: u64,
    pub state_ttl_secs: u64,
    pub secret_refresh_interval_secs: u64,
    pub key_retention: usize,
    pub provider_timeout_ms: u64,
    /// Request header carrying `Bearer <access token>` to the backend.
    pub access_token_header: String,
}

impl Default for GrantConfig {
    fn default() -> Self {
        GrantConfig {
            secret_file: None,
            tokeninfo_url: None,
            auth_url: String::new(),
            token_url: String::new(),
            revoke_token_url: None,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            client_id: String::new(),
            client_secret: None,
            scopes: Vec::new(),
            auth_url_parameters: BTreeMap::new(),
            cookie: CookieSettings::default(),
            refreshable_cookie_max_age_secs: 7 * 24 * 60 * 60,
            state_ttl_secs: 300,
            secret_refresh_interval_secs: 60,
            key_retention: 5,
            provider_timeout_ms: 10_000,
            access_token_header: "authorization".to_string(),
        }
    }
}

impl GrantConfig {
    /// Creates a configuration for the given provider endpoints with defaults elsewhere.
    pub fn new(auth_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        GrantConfig {
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            ..GrantConfig::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Read(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json(&content)
    }

    /// Sets the secret file.
    pub fn secret_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secret_file = Some(path.into());
        self
    }

    /// Sets the token introspection endpoint.
    pub fn tokeninfo_url<S: Into<String>>(mut self, url: S) -> Self {
        self.tokeninfo_url = Some(url.into());
        self
    }

    /// Sets the revocation endpoint used on logout.
    pub fn revoke_token_url<S: Into<String>>(mut self, url: S) -> Self {
        self.revoke_token_url = Some(url.into());
        self
    }

    /// Overrides the callback path.
    pub fn callback_path<S: Into<String>>(mut self, path: S) -> Self {
        self.callback_path = path.into();
        self
    }

    /// Sets the client credentials.
    pub fn client<S: Into<String>>(mut self, id: S, secret: Option<S>) -> Self {
        self.client_id = id.into();
        self.client_secret = secret.map(Into::into);
        self
    }

    pub fn scopes(mut self, scopes: impl IntoIterator<Item = String>) -> Self {
        self.scopes = scopes.into_iter().collect();
        self
    }

    pub fn auth_url_parameter<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.auth_url_parameters.insert(key.into(), value.into());
        self
    }

    /// Overrides the session cookie name.
    pub fn cookie_name<S: Into<String>>(mut self, name: S) -> Self {
        self.cookie.name = name.into();
        self
    }

    pub fn cookie_settings(mut self, cookie: CookieSettings) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn state_ttl(mut self, ttl: Duration) -> Self {
        self.state_ttl_secs = ttl.as_secs();
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn key_retention(mut self, retention: usize) -> Self {
        self.key_retention = retention;
        self
    }

    /// Check every option that can be checked without I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("auth_url", &self.auth_url)?;
        check_url("token_url", &self.token_url)?;
        if let Some(url) = &self.tokeninfo_url {
            check_url("tokeninfo_url", url)?;
        }
        if let Some(url) = &self.revoke_token_url {
            check_url("revoke_token_url", url)?;
        }
        if !self.callback_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                option: "callback_path",
                reason: "must be an absolute path".into(),
            });
        }
        if self.cookie.name.is_empty() {
            return Err(ConfigError::Missing("cookie.name"));
        }
        for (option, value) in [
            ("state_ttl_secs", self.state_ttl_secs),
            ("refreshable_cookie_max_age_secs", self.refreshable_cookie_max_age_secs),
            ("secret_refresh_interval_secs", self.secret_refresh_interval_secs),
            ("provider_timeout_ms", self.provider_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid { option, reason: "must be positive".into() });
            }
        }
        if self.key_retention == 0 {
            return Err(ConfigError::Invalid { option: "key_retention", reason: "must keep at least one key".into() });
        }
        self.token_header()?;
        Ok(())
    }

    pub(crate) fn token_header(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.access_token_header.as_bytes()).map_err(|e| ConfigError::Invalid {
            option: "access_token_header",
            reason: e.to_string(),
        })
    }

    pub fn state_ttl_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.state_ttl_secs.min(i64::MAX as u64 / 1000) as i64)
    }

    pub fn refreshable_cookie_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refreshable_cookie_max_age_secs.min(i64::MAX as u64 / 1000) as i64)
    }

    pub fn secret_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.secret_refresh_interval_secs)
    }

    pub fn provider_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

fn check_url(option: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Missing(option));
    }
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid { option, reason: e.to_string() })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid { option, reason: format!("unsupported scheme {other}") }),
    }
}
