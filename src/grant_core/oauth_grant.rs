//! Assembly of the grant filters around one shared configuration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cookie::Cookie;
use http::{HeaderMap, HeaderName, Request};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use super::callback::{CallbackFilter, GRANT_CALLBACK_NAME};
use super::codec::SessionCodec;
use super::config::{ConfigError, GrantConfig};
use super::cookie::{MAX_SESSION_COOKIE_BYTES, read_cookie, session_cookie};
use super::filter::{Body, FilterRegistry};
use super::grant::GrantFilter;
use super::http_client::OAuthHttpClient;
use super::logout::GrantLogoutFilter;
use super::oauth_client::AuthServerClient;
use super::routing::GrantPreprocessor;
use super::secrets::{FileSecretSource, SecretError, SecretSource, SecretStore};
use super::state::StateCodec;
use super::tokeninfo::{LocalExpiry, TokenValidator, Tokeninfo};
use super::types::{GrantError, Session};

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Secrets(#[from] SecretError),
}

/// Everything the filters share. Read-only after construction apart from the
/// key ring inside the secret store.
#[derive(Clone)]
pub(crate) struct GrantShared {
    pub(crate) config: GrantConfig,
    pub(crate) codec: SessionCodec,
    pub(crate) states: StateCodec,
    pub(crate) provider: AuthServerClient,
    pub(crate) validator: Arc<dyn TokenValidator>,
    pub(crate) token_header: HeaderName,
}

impl GrantShared {
    pub(crate) fn read_session(&self, headers: &HeaderMap) -> Option<Session> {
        let value = read_cookie(headers, &self.config.cookie.name)?;
        self.codec.decode(&value)
    }

    /// Fails rather than hand out a cookie the browser would silently drop.
    pub(crate) fn session_cookie(&self, session: &Session, now: DateTime<Utc>) -> Result<Cookie<'static>, GrantError> {
        let value = self.codec.encode(session)?;
        let max_age = session.cookie_max_age(self.config.refreshable_cookie_max_age(), now);
        let cookie = session_cookie(&self.config.cookie, value, max_age);
        let size = cookie.to_string().len();
        if size > MAX_SESSION_COOKIE_BYTES {
            warn!(size, limit = MAX_SESSION_COOKIE_BYTES, "session cookie too large for browsers");
            return Err(GrantError::SessionTooLarge { size, limit: MAX_SESSION_COOKIE_BYTES });
        }
        Ok(cookie)
    }

    /// Absolute callback URL on the origin the request came in on.
    pub(crate) fn callback_url(&self, request: &Request<Body>) -> String {
        format!("{}{}", origin(request), self.config.callback_path)
    }

    /// Absolute URL of the request, restored after login.
    pub(crate) fn original_url(&self, request: &Request<Body>) -> String {
        let path = request.uri().path_and_query().map_or("/", |p| p.as_str());
        format!("{}{}", origin(request), path)
    }

    /// `target` if it points at the proxy's own origin, `/` otherwise.
    pub(crate) fn safe_target(&self, target: &str, callback_url: &str) -> String {
        let (Ok(target_url), Ok(callback)) = (Url::parse(target), Url::parse(callback_url)) else {
            return "/".to_string();
        };
        let same_origin = target_url.scheme() == callback.scheme()
            && target_url.host_str() == callback.host_str()
            && target_url.port_or_known_default() == callback.port_or_known_default();
        if same_origin { target.to_string() } else { "/".to_string() }
    }
}

fn origin(request: &Request<Body>) -> String {
    let headers = request.headers();
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| v == "http" || v == "https")
        .or_else(|| request.uri().scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());
    let host = headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string());
    format!("{scheme}://{host}")
}

/// The authorization code grant, ready to be wired into a proxy.
///
/// ```ignore
/// let grant = OAuthGrant::new(config, Arc::new(ReqwestHttpClient::new()?)).await?;
/// grant.register(&mut registry);
/// let refresh = grant.spawn_secret_refresh();
/// let table = RouteTable::build(routes, &[Arc::new(grant.preprocessor())], &registry)?;
/// ```
#[derive(Clone)]
pub struct OAuthGrant {
    shared: Arc<GrantShared>,
}

impl OAuthGrant {
    /// Loads secrets from the configured `secret_file`.
    pub async fn new(config: GrantConfig, http: Arc<dyn OAuthHttpClient>) -> Result<Self, InitError> {
        let path = config.secret_file.clone().ok_or(ConfigError::Missing("secret_file"))?;
        Self::with_secret_source(config, http, Arc::new(FileSecretSource::new(path))).await
    }

    pub async fn with_secret_source(
        config: GrantConfig,
        http: Arc<dyn OAuthHttpClient>,
        source: Arc<dyn SecretSource>,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let secrets = Arc::new(SecretStore::load(source, config.key_retention).await?);
        let codec = SessionCodec::new(secrets);
        let states = StateCodec::new(codec.clone(), config.state_ttl_duration());
        let provider = AuthServerClient::new(&config, http.clone())?;
        let validator: Arc<dyn TokenValidator> = match &config.tokeninfo_url {
            Some(url) => Arc::new(Tokeninfo::new(url.clone(), http, config.provider_timeout_duration())),
            None => Arc::new(LocalExpiry),
        };
        let token_header = config.token_header()?;
        info!(
            callback_path = %config.callback_path,
            cookie = %config.cookie.name,
            tokeninfo = config.tokeninfo_url.is_some(),
            "oauth grant configured"
        );
        Ok(OAuthGrant {
            shared: Arc::new(GrantShared { config, codec, states, provider, validator, token_header }),
        })
    }

    /// Replaces the token validation policy.
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        Arc::make_mut(&mut self.shared).validator = validator;
        self
    }

    pub fn config(&self) -> &GrantConfig {
        &self.shared.config
    }

    pub fn codec(&self) -> &SessionCodec {
        &self.shared.codec
    }

    pub fn secrets(&self) -> &Arc<SecretStore> {
        self.shared.codec.secrets()
    }

    pub fn grant_filter(&self) -> Arc<GrantFilter> {
        Arc::new(GrantFilter::new(self.shared.clone()))
    }

    pub fn callback_filter(&self) -> Arc<CallbackFilter> {
        Arc::new(CallbackFilter::new(self.shared.clone()))
    }

    pub fn logout_filter(&self) -> Arc<GrantLogoutFilter> {
        Arc::new(GrantLogoutFilter::new(self.shared.clone()))
    }

    pub fn preprocessor(&self) -> GrantPreprocessor {
        GrantPreprocessor::new(self.shared.config.callback_path.clone(), GRANT_CALLBACK_NAME)
    }

    /// Registers the three grant filters under their route names.
    pub fn register(&self, registry: &mut FilterRegistry) {
        registry.register(self.grant_filter());
        registry.register(self.callback_filter());
        registry.register(self.logout_filter());
    }

    /// Starts reloading secrets on the configured interval.
    pub fn spawn_secret_refresh(&self) -> JoinHandle<()> {
        self.secrets().spawn_refresh(self.shared.config.secret_refresh_interval())
    }
}
