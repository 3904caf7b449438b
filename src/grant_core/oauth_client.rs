use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::Method;
use tracing::{debug, instrument, warn};
use url::Url;
use url::form_urlencoded::Serializer;

use super::config::{ConfigError, GrantConfig};
use super::http_client::{HttpRequest, HttpResponse, OAuthHttpClient};
use super::types::{ProviderError, TokenResponse};

/// Client for the two legs of the authorization code grant that involve the
/// authorization server: the browser redirect and the back-channel token
/// calls. It never retries; that is the caller's policy.
#[derive(Clone)]
pub struct AuthServerClient {
    client_id: String,
    client_secret: Option<String>,
    auth_url: Url,
    token_url: String,
    revoke_token_url: Option<String>,
    scopes: Vec<String>,
    extra_parameters: Vec<(String, String)>,
    http: Arc<dyn OAuthHttpClient>,
    timeout: Duration,
}

impl AuthServerClient {
    pub fn new(config: &GrantConfig, http: Arc<dyn OAuthHttpClient>) -> Result<Self, ConfigError> {
        let auth_url = Url::parse(&config.auth_url).map_err(|e| ConfigError::Invalid {
            option: "auth_url",
            reason: e.to_string(),
        })?;
        Ok(AuthServerClient {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_url,
            token_url: config.token_url.clone(),
            revoke_token_url: config.revoke_token_url.clone(),
            scopes: config.scopes.clone(),
            extra_parameters: config
                .auth_url_parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            http,
            timeout: config.provider_timeout_duration(),
        })
    }

    /// Constructs the authorization URL the browser is sent to.
    pub fn build_authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        let mut url = self.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            if !self.client_id.is_empty() {
                query.append_pair("client_id", &self.client_id);
            }
            query.append_pair("redirect_uri", redirect_uri);
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
            for (k, v) in &self.extra_parameters {
                query.append_pair(k, v);
            }
            query.append_pair("state", state);
        }
        url.to_string()
    }

    /// Exchanges an authorization code for tokens.
    #[instrument(skip(self, code), level = "debug")]
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, ProviderError> {
        let form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        self.token_request(form).await
    }

    /// Trades a refresh token for a new access token.
    #[instrument(skip_all, level = "debug")]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ProviderError> {
        let form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        self.token_request(form).await
    }

    /// Revokes a token at the revocation endpoint, if one is configured.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn revoke(&self, token: &str, token_type_hint: &str) -> Result<(), ProviderError> {
        let Some(url) = &self.revoke_token_url else {
            return Ok(());
        };
        let form = vec![("token", token), ("token_type_hint", token_type_hint)];
        let response = self.send(self.post_form(url, form)).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(classify_failure(response))
        }
    }

    async fn token_request(&self, form: Vec<(&str, &str)>) -> Result<TokenResponse, ProviderError> {
        let response = self.send(self.post_form(&self.token_url, form)).await?;
        if !response.is_success() {
            return Err(classify_failure(response));
        }
        let tokens: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|e| ProviderError::Transport(format!("unreadable token response: {e}")))?;
        if tokens.access_token.is_empty() {
            return Err(ProviderError::Rejected {
                status: response.status,
                body: "token response without access_token".into(),
            });
        }
        debug!(
            expires_in = ?tokens.expires_in,
            refresh_token = tokens.refresh_token.is_some(),
            "token endpoint issued tokens"
        );
        Ok(tokens)
    }

    fn post_form(&self, url: &str, form: Vec<(&str, &str)>) -> HttpRequest {
        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        let mut body = Serializer::new(String::new());
        body.extend_pairs(form);
        match &self.client_secret {
            Some(secret) => {
                let creds = format!("{}:{}", self.client_id, secret);
                headers.push(("Authorization".to_string(), format!("Basic {}", STANDARD.encode(creds))));
            }
            None if !self.client_id.is_empty() => {
                body.append_pair("client_id", &self.client_id);
            }
            None => {}
        }
        HttpRequest {
            method: Method::POST,
            url: url.to_string(),
            headers,
            body: Some(body.finish().into_bytes()),
            timeout: Some(self.timeout),
        }
    }

    /// One attempt, bounded by the configured timeout. Dropping the returned
    /// future aborts the call.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        match tokio::time::timeout(self.timeout, self.http.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                warn!(error = %err, "authorization server unreachable");
                Err(ProviderError::Transport(err.to_string()))
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "authorization server timed out");
                Err(ProviderError::Transport("timed out".into()))
            }
        }
    }
}

/// 5xx counts as a transport failure; any other non-2xx is a rejection.
fn classify_failure(response: HttpResponse) -> ProviderError {
    let body = String::from_utf8_lossy(&response.body).into_owned();
    if response.status >= 500 {
        warn!(status = response.status, "authorization server error");
        ProviderError::Transport(format!("status {}", response.status))
    } else {
        warn!(status = response.status, "authorization server rejected the request");
        ProviderError::Rejected { status: response.status, body }
    }
}
