//! Grant primitives: the session payload, provider token responses and errors.

use chrono::{DateTime, Duration, Utc};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, to_vec};
use thiserror::Error;
use tracing::warn;

use super::filter::Body;

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
const MAX_TOKEN_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Decrypted content of the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Access token presented to the backend.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token.
    pub expiry: DateTime<Utc>,
    /// When this session was minted.
    pub issued_at: DateTime<Utc>,
}

impl Session {
    /// Builds a session from a successful code exchange.
    pub fn issue(tokens: &TokenResponse, now: DateTime<Utc>) -> Self {
        Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expiry: now + tokens.lifetime(),
            issued_at: now,
        }
    }

    /// Builds the session that replaces `self` after a refresh.
    ///
    /// Providers that do not rotate refresh tokens omit the field from the
    /// refresh response, in which case the current refresh token stays.
    pub fn refreshed(&self, tokens: &TokenResponse, now: DateTime<Utc>) -> Self {
        let mut next = Session::issue(tokens, now);
        if next.refresh_token.is_none() {
            next.refresh_token = self.refresh_token.clone();
        }
        next
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Cookie lifetime for this session.
    ///
    /// A refreshable session must outlive its access token, otherwise the
    /// browser drops the cookie before the refresh token can be used.
    pub fn cookie_max_age(&self, refreshable_max_age: Duration, now: DateTime<Utc>) -> Duration {
        if self.is_refreshable() {
            return refreshable_max_age;
        }
        let remaining = self.expiry - now;
        if remaining < Duration::seconds(1) {
            Duration::seconds(1)
        } else {
            remaining
        }
    }
}

/// JSON body returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "seconds_or_string")]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Some providers send `expires_in` as a numeric string.
fn seconds_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(secs)) => Ok(Some(secs)),
        Some(Seconds::Text(text)) => text.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl TokenResponse {
    pub fn lifetime(&self) -> Duration {
        let secs = self
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .min(MAX_TOKEN_LIFETIME_SECS);
        Duration::seconds(secs as i64)
    }
}

/// Failure talking to the authorization server.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered and refused the grant (4xx). Do not retry.
    #[error("provider rejected the request with status {status}")]
    Rejected { status: u16, body: String },
    /// Timeout, connection failure, 5xx or an unreadable response.
    #[error("provider transport failure: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Whether a caller may retry once. Rejections are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transport(_))
    }
}

/// Errors that end a request with a response produced by the grant filters.
#[derive(Debug, Error)]
pub enum GrantError {
    #[error("missing required `{0}`")]
    MissingParameter(&'static str),
    #[error("invalid or expired state")]
    InvalidState,
    #[error("provider rejected the grant")]
    ProviderRejected,
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("session cookie of {size} bytes exceeds {limit}")]
    SessionTooLarge { size: usize, limit: usize },
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProviderError> for GrantError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { .. } => GrantError::ProviderRejected,
            ProviderError::Transport(reason) => GrantError::ProviderUnavailable(reason),
        }
    }
}

impl GrantError {
    pub fn status(&self) -> StatusCode {
        match self {
            GrantError::MissingParameter(_) | GrantError::InvalidState => StatusCode::BAD_REQUEST,
            GrantError::ProviderRejected => StatusCode::UNAUTHORIZED,
            GrantError::ProviderUnavailable(_) | GrantError::SessionTooLarge { .. } => StatusCode::BAD_GATEWAY,
            GrantError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GrantError::MissingParameter(_) => "invalid_request",
            GrantError::InvalidState => "invalid_state",
            GrantError::ProviderRejected => "invalid_grant",
            GrantError::ProviderUnavailable(_) => "temporarily_unavailable",
            GrantError::SessionTooLarge { .. } | GrantError::Internal(_) => "server_error",
        }
    }

    /// Convert this error into a JSON response with the matching status.
    ///
    /// Provider and internal details stay in the log; the body only carries
    /// a generic description.
    pub fn into_response(&self) -> Response<Body> {
        let status = self.status();
        let code = self.code();
        let description = match self {
            GrantError::MissingParameter(_) | GrantError::InvalidState => self.to_string(),
            GrantError::ProviderRejected => "The authorization server rejected the grant".to_string(),
            GrantError::ProviderUnavailable(_) => "The authorization server is unavailable".to_string(),
            GrantError::SessionTooLarge { .. } => "The issued tokens do not fit in a cookie".to_string(),
            GrantError::Internal(_) => "Internal server error".to_string(),
        };
        warn!(error = %self, error_code = code, http_status = %status, "oauth grant error");
        let body = to_vec(&json!({ "error": code, "error_description": description }))
            .unwrap_or_default();
        let mut response = Response::new(body);
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}
