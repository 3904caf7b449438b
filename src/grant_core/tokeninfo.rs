//! Policies deciding whether a held access token is still good.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::Method;
use tracing::{debug, warn};

use super::http_client::{HttpRequest, OAuthHttpClient};
use super::types::Session;

#[async_trait]
pub trait TokenValidator: Send + Sync + 'static {
    async fn is_valid(&self, session: &Session, now: DateTime<Utc>) -> bool;
}

/// Trusts a decrypted session until its recorded expiry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExpiry;

#[async_trait]
impl TokenValidator for LocalExpiry {
    async fn is_valid(&self, session: &Session, now: DateTime<Utc>) -> bool {
        !session.is_expired_at(now)
    }
}

/// Asks the token introspection endpoint about every held token.
///
/// Local expiry is checked first; an expired token is never sent out.
/// An unreachable endpoint counts as an invalid token.
#[derive(Clone)]
pub struct Tokeninfo {
    url: String,
    http: Arc<dyn OAuthHttpClient>,
    timeout: Duration,
}

impl Tokeninfo {
    pub fn new(url: impl Into<String>, http: Arc<dyn OAuthHttpClient>, timeout: Duration) -> Self {
        Tokeninfo { url: url.into(), http, timeout }
    }
}

#[async_trait]
impl TokenValidator for Tokeninfo {
    async fn is_valid(&self, session: &Session, now: DateTime<Utc>) -> bool {
        if session.is_expired_at(now) {
            return false;
        }
        let request = HttpRequest {
            method: Method::GET,
            url: self.url.clone(),
            headers: vec![("Authorization".to_string(), format!("Bearer {}", session.access_token))],
            body: None,
            timeout: Some(self.timeout),
        };
        match tokio::time::timeout(self.timeout, self.http.execute(request)).await {
            Ok(Ok(response)) if response.is_success() => true,
            Ok(Ok(response)) => {
                debug!(status = response.status, "tokeninfo refused the access token");
                false
            }
            Ok(Err(err)) => {
                warn!(error = %err, "tokeninfo unreachable");
                false
            }
            Err(_) => {
                warn!("tokeninfo timed out");
                false
            }
        }
    }
}
