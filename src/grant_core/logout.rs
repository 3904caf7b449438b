//! Logout: revoke the held tokens and clear the session cookie.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::cookie::{append_set_cookie, removal_cookie, strip_cookie};
use super::filter::{Filter, FilterContext};
use super::oauth_grant::GrantShared;
use super::types::{GrantError, ProviderError, Session};

/// Route name of [`GrantLogoutFilter`].
pub const GRANT_LOGOUT_NAME: &str = "grantLogout";

pub struct GrantLogoutFilter {
    shared: Arc<GrantShared>,
}

impl GrantLogoutFilter {
    pub(crate) fn new(shared: Arc<GrantShared>) -> Self {
        GrantLogoutFilter { shared }
    }

    /// Refresh token first: revoking it usually invalidates the access token too.
    async fn revoke(&self, session: &Session) -> Result<(), ProviderError> {
        if let Some(refresh_token) = session.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            self.shared.provider.revoke(refresh_token, "refresh_token").await?;
        }
        self.shared.provider.revoke(&session.access_token, "access_token").await
    }
}

#[async_trait]
impl Filter for GrantLogoutFilter {
    fn name(&self) -> &'static str {
        GRANT_LOGOUT_NAME
    }

    async fn request(&self, ctx: &mut FilterContext) {
        let session = self.shared.read_session(ctx.request().headers());
        strip_cookie(ctx.request_mut().headers_mut(), &self.shared.config.cookie.name);
        let Some(session) = session else {
            debug!("logout without a session");
            return;
        };
        if let Err(err) = self.revoke(&session).await {
            warn!(error = %err, "token revocation failed");
            ctx.serve(GrantError::ProviderUnavailable(err.to_string()).into_response());
        }
    }

    /// The cookie is cleared whether or not revocation worked.
    async fn response(&self, ctx: &mut FilterContext) {
        let cookie = removal_cookie(&self.shared.config.cookie);
        if let Some(response) = ctx.response_mut() {
            if let Err(err) = append_set_cookie(response.headers_mut(), &cookie) {
                warn!(error = %err, "cannot clear the session cookie");
            }
        }
    }
}
