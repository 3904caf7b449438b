//! The filter guarding protected routes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::SET_COOKIE;
use http::{HeaderValue, Response, StatusCode};
use tracing::{debug, warn};

use super::cookie::strip_cookie;
use super::filter::{Body, Filter, FilterContext, redirect_response};
use super::oauth_grant::GrantShared;
use super::types::{GrantError, Session};

/// Route name of [`GrantFilter`].
pub const OAUTH_GRANT_NAME: &str = "oauthGrant";

/// What the session cookie of a request amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Valid,
    ExpiredRefreshable,
    ExpiredTerminal,
}

/// Refreshed session cookie waiting for the response phase.
#[derive(Clone)]
struct PendingCookie(HeaderValue);

/// Forwards requests that carry a valid session, refreshes expired ones
/// and sends everybody else to log in.
pub struct GrantFilter {
    shared: Arc<GrantShared>,
}

impl GrantFilter {
    pub(crate) fn new(shared: Arc<GrantShared>) -> Self {
        GrantFilter { shared }
    }

    pub async fn classify(&self, session: Option<&Session>, now: DateTime<Utc>) -> SessionState {
        let Some(session) = session else {
            return SessionState::NoSession;
        };
        if self.shared.validator.is_valid(session, now).await {
            SessionState::Valid
        } else if session.is_refreshable() {
            SessionState::ExpiredRefreshable
        } else {
            SessionState::ExpiredTerminal
        }
    }

    /// Put the access token on the request and drop our cookie from it.
    fn authorize_request(&self, ctx: &mut FilterContext, access_token: &str) -> Result<(), GrantError> {
        let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|_| GrantError::Internal("access token is not a valid header value".into()))?;
        let headers = ctx.request_mut().headers_mut();
        strip_cookie(headers, &self.shared.config.cookie.name);
        headers.insert(self.shared.token_header.clone(), value);
        Ok(())
    }

    /// One refresh attempt. `None` means log in again.
    async fn refresh(&self, session: &Session) -> Option<(Session, HeaderValue)> {
        let refresh_token = session.refresh_token.as_deref()?;
        let tokens = match self.shared.provider.refresh(refresh_token).await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(error = %err, "session refresh failed");
                return None;
            }
        };
        let now = Utc::now();
        let next = session.refreshed(&tokens, now);
        let cookie = match self.shared.session_cookie(&next, now) {
            Ok(cookie) => cookie,
            Err(err) => {
                warn!(error = %err, "refreshed session could not be encoded");
                return None;
            }
        };
        let header = HeaderValue::from_str(&cookie.to_string()).ok()?;
        Some((next, header))
    }

    fn redirect_to_login(&self, ctx: &mut FilterContext) {
        match self.login_redirect(ctx) {
            Ok(response) => ctx.serve(response),
            Err(err) => ctx.serve(err.into_response()),
        }
    }

    fn login_redirect(&self, ctx: &FilterContext) -> Result<Response<Body>, GrantError> {
        let original_url = self.shared.original_url(ctx.request());
        let state = self.shared.states.issue(&original_url, Utc::now())?;
        let callback_url = self.shared.callback_url(ctx.request());
        let location = self.shared.provider.build_authorization_url(&state, &callback_url);
        debug!(callback = %callback_url, "redirecting to the authorization server");
        redirect_response(StatusCode::TEMPORARY_REDIRECT, &location)
    }
}

#[async_trait]
impl Filter for GrantFilter {
    fn name(&self) -> &'static str {
        OAUTH_GRANT_NAME
    }

    async fn request(&self, ctx: &mut FilterContext) {
        let session = self.shared.read_session(ctx.request().headers());
        let state = self.classify(session.as_ref(), Utc::now()).await;
        debug!(?state, "grant session state");

        let access_token = match (state, session) {
            (SessionState::Valid, Some(session)) => Some(session.access_token),
            (SessionState::ExpiredRefreshable, Some(session)) => match self.refresh(&session).await {
                Some((next, cookie)) => {
                    ctx.state_bag_mut().insert(PendingCookie(cookie));
                    Some(next.access_token)
                }
                None => None,
            },
            _ => None,
        };

        let Some(access_token) = access_token else {
            self.redirect_to_login(ctx);
            return;
        };
        if let Err(err) = self.authorize_request(ctx, &access_token) {
            warn!(error = %err, "cannot forward with the session token");
            ctx.state_bag_mut().remove::<PendingCookie>();
            self.redirect_to_login(ctx);
        }
    }

    async fn response(&self, ctx: &mut FilterContext) {
        let Some(PendingCookie(cookie)) = ctx.state_bag_mut().remove::<PendingCookie>() else {
            return;
        };
        if let Some(response) = ctx.response_mut() {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
    }
}
