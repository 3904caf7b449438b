//! The filter answering the authorization server's redirect back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use http::{Response, StatusCode};
use tracing::{debug, info};

use super::cookie::append_set_cookie;
use super::filter::{Body, Filter, FilterContext, redirect_response};
use super::oauth_grant::GrantShared;
use super::types::{GrantError, Session};

/// Route name of [`CallbackFilter`].
pub const GRANT_CALLBACK_NAME: &str = "grantCallback";

/// Completes the login: checks the state, exchanges the code and hands the
/// browser its session cookie. Always serves the request.
pub struct CallbackFilter {
    shared: Arc<GrantShared>,
}

impl CallbackFilter {
    pub(crate) fn new(shared: Arc<GrantShared>) -> Self {
        CallbackFilter { shared }
    }

    async fn complete(&self, ctx: &FilterContext) -> Result<Response<Body>, GrantError> {
        let query = ctx.request().uri().query().unwrap_or_default();
        if let Some(error) = query_param(query, "error") {
            debug!(%error, "authorization server reported an error");
        }
        let code = query_param(query, "code").ok_or(GrantError::MissingParameter("code"))?;
        let state = query_param(query, "state").ok_or(GrantError::MissingParameter("state"))?;

        let auth_state = self.shared.states.validate(&state, Utc::now())?;
        let callback_url = self.shared.callback_url(ctx.request());
        let tokens = self.shared.provider.exchange_code(&code, &callback_url).await?;

        let now = Utc::now();
        let session = Session::issue(&tokens, now);
        let cookie = self.shared.session_cookie(&session, now)?;
        let target = self.shared.safe_target(&auth_state.original_url, &callback_url);
        let mut response = redirect_response(StatusCode::TEMPORARY_REDIRECT, &target)?;
        append_set_cookie(response.headers_mut(), &cookie)?;
        info!(refreshable = session.is_refreshable(), "login completed");
        Ok(response)
    }
}

/// First non-empty value of `name` in a query string.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl Filter for CallbackFilter {
    fn name(&self) -> &'static str {
        GRANT_CALLBACK_NAME
    }

    async fn request(&self, ctx: &mut FilterContext) {
        let response = match self.complete(ctx).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        };
        ctx.serve(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant_core::config::GrantConfig;
    use crate::grant_core::http_client::{HttpResponse, InMemoryHttpClient};
    use crate::grant_core::oauth_grant::OAuthGrant;
    use crate::grant_core::secrets::StaticSecretSource;
    use http::Request;
    use http::header::{LOCATION, SET_COOKIE};
    use serde_json::json;

    const TOKEN_URL: &str = "https://auth.test/token";

    async fn grant(http: &InMemoryHttpClient) -> OAuthGrant {
        let config = GrantConfig::new("https://auth.test/auth", TOKEN_URL);
        OAuthGrant::with_secret_source(config, Arc::new(http.clone()), Arc::new(StaticSecretSource::new(["secret"])))
            .await
            .unwrap()
    }

    async fn call(grant: &OAuthGrant, query: &str) -> Response<Body> {
        let uri = format!("/.well-known/oauth2-callback{query}");
        let request = Request::get(uri).header("host", "proxy.test").body(Vec::new()).unwrap();
        let mut ctx = FilterContext::new(request);
        grant.callback_filter().request(&mut ctx).await;
        assert!(ctx.is_served());
        ctx.into_response()
    }

    fn state(grant: &OAuthGrant, original: &str) -> String {
        let states = crate::grant_core::state::StateCodec::new(grant.codec().clone(), chrono::Duration::minutes(5));
        states.issue(original, Utc::now()).unwrap()
    }

    #[test]
    fn query_param_decodes_values() {
        assert_eq!(query_param("code=a%2Bb&state=s", "code").as_deref(), Some("a+b"));
        assert_eq!(query_param("code=&state=s", "code"), None);
        assert_eq!(query_param("", "state"), None);
    }

    #[tokio::test]
    async fn missing_parameters_are_bad_requests() {
        let http = InMemoryHttpClient::new();
        let grant = grant(&http).await;
        for query in ["", "?code=c1", "?state=s1", "?error=access_denied&state=s1"] {
            let response = call(&grant, query).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
            assert!(response.headers().get(SET_COOKIE).is_none());
        }
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn foreign_state_is_rejected_before_exchange() {
        let http = InMemoryHttpClient::with_default(HttpResponse::json(200, &json!({"access_token": "t"})));
        let grant = grant(&http).await;
        let response = call(&grant, "?code=c1&state=s1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn provider_failures_map_to_statuses() {
        for (upstream, expected) in [
            (HttpResponse::json(400, &json!({"error": "invalid_grant"})), StatusCode::UNAUTHORIZED),
            (HttpResponse::status(500), StatusCode::BAD_GATEWAY),
        ] {
            let http = InMemoryHttpClient::with_default(upstream);
            let grant = grant(&http).await;
            let state = state(&grant, "http://proxy.test/");
            let response = call(&grant, &format!("?code=c1&state={state}")).await;
            assert_eq!(response.status(), expected);
            assert!(response.headers().get(SET_COOKIE).is_none());
        }
    }

    #[tokio::test]
    async fn success_sets_one_cookie_and_returns_to_origin() {
        let http = InMemoryHttpClient::new();
        http.insert_response(
            TOKEN_URL,
            HttpResponse::json(200, &json!({"access_token": "foobarbaz", "expires_in": 3600})),
        );
        let grant = grant(&http).await;
        let state = state(&grant, "http://proxy.test/protected?x=1");
        let response = call(&grant, &format!("?code=c1&state={state}")).await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "http://proxy.test/protected?x=1");
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 1);

        let sent = &http.requests()[0];
        assert_eq!(sent.form_value("code").as_deref(), Some("c1"));
        assert_eq!(
            sent.form_value("redirect_uri").as_deref(),
            Some("http://proxy.test/.well-known/oauth2-callback")
        );
    }

    #[tokio::test]
    async fn foreign_origin_is_not_a_redirect_target() {
        let http = InMemoryHttpClient::with_default(HttpResponse::json(200, &json!({"access_token": "t"})));
        let grant = grant(&http).await;
        let state = state(&grant, "https://evil.test/steal");
        let response = call(&grant, &format!("?code=c1&state={state}")).await;
        assert_eq!(response.headers()[LOCATION], "/");
    }
}
