#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::header::{COOKIE, LOCATION, SET_COOKIE};
use http::{Request, Response, StatusCode};
use serde_json::json;
use starberry_grant::{
    Backend, BackendDef, Body, FilterContext, FilterRegistry, GrantConfig, HttpClientError, HttpRequest,
    HttpResponse, OAuthGrant, OAuthHttpClient, PathPattern, PreProcessor, RouteDef, RouteTable, SecretSource,
};
use url::Url;

pub const AUTH_URL: &str = "http://auth.test/auth";
pub const TOKEN_URL: &str = "http://auth.test/token";
pub const REVOKE_URL: &str = "http://auth.test/revoke";
pub const TOKENINFO_URL: &str = "http://auth.test/tokeninfo";
pub const PROXY_HOST: &str = "proxy.test";
pub const AUTH_CODE: &str = "quxquuxquz";
pub const ACCESS_TOKEN: &str = "foobarbaz";
pub const REFRESHED_TOKEN: &str = "refreshed";

/// Authorization server stand-in answering token, revocation and tokeninfo calls.
#[derive(Clone, Default)]
pub struct MockAuthServer {
    refresh_token: Arc<Mutex<Option<String>>>,
    access_token: Arc<Mutex<Option<String>>>,
    stalled: Arc<AtomicBool>,
    token_status: Arc<Mutex<Option<u16>>>,
    refresh_calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockAuthServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue this refresh token alongside the access token.
    pub fn with_refresh_token(self, token: &str) -> Self {
        *self.refresh_token.lock().unwrap() = Some(token.to_string());
        self
    }

    /// Issue this access token on exchange and refresh instead of the defaults.
    pub fn with_access_token(self, token: &str) -> Self {
        *self.access_token.lock().unwrap() = Some(token.to_string());
        self
    }

    /// Accept calls but never answer them.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Make every token and revocation call answer with `status`.
    pub fn fail_with(&self, status: u16) {
        *self.token_status.lock().unwrap() = Some(status);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().iter().filter(|r| r.url == url).cloned().collect()
    }

    /// What the provider's login page does once the user agrees: redirect
    /// back to the callback with a code and the untouched state.
    pub fn authorize(&self, location: &str) -> String {
        let url = Url::parse(location).unwrap();
        assert_eq!(format!("{}://{}{}", url.scheme(), url.host_str().unwrap(), url.path()), AUTH_URL);
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .unwrap_or_else(|| panic!("authorization url lacks {name}"))
        };
        assert_eq!(param("response_type"), "code");
        let mut callback = Url::parse(&param("redirect_uri")).unwrap();
        callback
            .query_pairs_mut()
            .append_pair("code", AUTH_CODE)
            .append_pair("state", &param("state"));
        callback.to_string()
    }

    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        if let Some(status) = *self.token_status.lock().unwrap() {
            if request.url != TOKENINFO_URL {
                return HttpResponse::json(status, &json!({"error": "server_error"}));
            }
        }
        match request.url.as_str() {
            TOKEN_URL => match request.form_value("grant_type").as_deref() {
                Some("authorization_code") if request.form_value("code").as_deref() == Some(AUTH_CODE) => {
                    self.tokens(&self.issued_token(ACCESS_TOKEN))
                }
                Some("refresh_token") => {
                    self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                    let expected = self.refresh_token.lock().unwrap().clone();
                    if expected.is_some() && request.form_value("refresh_token") == expected {
                        let token = self.issued_token(REFRESHED_TOKEN);
                        HttpResponse::json(200, &json!({"access_token": token, "expires_in": 3600}))
                    } else {
                        HttpResponse::json(400, &json!({"error": "invalid_grant"}))
                    }
                }
                _ => HttpResponse::json(400, &json!({"error": "invalid_grant"})),
            },
            REVOKE_URL => HttpResponse::status(200),
            TOKENINFO_URL => match request.header("authorization") {
                Some(v) if v == format!("Bearer {ACCESS_TOKEN}") || v == format!("Bearer {REFRESHED_TOKEN}") => {
                    HttpResponse::json(200, &json!({"uid": "jdoe"}))
                }
                _ => HttpResponse::status(401),
            },
            _ => HttpResponse::status(404),
        }
    }

    fn issued_token(&self, default: &str) -> String {
        self.access_token.lock().unwrap().clone().unwrap_or_else(|| default.to_string())
    }

    fn tokens(&self, access_token: &str) -> HttpResponse {
        let mut body = json!({"access_token": access_token, "expires_in": 3600});
        if let Some(refresh) = self.refresh_token.lock().unwrap().clone() {
            body["refresh_token"] = json!(refresh);
        }
        HttpResponse::json(200, &body)
    }
}

impl OAuthHttpClient for MockAuthServer {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>> {
        if self.stalled.load(Ordering::SeqCst) {
            self.requests.lock().unwrap().push(request);
            return Box::pin(std::future::pending::<Result<HttpResponse, HttpClientError>>());
        }
        let response = self.respond(&request);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move { Ok(response) })
    }
}

/// Backend that records what reached it and answers 204.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    seen: Arc<Mutex<Vec<Request<Body>>>>,
}

impl RecordingBackend {
    pub fn seen(&self) -> Vec<Request<Body>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| {
                let mut copy = Request::new(r.body().clone());
                *copy.uri_mut() = r.uri().clone();
                *copy.headers_mut() = r.headers().clone();
                copy
            })
            .collect()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn forward(&self, request: &Request<Body>) -> Response<Body> {
        let mut copy = Request::new(request.body().clone());
        *copy.uri_mut() = request.uri().clone();
        *copy.headers_mut() = request.headers().clone();
        self.seen.lock().unwrap().push(copy);
        no_content()
    }
}

struct Shunt;

#[async_trait]
impl Backend for Shunt {
    async fn forward(&self, _request: &Request<Body>) -> Response<Body> {
        no_content()
    }
}

fn no_content() -> Response<Body> {
    let mut response = Response::new(Body::new());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

pub fn config() -> GrantConfig {
    GrantConfig::new(AUTH_URL, TOKEN_URL)
        .client("proxy", Some("proxy-secret"))
        .revoke_token_url(REVOKE_URL)
}

/// Routes used throughout: everything is protected except `/logout`.
pub fn routes() -> Vec<RouteDef> {
    vec![
        RouteDef::new("protected", PathPattern::AnyPath, BackendDef::Network("http://backend.test".into()))
            .filter("oauthGrant"),
        RouteDef::new("logout", PathPattern::literal_path("/logout"), BackendDef::Shunt).filter("grantLogout"),
    ]
}

/// Just enough proxy to drive requests through the grant filters.
pub struct Proxy {
    pub grant: OAuthGrant,
    pub auth: MockAuthServer,
    pub backend: RecordingBackend,
    pub table: RouteTable,
}

impl Proxy {
    pub async fn start(config: GrantConfig, auth: MockAuthServer, secrets: Arc<dyn SecretSource>) -> Self {
        let grant = OAuthGrant::with_secret_source(config, Arc::new(auth.clone()), secrets).await.unwrap();
        Self::with_grant(grant, auth)
    }

    pub fn with_grant(grant: OAuthGrant, auth: MockAuthServer) -> Self {
        let mut registry = FilterRegistry::new();
        grant.register(&mut registry);
        let preprocessors: Vec<Arc<dyn PreProcessor>> = vec![Arc::new(grant.preprocessor())];
        let table = RouteTable::build(routes(), &preprocessors, &registry).unwrap();
        Proxy { grant, auth, backend: RecordingBackend::default(), table }
    }

    pub async fn get(&self, path_and_query: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::get(path_and_query).header("host", PROXY_HOST);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        self.send(builder.body(Body::new()).unwrap()).await
    }

    /// Follow an absolute URL on the proxy's origin.
    pub async fn follow(&self, url: &str, cookie: Option<&str>) -> Response<Body> {
        let url = Url::parse(url).unwrap();
        assert_eq!(url.host_str(), Some(PROXY_HOST));
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        self.get(&path, cookie).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        let route = self.table.lookup(request.uri().path()).expect("route");
        let mut ctx = FilterContext::new(request);
        match &route.backend {
            BackendDef::Shunt => route.chain.run(&mut ctx, &Shunt).await,
            BackendDef::Network(_) => route.chain.run(&mut ctx, &self.backend).await,
        }
        ctx.into_response()
    }

    /// Full login, returning the `name=value` pair of the issued cookie.
    pub async fn login(&self) -> String {
        let redirect = self.get("/protected", None).await;
        let callback = self.auth.authorize(location(&redirect));
        let response = self.follow(&callback, None).await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        session_cookie(&response).expect("session cookie")
    }
}

pub fn location(response: &Response<Body>) -> &str {
    response.headers()[LOCATION].to_str().unwrap()
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// `name=value` of the session cookie set by `response`, if any.
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    set_cookies(response)
        .into_iter()
        .find(|c| c.starts_with("oauth-grant="))
        .and_then(|c| c.split(';').next().map(str::to_string))
}

/// The encrypted value alone.
pub fn cookie_value(pair: &str) -> &str {
    pair.split_once('=').map(|(_, v)| v).unwrap_or_default()
}
