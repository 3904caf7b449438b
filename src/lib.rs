pub mod grant_core;

pub use grant_core::oauth_grant::{InitError, OAuthGrant};
pub use grant_core::config::{ConfigError, CookieSettings, GrantConfig, SameSitePolicy};
pub use grant_core::filter::{Backend, Body, Filter, FilterChain, FilterContext, FilterRegistry};
pub use grant_core::grant::{GrantFilter, SessionState, OAUTH_GRANT_NAME};
pub use grant_core::callback::{CallbackFilter, GRANT_CALLBACK_NAME};
pub use grant_core::logout::{GrantLogoutFilter, GRANT_LOGOUT_NAME};
pub use grant_core::routing::{
    BackendDef, GrantPreprocessor, PathPattern, PreProcessor, Route, RouteDef, RouteError, RouteTable,
    GRANT_CALLBACK_ROUTE_ID,
};
pub use grant_core::codec::{CodecError, SessionCodec};
pub use grant_core::cookie::MAX_SESSION_COOKIE_BYTES;
pub use grant_core::state::{AuthState, StateCodec};
pub use grant_core::secrets::{FileSecretSource, KeyRing, SecretError, SecretSource, SecretStore, StaticSecretSource};
pub use grant_core::oauth_client::AuthServerClient;
pub use grant_core::tokeninfo::{LocalExpiry, TokenValidator, Tokeninfo};
pub use grant_core::http_client::{HttpClientError, HttpRequest, HttpResponse, InMemoryHttpClient, OAuthHttpClient};
#[cfg(feature = "reqwest-client")]
pub use grant_core::http_client::ReqwestHttpClient;
pub use grant_core::types::{GrantError, ProviderError, Session, TokenResponse};
