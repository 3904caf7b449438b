pub mod callback;
pub mod codec;
pub mod config;
pub mod cookie;
pub mod crypto;
pub mod filter;
pub mod grant;
pub mod http_client;
pub mod logout;
pub mod oauth_client;
pub mod oauth_grant;
pub mod routing;
pub mod secrets;
pub mod state;
pub mod tokeninfo;
pub mod types;
