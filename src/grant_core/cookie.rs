//! Session cookie rendering and request cookie handling.

use cookie::Cookie;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use tracing::debug;

use super::config::CookieSettings;
use super::types::GrantError;

/// Largest `Set-Cookie` a browser is guaranteed to keep, name, value and
/// attributes included.
pub const MAX_SESSION_COOKIE_BYTES: usize = 4096;

/// `Set-Cookie` carrying a session for `max_age`.
pub fn session_cookie(settings: &CookieSettings, value: String, max_age: chrono::Duration) -> Cookie<'static> {
    build(settings, value, cookie::time::Duration::seconds(max_age.num_seconds()))
}

/// `Set-Cookie` that makes the browser drop the session.
pub fn removal_cookie(settings: &CookieSettings) -> Cookie<'static> {
    build(settings, String::new(), cookie::time::Duration::ZERO)
}

fn build(settings: &CookieSettings, value: String, max_age: cookie::time::Duration) -> Cookie<'static> {
    let mut builder = Cookie::build((settings.name.clone(), value))
        .path(settings.path.clone())
        .secure(settings.secure)
        .http_only(settings.http_only)
        .same_site(settings.same_site.into())
        .max_age(max_age);
    if let Some(domain) = &settings.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// Append a rendered cookie as a `Set-Cookie` header.
pub fn append_set_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) -> Result<(), GrantError> {
    let value = HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| GrantError::Internal(format!("invalid set-cookie header: {e}")))?;
    headers.append(SET_COOKIE, value);
    Ok(())
}

/// Value of the first request cookie called `name`, across all `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for cookie in Cookie::split_parse(header) {
            match cookie {
                Ok(c) if c.name() == name => return Some(c.value().to_string()),
                Ok(_) => {}
                Err(e) => debug!("ignoring malformed cookie: {e}"),
            }
        }
    }
    None
}

/// Remove cookie `name` from the request so it is not forwarded upstream.
pub fn strip_cookie(headers: &mut HeaderMap, name: &str) {
    if !headers.contains_key(COOKIE) {
        return;
    }
    let mut kept = Vec::new();
    for header in headers.get_all(COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for pair in header.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let pair_name = pair.split_once('=').map_or(pair, |(n, _)| n).trim();
            if pair_name != name {
                kept.push(pair.to_string());
            }
        }
    }
    headers.remove(COOKIE);
    if kept.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&kept.join("; ")) {
        headers.insert(COOKIE, value);
    }
}
