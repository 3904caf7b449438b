mod common;

use std::io::Write;
use std::sync::Arc;

use common::*;
use http::StatusCode;
use starberry_grant::OAuthGrant;
use tempfile::NamedTempFile;

fn write_secrets(file: &NamedTempFile, secrets: &[&str]) {
    let mut handle = file.reopen().unwrap();
    handle.set_len(0).unwrap();
    handle.write_all(secrets.join("\n").as_bytes()).unwrap();
}

async fn proxy(file: &NamedTempFile, retention: usize) -> Proxy {
    let auth = MockAuthServer::new();
    let config = config().secret_file(file.path()).key_retention(retention);
    let grant = OAuthGrant::new(config, Arc::new(auth.clone())).await.unwrap();
    Proxy::with_grant(grant, auth)
}

#[tokio::test]
async fn test_cookie_survives_rotation_while_retained() {
    let file = NamedTempFile::new().unwrap();
    write_secrets(&file, &["v1"]);
    let proxy = proxy(&file, 2).await;
    let old = proxy.login().await;

    write_secrets(&file, &["v1", "v2"]);
    assert!(proxy.grant.secrets().refresh().await.unwrap());
    assert_eq!(proxy.get("/protected", Some(&old)).await.status(), StatusCode::NO_CONTENT);

    // New logins are sealed with v2 and differ in key id from the old cookie.
    let new = proxy.login().await;
    assert_eq!(proxy.get("/protected", Some(&new)).await.status(), StatusCode::NO_CONTENT);

    // v1 leaves the source but is still retained for decryption.
    write_secrets(&file, &["v2"]);
    proxy.grant.secrets().refresh().await.unwrap();
    assert_eq!(proxy.get("/protected", Some(&old)).await.status(), StatusCode::NO_CONTENT);

    // A third key pushes v1 out of the retention window.
    write_secrets(&file, &["v3"]);
    assert!(proxy.grant.secrets().refresh().await.unwrap());
    assert_eq!(proxy.get("/protected", Some(&old)).await.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(proxy.get("/protected", Some(&new)).await.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_unreadable_secret_file_keeps_serving() {
    let file = NamedTempFile::new().unwrap();
    write_secrets(&file, &["v1"]);
    let proxy = proxy(&file, 3).await;
    let cookie = proxy.login().await;

    write_secrets(&file, &[]);
    assert!(proxy.grant.secrets().refresh().await.is_err());
    assert_eq!(proxy.get("/protected", Some(&cookie)).await.status(), StatusCode::NO_CONTENT);
    let fresh = proxy.login().await;
    assert_eq!(proxy.get("/protected", Some(&fresh)).await.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_missing_secret_file_is_fatal_at_startup() {
    let config = config().secret_file("/nonexistent/grant/secrets");
    assert!(OAuthGrant::new(config, Arc::new(MockAuthServer::new())).await.is_err());
}

#[tokio::test]
async fn test_purged_secret_stops_decrypting_immediately() {
    let file = NamedTempFile::new().unwrap();
    write_secrets(&file, &["v1"]);
    let proxy = proxy(&file, 5).await;
    let old = proxy.login().await;

    write_secrets(&file, &["v2"]);
    proxy.grant.secrets().refresh().await.unwrap();
    assert_eq!(proxy.get("/protected", Some(&old)).await.status(), StatusCode::NO_CONTENT);

    assert!(proxy.grant.secrets().purge_removed().await.unwrap());
    assert_eq!(proxy.get("/protected", Some(&old)).await.status(), StatusCode::TEMPORARY_REDIRECT);
    let fresh = proxy.login().await;
    assert_eq!(proxy.get("/protected", Some(&fresh)).await.status(), StatusCode::NO_CONTENT);
}
