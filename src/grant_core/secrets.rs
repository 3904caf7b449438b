//! Encryption key material with rotation and periodic reload.
//!
//! The visible key set is an immutable [`KeyRing`] behind an `Arc`. Readers
//! clone the `Arc` under a short read lock; a reload builds a new ring and
//! swaps the pointer, so a decode never sees a half-updated set.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use ring::aead::LessSafeKey;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::crypto::{self, KeyId};

/// Failure loading key material.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret source {source_name} unreadable: {reason}")]
    Unreadable { source_name: String, reason: String },
    #[error("secret source {0} contains no secrets")]
    Empty(String),
    #[error("failed to derive an encryption key")]
    Derivation,
}

/// Where secrets come from. Secrets are returned oldest first; the last one
/// becomes the current encryption key.
#[async_trait]
pub trait SecretSource: Send + Sync + 'static {
    /// Human readable name used in logs.
    fn name(&self) -> String;

    async fn load(&self) -> Result<Vec<Vec<u8>>, SecretError>;
}

/// Reads secrets from a file, one per non-empty line.
#[derive(Debug, Clone)]
pub struct FileSecretSource {
    path: PathBuf,
}

impl FileSecretSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSecretSource { path: path.into() }
    }
}

#[async_trait]
impl SecretSource for FileSecretSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<Vec<Vec<u8>>, SecretError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SecretError::Unreadable { source_name: self.name(), reason: e.to_string() })?;
        let secrets: Vec<Vec<u8>> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.as_bytes().to_vec())
            .collect();
        if secrets.is_empty() {
            return Err(SecretError::Empty(self.name()));
        }
        Ok(secrets)
    }
}

/// Fixed in-memory secrets, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticSecretSource {
    secrets: RwLock<Vec<Vec<u8>>>,
}

impl StaticSecretSource {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let source = StaticSecretSource::default();
        source.set(secrets);
        source
    }

    /// Replace the secrets returned by the next load.
    pub fn set<I, S>(&self, secrets: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let secrets = secrets.into_iter().map(|s| s.as_ref().to_vec()).collect();
        *self.secrets.write().unwrap_or_else(PoisonError::into_inner) = secrets;
    }
}

#[async_trait]
impl SecretSource for StaticSecretSource {
    fn name(&self) -> String {
        "static".to_string()
    }

    async fn load(&self) -> Result<Vec<Vec<u8>>, SecretError> {
        let secrets = self.secrets.read().unwrap_or_else(PoisonError::into_inner).clone();
        if secrets.is_empty() {
            return Err(SecretError::Empty(self.name()));
        }
        Ok(secrets)
    }
}

/// A derived encryption key and its identifier.
#[derive(Debug)]
pub struct SecretKey {
    id: KeyId,
    key: LessSafeKey,
}

impl SecretKey {
    fn derive(secret: &[u8]) -> Result<Self, SecretError> {
        let key = crypto::derive_key(secret).map_err(|_| SecretError::Derivation)?;
        Ok(SecretKey { id: crypto::key_id(secret), key })
    }

    pub fn id(&self) -> KeyId {
        self.id
    }

    pub fn key(&self) -> &LessSafeKey {
        &self.key
    }
}

/// Ordered key set, oldest first. The last key is current; the rest are
/// retained for decryption only. Never empty.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<Arc<SecretKey>>,
}

impl KeyRing {
    fn from_secrets(secrets: &[Vec<u8>], retention: usize) -> Result<Self, SecretError> {
        let empty = KeyRing { keys: Vec::new() };
        empty.rotated(secrets, retention)
    }

    /// Build the ring that results from loading `secrets` on top of this one.
    ///
    /// Keys already known keep their derived material. Keys that vanished
    /// from the source stay decrypt-only until the retention bound pushes
    /// them out, oldest first.
    fn rotated(&self, secrets: &[Vec<u8>], retention: usize) -> Result<Self, SecretError> {
        if secrets.is_empty() {
            return Err(SecretError::Empty("key ring".to_string()));
        }
        let mut keys = self.keys.clone();
        for secret in secrets {
            let id = crypto::key_id(secret);
            let key = match keys.iter().position(|k| k.id == id) {
                Some(idx) => keys.remove(idx),
                None => Arc::new(SecretKey::derive(secret)?),
            };
            keys.push(key);
        }
        let retention = retention.max(1);
        if keys.len() > retention {
            keys.drain(..keys.len() - retention);
        }
        Ok(KeyRing { keys })
    }

    /// Key used for new encryptions.
    pub fn current(&self) -> &Arc<SecretKey> {
        // Non-empty by construction.
        &self.keys[self.keys.len() - 1]
    }

    pub fn by_id(&self, id: &KeyId) -> Option<&Arc<SecretKey>> {
        self.keys.iter().find(|k| &k.id == id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keep only keys derived from `secrets`. The current key always is.
    fn retain_listed(&mut self, secrets: &[Vec<u8>]) {
        let listed: Vec<KeyId> = secrets.iter().map(|s| crypto::key_id(s)).collect();
        self.keys.retain(|k| listed.contains(&k.id));
    }

    fn ids(&self) -> Vec<KeyId> {
        self.keys.iter().map(|k| k.id).collect()
    }
}

/// Shared, reloadable key store used by the session codec.
///
/// A plain [`refresh`](SecretStore::refresh) never revokes: a secret deleted
/// from the source keeps decrypting until `retention` newer keys displace it.
/// Revoking a compromised secret takes [`purge_removed`](SecretStore::purge_removed).
pub struct SecretStore {
    source: Arc<dyn SecretSource>,
    ring: RwLock<Arc<KeyRing>>,
    retention: usize,
}

impl SecretStore {
    /// Load key material for the first time. Failure here is fatal to the
    /// component: without a current key no cookie can be issued.
    pub async fn load(source: Arc<dyn SecretSource>, retention: usize) -> Result<Self, SecretError> {
        let secrets = source.load().await?;
        let ring = KeyRing::from_secrets(&secrets, retention)?;
        info!(source = %source.name(), keys = ring.len(), "loaded grant secrets");
        Ok(SecretStore {
            source,
            ring: RwLock::new(Arc::new(ring)),
            retention,
        })
    }

    /// Consistent view of the key set.
    pub fn snapshot(&self) -> Arc<KeyRing> {
        self.ring.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn current_key(&self) -> (KeyId, Arc<SecretKey>) {
        let ring = self.snapshot();
        let key = ring.current().clone();
        (key.id, key)
    }

    pub fn key_by_id(&self, id: &KeyId) -> Option<Arc<SecretKey>> {
        self.snapshot().by_id(id).cloned()
    }

    /// Reload the source and swap in the resulting ring.
    ///
    /// On failure the last known good ring keeps serving. Returns whether
    /// the visible key set changed. Keys removed from the source remain
    /// usable for decryption until the retention bound pushes them out; use
    /// [`SecretStore::purge_removed`] to revoke them at once.
    pub async fn refresh(&self) -> Result<bool, SecretError> {
        self.reload(true).await
    }

    /// Reload the source and drop every key it no longer lists, even within
    /// the retention bound. Cookies and states sealed with a dropped key stop
    /// decoding immediately.
    pub async fn purge_removed(&self) -> Result<bool, SecretError> {
        self.reload(false).await
    }

    async fn reload(&self, keep_removed: bool) -> Result<bool, SecretError> {
        let result = self.try_reload(keep_removed).await;
        if let Err(err) = &result {
            warn!(source = %self.source.name(), error = %err, "secret refresh failed, keeping previous keys");
        }
        result
    }

    async fn try_reload(&self, keep_removed: bool) -> Result<bool, SecretError> {
        let secrets = self.source.load().await?;
        let current = self.snapshot();
        let mut next = current.rotated(&secrets, self.retention)?;
        if !keep_removed {
            next.retain_listed(&secrets);
        }
        if next.ids() == current.ids() {
            debug!(source = %self.source.name(), "grant secrets unchanged");
            return Ok(false);
        }
        info!(source = %self.source.name(), keys = next.len(), "rotated grant secrets");
        *self.ring.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(true)
    }

    /// Reload on a timer until the store is dropped.
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<SecretStore> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; the store was just loaded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                // Failures are logged by `reload`; the old ring keeps serving.
                let _ = store.refresh().await;
            }
        })
    }
}
