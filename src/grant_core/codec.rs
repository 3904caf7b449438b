//! Encrypted envelopes for session cookies and login state.
//!
//! Wire format, base64url without padding:
//!
//! ```text
//! version (1) | key id (8) | nonce (12) | AES-256-GCM ciphertext + tag
//! ```
//!
//! The version, key id and payload purpose are bound as associated data, so
//! a state token never opens as a session and a relabelled key id fails
//! verification.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::trace;

use super::crypto::{self, KEY_ID_LEN, KeyId, NONCE_LEN, TAG_LEN};
use super::secrets::SecretStore;
use super::types::{GrantError, Session};

const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + KEY_ID_LEN + NONCE_LEN;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("refusing to persist a session without an access token")]
    EmptySession,
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("encryption failed")]
    Crypto,
}

impl From<CodecError> for GrantError {
    fn from(err: CodecError) -> Self {
        GrantError::Internal(err.to_string())
    }
}

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Purpose {
    Session,
    State,
}

impl Purpose {
    fn label(self) -> &'static [u8] {
        match self {
            Purpose::Session => b"session",
            Purpose::State => b"state",
        }
    }
}

fn associated_data(key_id: &KeyId, purpose: Purpose) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + KEY_ID_LEN + 8);
    aad.push(FORMAT_VERSION);
    aad.extend_from_slice(key_id);
    aad.extend_from_slice(purpose.label());
    aad
}

/// Turns sessions into cookie values and back, using the shared key store.
#[derive(Clone)]
pub struct SessionCodec {
    secrets: Arc<SecretStore>,
}

impl SessionCodec {
    pub fn new(secrets: Arc<SecretStore>) -> Self {
        SessionCodec { secrets }
    }

    pub fn secrets(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    /// Encrypt a session with the current key. Every call uses a fresh
    /// nonce, so equal sessions produce unrelated cookie values.
    pub fn encode(&self, session: &Session) -> Result<String, CodecError> {
        if session.access_token.is_empty() {
            return Err(CodecError::EmptySession);
        }
        self.seal(Purpose::Session, session)
    }

    /// Decrypt a cookie value. Unknown key, failed verification and
    /// malformed input all come back as `None`, the same as no cookie.
    pub fn decode(&self, cookie: &str) -> Option<Session> {
        let session: Session = self.open(Purpose::Session, cookie)?;
        if session.access_token.is_empty() {
            return None;
        }
        Some(session)
    }

    pub(crate) fn seal<T: Serialize>(&self, purpose: Purpose, value: &T) -> Result<String, CodecError> {
        let plaintext = serde_json::to_vec(value)?;
        let (key_id, key) = self.secrets.current_key();
        let nonce = crypto::random_bytes::<NONCE_LEN>().map_err(|_| CodecError::Crypto)?;
        let ciphertext = crypto::seal(key.key(), nonce, &associated_data(&key_id, purpose), &plaintext)
            .map_err(|_| CodecError::Crypto)?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&key_id);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    pub(crate) fn open<T: DeserializeOwned>(&self, purpose: Purpose, encoded: &str) -> Option<T> {
        let data = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if data.len() < HEADER_LEN + TAG_LEN || data[0] != FORMAT_VERSION {
            trace!("envelope malformed");
            return None;
        }
        let mut key_id: KeyId = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&data[1..1 + KEY_ID_LEN]);
        let Some(key) = self.secrets.key_by_id(&key_id) else {
            trace!("envelope sealed with an unknown key");
            return None;
        };
        let nonce = &data[1 + KEY_ID_LEN..HEADER_LEN];
        let plaintext = crypto::open(key.key(), nonce, &associated_data(&key_id, purpose), &data[HEADER_LEN..]).ok()?;
        serde_json::from_slice(&plaintext).ok()
    }
}
