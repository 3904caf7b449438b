//! Login state round-tripped through the authorization server.
//!
//! The state parameter is itself an encrypted envelope, so the proxy keeps
//! nothing between the redirect out and the callback in. Any instance
//! holding the same secrets can validate it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::codec::{CodecError, Purpose, SessionCodec};
use super::types::GrantError;

/// Tolerated clock skew between proxy instances issuing and validating state.
const MAX_CLOCK_SKEW_SECS: i64 = 30;

/// Decrypted content of the `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Random value making every state unique.
    pub nonce: String,
    /// Absolute URL the user asked for before login.
    pub original_url: String,
    pub issued_at: DateTime<Utc>,
}

/// Issues and validates login state.
#[derive(Clone)]
pub struct StateCodec {
    codec: SessionCodec,
    ttl: Duration,
}

impl StateCodec {
    pub fn new(codec: SessionCodec, ttl: Duration) -> Self {
        StateCodec { codec, ttl }
    }

    pub fn issue(&self, original_url: &str, now: DateTime<Utc>) -> Result<String, CodecError> {
        let state = AuthState {
            nonce: Uuid::new_v4().to_string(),
            original_url: original_url.to_string(),
            issued_at: now,
        };
        self.codec.seal(Purpose::State, &state)
    }

    /// Accept only state this proxy sealed within the validity window.
    pub fn validate(&self, encoded: &str, now: DateTime<Utc>) -> Result<AuthState, GrantError> {
        let Some(state) = self.codec.open::<AuthState>(Purpose::State, encoded) else {
            debug!("state failed to decrypt");
            return Err(GrantError::InvalidState);
        };
        if state.issued_at > now + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            debug!(issued_at = %state.issued_at, "state issued in the future");
            return Err(GrantError::InvalidState);
        }
        if now - state.issued_at > self.ttl {
            debug!(issued_at = %state.issued_at, "state expired");
            return Err(GrantError::InvalidState);
        }
        Ok(state)
    }
}
