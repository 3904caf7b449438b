//! Cryptographic utilities for session cookies and login state using `ring`.

use ring::aead::{self, AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::digest;
use ring::error::Unspecified;
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};

/// Length of the key identifier embedded in every envelope.
pub const KEY_ID_LEN: usize = 8;

/// Length of the AES-GCM nonce.
pub const NONCE_LEN: usize = 12;

/// Length of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

const KDF_SALT: &[u8] = b"starberry-grant/v1";
const KDF_INFO: &[&[u8]] = &[b"session-encryption"];

/// Identifies the secret a payload was encrypted with.
pub type KeyId = [u8; KEY_ID_LEN];

/// Derive the identifier of a secret: the first bytes of its SHA-256 digest.
///
/// Proxies reading the same secret agree on the id without coordination.
pub fn key_id(secret: &[u8]) -> KeyId {
    let hash = digest::digest(&digest::SHA256, secret);
    let mut id = [0u8; KEY_ID_LEN];
    id.copy_from_slice(&hash.as_ref()[..KEY_ID_LEN]);
    id
}

/// Stretch an arbitrary-length secret into an AES-256-GCM key with HKDF-SHA256.
pub fn derive_key(secret: &[u8]) -> Result<LessSafeKey, Unspecified> {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, KDF_SALT);
    let prk = salt.extract(secret);
    let okm = prk.expand(KDF_INFO, &AES_256_GCM)?;
    Ok(LessSafeKey::new(UnboundKey::from(okm)))
}

/// Fill a fixed-size buffer from the system CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], Unspecified> {
    let mut buf = [0u8; N];
    SystemRandom::new().fill(&mut buf)?;
    Ok(buf)
}

/// Encrypt plaintext with AES-256-GCM. Returns ciphertext with the tag appended.
pub fn seal(key: &LessSafeKey, nonce: [u8; NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Unspecified> {
    let mut in_out = Vec::with_capacity(plaintext.len() + TAG_LEN);
    in_out.extend_from_slice(plaintext);
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::from(aad), &mut in_out)?;
    Ok(in_out)
}

/// Decrypt and verify output of [`seal`].
pub fn open(key: &LessSafeKey, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Unspecified> {
    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(Unspecified);
    }
    let mut in_out = ciphertext.to_vec();
    let plaintext = key.open_in_place(Nonce::try_assume_unique_for_key(nonce)?, Aad::from(aad), &mut in_out)?;
    Ok(plaintext.to_vec())
}
