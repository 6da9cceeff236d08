//! Key derivation
//!
//! BLAKE3 `derive_key` with explicit context strings carries all local
//! derivations (at-rest keys, wrapping keys); the context string gives
//! domain separation between them. HKDF-SHA256 expands the Noise
//! handshake hash into the transport session key.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::SymmetricKey;

/// Context strings for BLAKE3 derivations. One per domain; never reuse.
pub const CONTEXT_IDENTITY_AT_REST: &str = "palaver-identity-at-rest-v1";
pub const CONTEXT_CHANNEL_KEY_WRAP: &str = "palaver-channel-key-wrap-v1";
pub const CONTEXT_INVITE_WRAP: &str = "palaver-invite-wrap-v1";

/// Derive a 32-byte key from input material under a fixed context.
pub fn derive_key(context: &str, material: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(material);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Derive a 32-byte key from two concatenated inputs (e.g. key + salt).
pub fn derive_key_salted(context: &str, material: &[u8], salt: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(material);
    hasher.update(salt);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the 32-byte transport session key from a Noise handshake hash.
/// Both parties hold the same hash after a completed handshake, so both
/// derive the same key.
pub fn derive_transport_key(handshake_hash: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let mut key = [0u8; 32];
    hkdf_expand(
        handshake_hash,
        Some(b"palaver-transport-v1"),
        b"transport-key",
        &mut key,
    )?;
    Ok(key)
}

/// Generate a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; 16] {
    use rand::RngCore;
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let k1 = derive_key(CONTEXT_IDENTITY_AT_REST, b"material");
        let k2 = derive_key(CONTEXT_IDENTITY_AT_REST, b"material");
        assert_eq!(k1, k2);
    }

    #[test]
    fn contexts_separate_domains() {
        let k1 = derive_key(CONTEXT_IDENTITY_AT_REST, b"material");
        let k2 = derive_key(CONTEXT_CHANNEL_KEY_WRAP, b"material");
        assert_ne!(k1, k2);
    }

    #[test]
    fn salt_changes_output() {
        let k1 = derive_key_salted(CONTEXT_INVITE_WRAP, b"pub", b"salt-a");
        let k2 = derive_key_salted(CONTEXT_INVITE_WRAP, b"pub", b"salt-b");
        assert_ne!(k1, k2);
    }

    #[test]
    fn transport_key_matches_for_equal_hashes() {
        let hash = [7u8; 32];
        let a = derive_transport_key(&hash).unwrap();
        let b = derive_transport_key(&hash).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, derive_transport_key(&[8u8; 32]).unwrap());
    }
}
