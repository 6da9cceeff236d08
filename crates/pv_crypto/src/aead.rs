//! Authenticated Encryption with Associated Data
//!
//! Uses XChaCha20-Poly1305 (192-bit nonce).
//! Key size: 32 bytes.  Nonce: 24 bytes (random).  Tag: 16 bytes.
//!
//! Nonces are ALWAYS drawn fresh from the OS CSPRNG — never derived
//! from a counter. A repeated nonce under the same key voids every
//! confidentiality and integrity guarantee of the cipher.
//!
//! Two forms:
//!   - detached: (nonce, ciphertext, tag) as separate values, used by
//!     the message envelope
//!   - combined: `nonce || ciphertext+tag` as one blob, used for
//!     at-rest storage and key wrapping

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::error::CryptoError;
use crate::SymmetricKey;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext`, returning nonce, ciphertext, and tag separately.
pub fn seal_detached(
    key: &SymmetricKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    // chacha20poly1305 appends the 16-byte tag; split it back off.
    let mut ct = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;
    let split = ct.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&ct[split..]);
    ct.truncate(split);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&nonce);
    Ok((nonce_bytes, ct, tag))
}

/// Decrypt a detached (nonce, ciphertext, tag) triple. Fails closed:
/// any tag mismatch, truncation, or AAD mismatch is `AeadDecrypt`.
pub fn open_detached(
    key: &SymmetricKey,
    aad: &[u8],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload { msg: &combined, aad },
        )
        .map_err(|_| CryptoError::AeadDecrypt)
}

/// Encrypt to the combined wire form: `nonce || ciphertext+tag`.
pub fn encrypt(key: &SymmetricKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt combined wire-form bytes (`nonce || ciphertext+tag`).
pub fn decrypt(key: &SymmetricKey, aad: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;

    cipher
        .decrypt(XNonce::from_slice(nonce_bytes), Payload { msg: ct, aad })
        .map_err(|_| CryptoError::AeadDecrypt)
}

const KEY_WRAP_AAD: &[u8] = b"palaver-key-wrap-v1";

/// Encrypt a 32-byte key under another 32-byte wrapping key (key transport).
pub fn wrap_key(wrapping_key: &SymmetricKey, key_to_wrap: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    encrypt(wrapping_key, KEY_WRAP_AAD, key_to_wrap)
}

/// Decrypt a wrapped key. Authentication failure means the blob is
/// corrupt or was wrapped under a different key.
pub fn unwrap_key(wrapping_key: &SymmetricKey, wrapped: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let plaintext =
        decrypt(wrapping_key, KEY_WRAP_AAD, wrapped).map_err(|_| CryptoError::CorruptKeyData)?;
    if plaintext.len() != 32 {
        return Err(CryptoError::CorruptKeyData);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_symmetric_key;

    #[test]
    fn detached_roundtrip() {
        let key = generate_symmetric_key();
        let aad = b"channel-context";
        let (nonce, ct, tag) = seal_detached(&key, aad, b"bonjour").unwrap();
        let plain = open_detached(&key, aad, &nonce, &ct, &tag).unwrap();
        assert_eq!(plain, b"bonjour");
    }

    #[test]
    fn detached_wrong_aad_fails() {
        let key = generate_symmetric_key();
        let (nonce, ct, tag) = seal_detached(&key, b"aad-one", b"secret").unwrap();
        assert!(open_detached(&key, b"aad-two", &nonce, &ct, &tag).is_err());
    }

    #[test]
    fn detached_flipped_tag_fails() {
        let key = generate_symmetric_key();
        let (nonce, ct, mut tag) = seal_detached(&key, b"", b"secret").unwrap();
        tag[0] ^= 0x01;
        assert!(open_detached(&key, b"", &nonce, &ct, &tag).is_err());
    }

    #[test]
    fn combined_roundtrip() {
        let key = generate_symmetric_key();
        let blob = encrypt(&key, b"", b"at rest").unwrap();
        assert_eq!(decrypt(&key, b"", &blob).unwrap(), b"at rest");
    }

    #[test]
    fn combined_wrong_key_fails() {
        let k1 = generate_symmetric_key();
        let k2 = generate_symmetric_key();
        let blob = encrypt(&k1, b"", b"secret").unwrap();
        assert!(decrypt(&k2, b"", &blob).is_err());
    }

    #[test]
    fn combined_truncated_fails() {
        let key = generate_symmetric_key();
        assert!(decrypt(&key, b"", &[0u8; 10]).is_err());
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let wrapping = generate_symmetric_key();
        let inner = generate_symmetric_key();
        let wrapped = wrap_key(&wrapping, &inner).unwrap();
        assert_eq!(unwrap_key(&wrapping, &wrapped).unwrap(), inner);
    }

    #[test]
    fn unwrap_under_wrong_key_is_corrupt() {
        let inner = generate_symmetric_key();
        let wrapped = wrap_key(&generate_symmetric_key(), &inner).unwrap();
        match unwrap_key(&generate_symmetric_key(), &wrapped) {
            Err(CryptoError::CorruptKeyData) => {}
            other => panic!("expected CorruptKeyData, got {other:?}"),
        }
    }

    #[test]
    fn nonce_uniqueness_sampling() {
        // Birthday-bound sanity check: random 192-bit nonces must not
        // collide across a large number of seals under one key.
        let key = generate_symmetric_key();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100_000 {
            let (nonce, _, _) = seal_detached(&key, b"", b"x").unwrap();
            assert!(seen.insert(nonce), "nonce repeated");
        }
    }
}
