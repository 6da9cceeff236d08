//! Encrypted-at-rest identity persistence.
//!
//! One identity per installation, loaded once at startup and held for
//! the process's life. The secret key never touches durable storage in
//! plaintext: the file carries the public key and a random salt in the
//! clear, and the secret (plus creation timestamp) AEAD-encrypted under
//! a BLAKE3 key derived from those two values. Tampering with any part
//! of the file fails authentication on load.
//!
//! Persistence is atomic replace-or-fail: the new file is written to a
//! temp path in the same directory and renamed over the old one, so a
//! crash mid-write never leaves a partial identity observable.
//!
//! File layout: `version (1) | public key (32) | salt (16) | sealed blob`
//! where the sealed blob decrypts to `secret (32) | created_at (i64 LE)`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;
use zeroize::Zeroize;

use pv_crypto::{aead, kdf, CryptoError, Identity};

use crate::error::ChannelError;

const FILE_VERSION: u8 = 1;
const IDENTITY_FILE: &str = "identity.key";

pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Store rooted at `dir`; the identity lives in `dir/identity.key`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(IDENTITY_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generate a fresh identity and persist it. Fails if one already
    /// exists — reset first, explicitly.
    pub fn create(&self) -> Result<Identity, ChannelError> {
        if self.path.exists() {
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "identity already exists; reset() it first",
            )));
        }
        let identity = Identity::generate()?;
        self.persist(&identity)?;
        info!(public = %identity.public().short(), "created new identity");
        Ok(identity)
    }

    /// Load the persisted identity, or `None` if none exists yet.
    /// A present-but-undecryptable file is an error, not `None`.
    pub fn load(&self) -> Result<Option<Identity>, ChannelError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let identity = decode(&data)?;
        info!(public = %identity.public().short(), "loaded identity");
        Ok(Some(identity))
    }

    /// Write the identity to disk, atomically replacing any previous file.
    pub fn persist(&self, identity: &Identity) -> Result<(), ChannelError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let data = encode(identity)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Destroy the persisted identity. The only way it dies; without an
    /// exported copy the keypair is unrecoverable afterwards.
    pub fn reset(&self) -> Result<(), ChannelError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("identity reset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn at_rest_key(public: &[u8; 32], salt: &[u8]) -> [u8; 32] {
    kdf::derive_key_salted(kdf::CONTEXT_IDENTITY_AT_REST, public, salt)
}

fn encode(identity: &Identity) -> Result<Vec<u8>, CryptoError> {
    let salt = kdf::generate_salt();
    let key = at_rest_key(identity.public().as_bytes(), &salt);

    let mut plaintext = Vec::with_capacity(32 + 8);
    plaintext.extend_from_slice(identity.secret_bytes());
    plaintext.extend_from_slice(&identity.created_at().timestamp().to_le_bytes());

    let sealed = aead::encrypt(&key, identity.public().as_bytes(), &plaintext);
    plaintext.zeroize();
    let sealed = sealed?;

    let mut out = Vec::with_capacity(1 + 32 + 16 + sealed.len());
    out.push(FILE_VERSION);
    out.extend_from_slice(identity.public().as_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn decode(data: &[u8]) -> Result<Identity, CryptoError> {
    if data.len() < 1 + 32 + 16 || data[0] != FILE_VERSION {
        return Err(CryptoError::CorruptKeyData);
    }
    let public: [u8; 32] = data[1..33].try_into().expect("32-byte slice");
    let salt = &data[33..49];
    let sealed = &data[49..];

    let key = at_rest_key(&public, salt);
    let mut plaintext =
        aead::decrypt(&key, &public, sealed).map_err(|_| CryptoError::CorruptKeyData)?;
    if plaintext.len() != 32 + 8 {
        plaintext.zeroize();
        return Err(CryptoError::CorruptKeyData);
    }

    let mut secret = [0u8; 32];
    secret.copy_from_slice(&plaintext[..32]);
    let secs = i64::from_le_bytes(plaintext[32..40].try_into().expect("8-byte slice"));
    plaintext.zeroize();

    let created_at: DateTime<Utc> =
        DateTime::from_timestamp(secs, 0).ok_or(CryptoError::CorruptKeyData)?;

    let identity = Identity::from_parts(&secret, created_at);
    secret.zeroize();

    // The stored public key must match the secret it came with.
    if identity.public().as_bytes() != &public {
        return Err(CryptoError::CorruptKeyData);
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        let created = store.create().unwrap();
        let loaded = store.load().unwrap().expect("identity should exist");

        assert_eq!(created.public(), loaded.public());
        assert_eq!(created.secret_bytes(), loaded.secret_bytes());
        assert_eq!(
            created.created_at().timestamp(),
            loaded.created_at().timestamp()
        );
    }

    #[test]
    fn load_absent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn create_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.create().unwrap();
        assert!(store.create().is_err());
    }

    #[test]
    fn reset_then_create_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let first = store.create().unwrap();
        store.reset().unwrap();
        let second = store.create().unwrap();
        assert_ne!(first.public(), second.public());
    }

    #[test]
    fn secret_is_not_stored_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let identity = store.create().unwrap();

        let raw = fs::read(store.path()).unwrap();
        let secret = identity.secret_bytes();
        assert!(!raw
            .windows(secret.len())
            .any(|window| window == secret.as_slice()));
    }

    #[test]
    fn tampered_file_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.create().unwrap();

        let mut raw = fs::read(store.path()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(store.path(), &raw).unwrap();

        assert!(store.load().is_err());
    }

    #[test]
    fn persist_replaces_existing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.create().unwrap();

        let replacement = Identity::generate().unwrap();
        store.persist(&replacement).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.public(), replacement.public());
    }
}
