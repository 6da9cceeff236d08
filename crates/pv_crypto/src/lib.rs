//! pv_crypto — Palaver cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Every fallible operation returns a typed error; nothing panics.
//!
//! # Module layout
//! - `identity` — long-term Ed25519 identity keypair + X25519 bridging
//! - `aead`     — XChaCha20-Poly1305 encrypt/decrypt helpers
//! - `kdf`      — BLAKE3 derive-key contexts + HKDF-SHA256 expansion
//! - `error`    — unified error type

pub mod aead;
pub mod error;
pub mod identity;
pub mod kdf;

pub use error::CryptoError;
pub use identity::{Identity, PublicKey};

/// 32-byte symmetric key used for channel and transport encryption.
pub type SymmetricKey = [u8; 32];

/// Draw a fresh 32-byte symmetric key from the OS CSPRNG.
pub fn generate_symmetric_key() -> SymmetricKey {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}
