//! Identity key management
//!
//! Each installation has exactly one long-term `Identity` (Ed25519).
//! The public key IS the user id — no account, no email, no phone.
//!
//! The same keypair drives two operations:
//!   - Ed25519 signatures (invite tokens, handshake identity proofs)
//!   - X25519 Diffie-Hellman for the Noise session handshake, via the
//!     standard Edwards→Montgomery bridging (clamped SHA-512 expansion
//!     of the seed on the secret side, birational map on the public
//!     side). Both sides of the bridge agree: the X25519 public derived
//!     from the converted secret equals the converted Ed25519 public.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// 32-byte Ed25519 public key, base64url-encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("public key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// First 8 hex chars — for logs and display lists.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes, hex-encoded in groups of 4 for manual comparison.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Convert to the corresponding X25519 public key (birational map
    /// from the Ed25519 curve to Curve25519).
    pub fn to_x25519(&self) -> Result<[u8; 32], CryptoError> {
        use curve25519_dalek::edwards::CompressedEdwardsY;
        let compressed = CompressedEdwardsY::from_slice(&self.0)
            .map_err(|_| CryptoError::InvalidKey("invalid Ed25519 public key".into()))?;
        let point = compressed
            .decompress()
            .ok_or_else(|| CryptoError::InvalidKey("Ed25519 public key decompression failed".into()))?;
        Ok(point.to_montgomery().to_bytes())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Long-term identity signing key. Drop clears the secret via ZeroizeOnDrop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    public: PublicKey,
    secret_bytes: [u8; 32],
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
}

impl Identity {
    /// Generate a new identity from the OS CSPRNG.
    ///
    /// Fails only if the entropy source is unavailable; that failure is
    /// fatal and must not be retried automatically.
    pub fn generate() -> Result<Self, CryptoError> {
        use rand_core::RngCore;
        let mut seed = [0u8; 32];
        rand::rngs::OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let identity = Self::from_parts(&seed, Utc::now());
        seed.zeroize();
        Ok(identity)
    }

    /// Rebuild an identity from its 32-byte Ed25519 seed.
    pub fn from_parts(secret: &[u8; 32], created_at: DateTime<Utc>) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let public = PublicKey(signing_key.verifying_key().to_bytes());
        Self {
            public,
            secret_bytes: *secret,
            created_at,
        }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    /// Sign arbitrary bytes; returns the raw 64-byte Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key().sign(msg).to_bytes()
    }

    /// X25519 static secret for Noise DH, from the clamped SHA-512
    /// expansion of the Ed25519 seed (the expansion ed25519-dalek uses
    /// internally, mirroring libsignal's IK conversion).
    pub fn x25519_secret(&self) -> StaticSecret {
        use sha2::{Digest, Sha512};
        let mut h = Sha512::digest(self.secret_bytes);
        h[0] &= 248;
        h[31] &= 127;
        h[31] |= 64;
        let mut key = [0u8; 32];
        key.copy_from_slice(&h[..32]);
        h.as_mut_slice().zeroize();
        let secret = StaticSecret::from(key);
        key.zeroize();
        secret
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public", &self.public.short())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Verify a 64-byte Ed25519 signature made by `public` over `msg`.
pub fn verify(public: &PublicKey, msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(public.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sig_arr: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("signature must be 64 bytes".into()))?;
    let sig = Signature::from_bytes(&sig_arr);
    vk.verify(msg, &sig)
        .map_err(|_| CryptoError::SignatureVerification)
}
