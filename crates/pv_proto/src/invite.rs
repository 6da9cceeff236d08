//! Portable, signed, time-limited channel invites.
//!
//! An invite carries a wrapped channel key to a new member. Tokens are
//! ephemeral: valid for a five-minute window, re-issued on a rolling
//! basis, never persisted, and never revoked — a token that leaks is
//! only useful until its own expiry.
//!
//! Wire format (single little-endian binary blob, base64url-encoded
//! for clipboard transport):
//!
//! ```text
//! version:            u8  (= 1)
//! channel_id:         16 bytes
//! channel_name_len:   u16, channel_name: utf8
//! wrapped_key_len:    u16, wrapped_key:  bytes
//! issuer_public_key:  32 bytes
//! issued_at:          i64 (unix seconds)
//! expires_at:         i64 (unix seconds)
//! signature:          64 bytes
//! ```
//!
//! `wrapped_key` is `salt (16) || nonce (24) || ciphertext+tag` over the
//! tuple `(channel_id, channel_key, channel_name)`, encrypted under a
//! key derived from the embedded issuer public key and the per-invite
//! salt, with `channel_id || expires_at` as associated data. The token
//! is self-contained: the recipient needs nothing beyond the token
//! itself. The Ed25519 signature covers `(wrapped_key, channel_id,
//! expires_at)`, so neither the payload nor the window can be altered.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};

use pv_crypto::{aead, identity, kdf, CryptoError, Identity, PublicKey};

use crate::types::{ChannelId, ChannelKey};

/// Invite validity window.
pub const INVITE_TTL_SECS: i64 = 300;

const WIRE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const SIG_DOMAIN: &[u8] = b"palaver-invite-sig-v1\x00";

#[derive(Debug, Clone)]
pub struct InviteToken {
    pub channel_id: ChannelId,
    pub channel_name: String,
    pub wrapped_key: Vec<u8>,
    pub issuer: PublicKey,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: [u8; 64],
}

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("Invite is malformed: {0}")]
    Malformed(String),

    #[error("Invite signature is invalid")]
    BadSignature,

    #[error("Invite has expired — request a fresh one")]
    Expired,
}

impl InviteToken {
    /// Issue a signed invite for `key`'s channel, valid for `ttl_secs`.
    pub fn issue(
        identity: &Identity,
        channel_name: &str,
        key: &ChannelKey,
        ttl_secs: i64,
    ) -> Result<Self, CryptoError> {
        if channel_name.len() > u16::MAX as usize {
            return Err(CryptoError::InvalidKey(
                "channel name exceeds invite capacity".into(),
            ));
        }

        let channel_id = key.channel_id;
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::seconds(ttl_secs);

        let wrapped_key = wrap(identity.public(), &channel_id, key, channel_name, expires_at)?;
        let signature = identity.sign(&signing_payload(&wrapped_key, &channel_id, expires_at));

        Ok(Self {
            channel_id,
            channel_name: channel_name.to_string(),
            wrapped_key,
            issuer: identity.public(),
            issued_at,
            expires_at,
            signature,
        })
    }

    /// Verify and consume the token: signature, then expiry, then unwrap.
    ///
    /// The returned name comes from the authenticated wrapped payload,
    /// not the cleartext field, so a relabelled token cannot mislead.
    pub fn accept(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(ChannelId, String, ChannelKey), InviteError> {
        identity::verify(
            &self.issuer,
            &signing_payload(&self.wrapped_key, &self.channel_id, self.expires_at),
            &self.signature,
        )
        .map_err(|_| InviteError::BadSignature)?;

        if now > self.expires_at {
            return Err(InviteError::Expired);
        }

        unwrap(
            &self.issuer,
            &self.channel_id,
            &self.wrapped_key,
            self.expires_at,
        )
    }

    /// Encode as a copy-pasteable base64url string.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Decode a base64url string back into a token.
    pub fn decode(code: &str) -> Result<Self, InviteError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(code.trim())
            .map_err(|e| InviteError::Malformed(format!("base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.channel_name.as_bytes();
        let mut out = Vec::with_capacity(
            1 + 16 + 2 + name.len() + 2 + self.wrapped_key.len() + 32 + 8 + 8 + 64,
        );
        out.push(WIRE_VERSION);
        out.extend_from_slice(self.channel_id.as_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&(self.wrapped_key.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.wrapped_key);
        out.extend_from_slice(self.issuer.as_bytes());
        out.extend_from_slice(&self.issued_at.timestamp().to_le_bytes());
        out.extend_from_slice(&self.expires_at.timestamp().to_le_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, InviteError> {
        let mut r = Reader::new(data);

        let version = r.u8()?;
        if version != WIRE_VERSION {
            return Err(InviteError::Malformed(format!(
                "unsupported invite version {version}"
            )));
        }

        let channel_id = ChannelId::from_slice(r.take(16)?)
            .map_err(|e| InviteError::Malformed(e.to_string()))?;

        let name_len = r.u16()? as usize;
        let channel_name = std::str::from_utf8(r.take(name_len)?)
            .map_err(|_| InviteError::Malformed("channel name is not utf8".into()))?
            .to_string();

        let wrapped_len = r.u16()? as usize;
        let wrapped_key = r.take(wrapped_len)?.to_vec();

        let issuer = PublicKey::from_slice(r.take(32)?)
            .map_err(|e| InviteError::Malformed(e.to_string()))?;

        let issued_at = timestamp(r.i64()?)?;
        let expires_at = timestamp(r.i64()?)?;

        let mut signature = [0u8; 64];
        signature.copy_from_slice(r.take(64)?);
        r.finish()?;

        Ok(Self {
            channel_id,
            channel_name,
            wrapped_key,
            issuer,
            issued_at,
            expires_at,
            signature,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, InviteError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| InviteError::Malformed("timestamp out of range".into()))
}

fn signing_payload(wrapped_key: &[u8], channel_id: &ChannelId, expires_at: DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::with_capacity(SIG_DOMAIN.len() + wrapped_key.len() + 16 + 8);
    payload.extend_from_slice(SIG_DOMAIN);
    payload.extend_from_slice(wrapped_key);
    payload.extend_from_slice(channel_id.as_bytes());
    payload.extend_from_slice(&expires_at.timestamp().to_le_bytes());
    payload
}

fn wrap_aad(channel_id: &ChannelId, expires_at: DateTime<Utc>) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + 8);
    aad.extend_from_slice(channel_id.as_bytes());
    aad.extend_from_slice(&expires_at.timestamp().to_le_bytes());
    aad
}

fn wrap(
    issuer: PublicKey,
    channel_id: &ChannelId,
    key: &ChannelKey,
    channel_name: &str,
    expires_at: DateTime<Utc>,
) -> Result<Vec<u8>, CryptoError> {
    let salt = kdf::generate_salt();
    let wrap_key = kdf::derive_key_salted(kdf::CONTEXT_INVITE_WRAP, issuer.as_bytes(), &salt);

    let mut plaintext = Vec::with_capacity(16 + 32 + channel_name.len());
    plaintext.extend_from_slice(channel_id.as_bytes());
    plaintext.extend_from_slice(key.key());
    plaintext.extend_from_slice(channel_name.as_bytes());

    let sealed = aead::encrypt(&wrap_key, &wrap_aad(channel_id, expires_at), &plaintext)?;

    let mut out = Vec::with_capacity(SALT_LEN + sealed.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn unwrap(
    issuer: &PublicKey,
    channel_id: &ChannelId,
    wrapped: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<(ChannelId, String, ChannelKey), InviteError> {
    if wrapped.len() < SALT_LEN {
        return Err(InviteError::Malformed("wrapped key too short".into()));
    }
    let (salt, sealed) = wrapped.split_at(SALT_LEN);
    let wrap_key = kdf::derive_key_salted(kdf::CONTEXT_INVITE_WRAP, issuer.as_bytes(), salt);

    let plaintext = aead::decrypt(&wrap_key, &wrap_aad(channel_id, expires_at), sealed)
        .map_err(|_| InviteError::Malformed("wrapped key failed authentication".into()))?;

    if plaintext.len() < 16 + 32 {
        return Err(InviteError::Malformed("wrapped payload too short".into()));
    }

    let inner_id = ChannelId::from_slice(&plaintext[..16])
        .map_err(|e| InviteError::Malformed(e.to_string()))?;
    if inner_id != *channel_id {
        return Err(InviteError::Malformed(
            "wrapped channel id does not match token".into(),
        ));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&plaintext[16..48]);

    let name = std::str::from_utf8(&plaintext[48..])
        .map_err(|_| InviteError::Malformed("wrapped channel name is not utf8".into()))?
        .to_string();

    Ok((inner_id, name, ChannelKey::from_bytes(inner_id, key)))
}

/// Minimal bounds-checked little-endian reader for the fixed wire format.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], InviteError> {
        if self.pos + n > self.data.len() {
            return Err(InviteError::Malformed("truncated invite".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, InviteError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, InviteError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i64(&mut self) -> Result<i64, InviteError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    fn finish(&self) -> Result<(), InviteError> {
        if self.pos != self.data.len() {
            return Err(InviteError::Malformed("trailing bytes after invite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue_test_token() -> (Identity, ChannelKey, InviteToken) {
        let identity = Identity::generate().unwrap();
        let key = ChannelKey::generate(ChannelId::new());
        let token = InviteToken::issue(&identity, "general", &key, INVITE_TTL_SECS).unwrap();
        (identity, key, token)
    }

    #[test]
    fn roundtrip_at_issue_time() {
        let (_, key, token) = issue_test_token();
        let (id, name, accepted) = token.accept(token.issued_at).unwrap();

        assert_eq!(id, key.channel_id);
        assert_eq!(name, "general");
        assert_eq!(accepted.key(), key.key());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let (_, key, token) = issue_test_token();
        let code = token.encode();
        let decoded = InviteToken::decode(&code).unwrap();

        assert_eq!(decoded.channel_id, token.channel_id);
        assert_eq!(decoded.channel_name, "general");
        assert_eq!(decoded.issuer, token.issuer);
        assert_eq!(decoded.expires_at.timestamp(), token.expires_at.timestamp());

        let (_, _, accepted) = decoded.accept(decoded.issued_at).unwrap();
        assert_eq!(accepted.key(), key.key());
    }

    #[test]
    fn accept_within_window() {
        let (_, _, token) = issue_test_token();
        let four_minutes_later = token.issued_at + Duration::seconds(240);
        assert!(token.accept(four_minutes_later).is_ok());
    }

    #[test]
    fn expired_one_second_past_window() {
        let (_, _, token) = issue_test_token();
        let too_late = token.issued_at + Duration::seconds(INVITE_TTL_SECS + 1);
        match token.accept(too_late) {
            Err(InviteError::Expired) => {}
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn boundary_instant_still_valid() {
        let (_, _, token) = issue_test_token();
        assert!(token.accept(token.expires_at).is_ok());
    }

    #[test]
    fn flipped_signature_byte_rejected() {
        let (_, _, token) = issue_test_token();
        for i in [0usize, 31, 63] {
            let mut bad = token.clone();
            bad.signature[i] ^= 0x01;
            match bad.accept(bad.issued_at) {
                Err(InviteError::BadSignature) => {}
                other => panic!("expected BadSignature at byte {i}, got {other:?}"),
            }
        }
    }

    #[test]
    fn tampered_wrapped_key_rejected() {
        let (_, _, token) = issue_test_token();
        let mut bad = token.clone();
        let last = bad.wrapped_key.len() - 1;
        bad.wrapped_key[last] ^= 0xFF;
        // The signature covers the wrapped key, so this fails before unwrap.
        match bad.accept(bad.issued_at) {
            Err(InviteError::BadSignature) => {}
            other => panic!("expected BadSignature, got {other:?}"),
        }
    }

    #[test]
    fn stretched_expiry_rejected() {
        let (_, _, token) = issue_test_token();
        let mut bad = token.clone();
        bad.expires_at = bad.expires_at + Duration::seconds(3600);
        match bad.accept(bad.issued_at) {
            Err(InviteError::BadSignature) => {}
            other => panic!("expected BadSignature, got {other:?}"),
        }
    }

    #[test]
    fn relabelled_token_returns_authentic_name() {
        // The cleartext name is display-only; the wrapped copy wins.
        let (_, _, token) = issue_test_token();
        let mut relabelled = token.clone();
        relabelled.channel_name = "free-candy".to_string();
        let (_, name, _) = relabelled.accept(relabelled.issued_at).unwrap();
        assert_eq!(name, "general");
    }

    #[test]
    fn forged_issuer_rejected() {
        let (_, _, token) = issue_test_token();
        let mallory = Identity::generate().unwrap();
        let mut forged = token.clone();
        forged.issuer = mallory.public();
        assert!(matches!(
            forged.accept(forged.issued_at),
            Err(InviteError::BadSignature)
        ));
    }

    #[test]
    fn garbage_decode_is_malformed() {
        assert!(matches!(
            InviteToken::decode("not!!valid@@base64"),
            Err(InviteError::Malformed(_))
        ));
        assert!(matches!(
            InviteToken::decode(&URL_SAFE_NO_PAD.encode([0u8; 7])),
            Err(InviteError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let (_, _, token) = issue_test_token();
        let mut bytes = token.to_bytes();
        bytes.push(0);
        assert!(matches!(
            InviteToken::from_bytes(&bytes),
            Err(InviteError::Malformed(_))
        ));
    }

    #[test]
    fn replay_within_window_is_accepted() {
        let (_, _, token) = issue_test_token();
        assert!(token.accept(token.issued_at).is_ok());
        assert!(token.accept(token.issued_at).is_ok());
    }
}
