//! The authenticated-encryption message envelope.
//!
//! One envelope per plaintext message, immutable once created.
//! The associated data binds the ciphertext to its context (channel id
//! and sender), so an envelope replayed into another channel or under
//! another sender's name fails authentication.
//!
//! Binary layout: `nonce (24) | tag (16) | ciphertext`.

use pv_crypto::aead::{self, NONCE_LEN, TAG_LEN};
use pv_crypto::{CryptoError, PublicKey, SymmetricKey};

use crate::types::ChannelId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Associated data for a channel message: channel id || sender key.
pub fn message_aad(channel_id: &ChannelId, sender: &PublicKey) -> Vec<u8> {
    let mut aad = Vec::with_capacity(16 + 32);
    aad.extend_from_slice(channel_id.as_bytes());
    aad.extend_from_slice(sender.as_bytes());
    aad
}

impl MessageEnvelope {
    /// Encrypt `plaintext` under the channel key with a fresh random nonce.
    pub fn seal(key: &SymmetricKey, aad: &[u8], plaintext: &[u8]) -> Result<Self, CryptoError> {
        let (nonce, ciphertext, tag) = aead::seal_detached(key, aad, plaintext)?;
        Ok(Self {
            nonce,
            ciphertext,
            tag,
        })
    }

    /// Decrypt and authenticate. Fails closed — the caller must discard
    /// the message on error, never display partial output.
    pub fn open(&self, key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        aead::open_detached(key, aad, &self.nonce, &self.ciphertext, &self.tag)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the binary layout. A truncated blob is treated the same as
    /// a failed authentication: the message is undecryptable.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::AeadDecrypt);
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[..NONCE_LEN]);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&data[NONCE_LEN..NONCE_LEN + TAG_LEN]);
        Ok(Self {
            nonce,
            tag,
            ciphertext: data[NONCE_LEN + TAG_LEN..].to_vec(),
        })
    }
}
