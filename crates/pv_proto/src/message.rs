//! The channel wire message — what the transport carries.
//!
//! The payload is an already-sealed envelope; the transport and any
//! relay see ciphertext only. Routing metadata (channel id, sender) is
//! in the clear because the transport needs it, and the same values
//! are bound into the envelope's associated data so they cannot be
//! swapped without breaking authentication.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pv_crypto::PublicKey;

use crate::envelope::MessageEnvelope;
use crate::types::ChannelId;

pub const WIRE_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub version: u8,
    /// Random UUID for ack/dedup — no cryptographic meaning.
    pub message_id: Uuid,
    pub channel_id: ChannelId,
    pub sender: PublicKey,
    pub sent_at: DateTime<Utc>,
    /// base64url of the envelope's binary form.
    pub payload: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Wire serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message payload: {0}")]
    Payload(String),
}

impl ChannelMessage {
    pub fn new(channel_id: ChannelId, sender: PublicKey, envelope: &MessageEnvelope) -> Self {
        Self {
            version: WIRE_VERSION,
            message_id: Uuid::new_v4(),
            channel_id,
            sender,
            sent_at: Utc::now(),
            payload: URL_SAFE_NO_PAD.encode(envelope.to_bytes()),
        }
    }

    /// Decode the carried envelope (still sealed).
    pub fn envelope(&self) -> Result<MessageEnvelope, WireError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.payload)
            .map_err(|e| WireError::Payload(format!("base64: {e}")))?;
        MessageEnvelope::from_bytes(&bytes).map_err(|e| WireError::Payload(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(data)?)
    }
}
