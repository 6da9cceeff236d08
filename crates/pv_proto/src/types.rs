//! Core protocol identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::ZeroizeOnDrop;

use pv_crypto::{generate_symmetric_key, CryptoError, SymmetricKey};

/// Channel identifier — a random v4 UUID, stable for the channel's life.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("channel id must be 16 bytes".into()))?;
        Ok(Self(Uuid::from_bytes(arr)))
    }

    /// Pub/sub routing key for this channel's traffic.
    pub fn to_topic(&self) -> String {
        format!("channel:{}", self.0)
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-channel symmetric secret, shared by all channel members.
/// Immutable once created; key bytes are cleared on drop. Never leaves
/// the process except inside an invite token's wrapped form.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct ChannelKey {
    #[zeroize(skip)]
    pub channel_id: ChannelId,
    key: SymmetricKey,
}

impl ChannelKey {
    /// Draw a fresh random 256-bit key for a new channel.
    pub fn generate(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            key: generate_symmetric_key(),
        }
    }

    pub fn from_bytes(channel_id: ChannelId, key: SymmetricKey) -> Self {
        Self { channel_id, key }
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes intentionally absent.
        f.debug_struct("ChannelKey")
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}
