//! Abstract message store.
//!
//! Persistence (database, migrations, retention) is a collaborator.
//! The store only ever receives sealed envelopes — plaintext never
//! crosses this interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pv_crypto::PublicKey;
use pv_proto::envelope::MessageEnvelope;
use pv_proto::types::ChannelId;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub channel_id: ChannelId,
    pub sender: PublicKey,
    pub envelope: MessageEnvelope,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Persist one sealed envelope.
    async fn persist(
        &self,
        channel_id: ChannelId,
        sender: PublicKey,
        envelope: &MessageEnvelope,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Page through a channel's stored envelopes, newest first.
    async fn query(
        &self,
        channel_id: ChannelId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}
