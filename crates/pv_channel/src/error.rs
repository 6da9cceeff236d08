use thiserror::Error;

use pv_crypto::CryptoError;
use pv_proto::invite::InviteError;
use pv_proto::message::WireError;
use pv_proto::types::ChannelId;

/// Handshake failures. All of them tear down the affected session and
/// only that session; a fresh handshake may be attempted afterwards.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Noise protocol error: {0}")]
    Noise(String),

    #[error("Identity proof rejected: {0}")]
    BadProof(String),

    #[error("Peer identity mismatch: expected {expected}, got {actual}")]
    PeerMismatch { expected: String, actual: String },

    #[error("Handshake message out of order: {0}")]
    InvalidState(&'static str),

    #[error("Handshake timed out")]
    Timeout,

    #[error("Transport closed during handshake")]
    TransportClosed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer is unreachable: {0}")]
    Unreachable(String),

    #[error("Transport session is gone")]
    SessionGone,

    #[error("Transport failure: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Message store failure: {0}")]
    Backend(String),
}

/// Top-level error taxonomy surfaced by `ChannelProtocol`.
///
/// Nothing here panics the process: crypto failures abort the single
/// operation, auth failures drop the single message, handshake failures
/// tear down the single session.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),

    /// AEAD authentication failed on message open. The message is
    /// dropped and logged; the conversation continues.
    #[error("Message failed authentication and was discarded")]
    AuthFailure,

    #[error(transparent)]
    Invite(#[from] InviteError),

    #[error("Channel {0} already exists")]
    DuplicateChannel(ChannelId),

    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("Message exceeds maximum size ({size} > {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("No established session for handle {0}")]
    NoSession(u64),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
