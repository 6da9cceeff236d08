//! pv_channel — Palaver channel protocol orchestration
//!
//! Ties the primitives together: identity persistence, the per-channel
//! key ring, the Noise peer-session handshake, invite issuance and
//! rotation, and message send/receive — all behind abstract transport
//! and storage interfaces so the networking substrate and persistence
//! engine stay replaceable.
//!
//! # Module layout
//! - `identity_store` — encrypted-at-rest identity persistence
//! - `keyring`        — per-channel symmetric key registry
//! - `session`        — Noise XX handshake + established peer sessions
//! - `protocol`       — the orchestrating `ChannelProtocol`
//! - `invite_task`    — rolling invite re-issue task
//! - `peers`          — connection classification + peer event fold
//! - `transport`      — abstract `PeerTransport` collaborator
//! - `store`          — abstract `MessageStore` collaborator
//! - `config`         — protocol tunables
//! - `error`          — unified error taxonomy

pub mod config;
pub mod error;
pub mod identity_store;
pub mod invite_task;
pub mod keyring;
pub mod peers;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;

pub use config::ProtocolConfig;
pub use error::{ChannelError, HandshakeError, StoreError, TransportError};
pub use identity_store::IdentityStore;
pub use invite_task::{spawn_invite_rotation, InviteRotationHandle};
pub use keyring::KeyRing;
pub use peers::{ConnectionMode, Participants, PeerEvent};
pub use protocol::ChannelProtocol;
pub use session::{PeerSession, SessionHandshake, SessionState};
pub use store::{MessageStore, StoredMessage};
pub use transport::{PeerAddr, PeerTransport, SessionHandle};
