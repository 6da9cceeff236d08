//! pv_proto — wire types, envelopes, and codecs for Palaver
//!
//! # Modules
//! - `types`    — channel ids and channel keys
//! - `envelope` — the authenticated-encryption message envelope
//! - `invite`   — portable, signed, time-limited invite tokens
//! - `message`  — the channel wire message handed to the transport

pub mod envelope;
pub mod invite;
pub mod message;
pub mod types;

pub use envelope::MessageEnvelope;
pub use invite::{InviteError, InviteToken};
pub use message::ChannelMessage;
pub use types::{ChannelId, ChannelKey};
