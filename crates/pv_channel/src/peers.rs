//! Peer connection classification and participant state.
//!
//! Join/leave/mute events arrive asynchronously from the transport and
//! call layers; instead of mutating maps ad hoc in each callback, the
//! events form one ordered stream folded by a pure reducer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use pv_crypto::PublicKey;

use crate::session::SessionState;

/// How this node currently reaches its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// At least one established session without a relay in the path.
    Direct,
    /// Connected, but every established session runs through a relay.
    Relayed,
    /// No established sessions at all.
    Disconnected,
}

/// Classify from (state, relayed) snapshots of all peer sessions.
pub fn classify_sessions(sessions: impl IntoIterator<Item = (SessionState, bool)>) -> ConnectionMode {
    let mut any_established = false;
    for (state, relayed) in sessions {
        if state != SessionState::Established {
            continue;
        }
        if !relayed {
            return ConnectionMode::Direct;
        }
        any_established = true;
    }
    if any_established {
        ConnectionMode::Relayed
    } else {
        ConnectionMode::Disconnected
    }
}

/// One event in a channel's participant stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Joined { peer: PublicKey },
    Left { peer: PublicKey },
    Muted { peer: PublicKey, muted: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantState {
    pub muted: bool,
}

/// Current participant roster — the fold of a `PeerEvent` stream.
#[derive(Debug, Clone, Default)]
pub struct Participants {
    present: HashMap<PublicKey, ParticipantState>,
}

impl Participants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a single event. Events for absent peers (a mute arriving
    /// after a leave, a duplicate leave) are no-ops rather than errors:
    /// the stream is ordered per sender but joins across peers.
    pub fn apply(&mut self, event: &PeerEvent) {
        match event {
            PeerEvent::Joined { peer } => {
                self.present.entry(*peer).or_default();
            }
            PeerEvent::Left { peer } => {
                self.present.remove(peer);
            }
            PeerEvent::Muted { peer, muted } => {
                if let Some(state) = self.present.get_mut(peer) {
                    state.muted = *muted;
                }
            }
        }
    }

    /// Fold a whole event stream from scratch.
    pub fn fold(events: impl IntoIterator<Item = PeerEvent>) -> Self {
        let mut participants = Self::new();
        for event in events {
            participants.apply(&event);
        }
        participants
    }

    pub fn contains(&self, peer: &PublicKey) -> bool {
        self.present.contains_key(peer)
    }

    pub fn is_muted(&self, peer: &PublicKey) -> bool {
        self.present.get(peer).map(|s| s.muted).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PublicKey> {
        self.present.keys()
    }
}
