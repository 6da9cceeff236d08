//! Protocol tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Invite validity window in seconds (5 minutes).
pub const DEFAULT_INVITE_TTL_SECS: i64 = 300;

/// Rolling re-issue interval — comfortably inside the TTL so a displayed
/// invite code never goes stale.
pub const DEFAULT_INVITE_ROTATION_SECS: u64 = 240;

/// Abandon a handshake that has not completed within this window.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 20;

/// Maximum plaintext message size in bytes (256 KiB).
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 262_144;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub invite_ttl_secs: i64,
    pub invite_rotation_secs: u64,
    pub handshake_timeout_secs: u64,
    pub max_message_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            invite_ttl_secs: DEFAULT_INVITE_TTL_SECS,
            invite_rotation_secs: DEFAULT_INVITE_ROTATION_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl ProtocolConfig {
    pub fn invite_rotation(&self) -> Duration {
        Duration::from_secs(self.invite_rotation_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ProtocolConfig::default();
        // Rotation must land before expiry or the displayed code goes stale.
        assert!((cfg.invite_rotation_secs as i64) < cfg.invite_ttl_secs);
        assert_eq!(cfg.max_message_len, 262_144);
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let cfg: ProtocolConfig = serde_json::from_str(r#"{"invite_ttl_secs": 120}"#).unwrap();
        assert_eq!(cfg.invite_ttl_secs, 120);
        assert_eq!(cfg.handshake_timeout_secs, DEFAULT_HANDSHAKE_TIMEOUT_SECS);
    }
}
