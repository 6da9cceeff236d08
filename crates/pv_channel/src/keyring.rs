//! Per-channel symmetric key registry.
//!
//! The key ring is the only structure the protocol mutates across
//! calls. Entries are keyed by immutable channel id and the key values
//! are immutable once inserted, so reads are cheap and safe to run
//! concurrently; the write lock only serializes inserts. A second
//! insert for an existing id is rejected — a silently replaced channel
//! key would split the channel into members that can no longer read
//! each other.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use pv_crypto::{aead, kdf, CryptoError, Identity};
use pv_proto::types::{ChannelId, ChannelKey};

use crate::error::ChannelError;

#[derive(Default)]
pub struct KeyRing {
    inner: RwLock<HashMap<ChannelId, ChannelKey>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel key. Fails with `DuplicateChannel` if the id
    /// is already present; existing entries are never overwritten.
    pub fn insert(&self, key: ChannelKey) -> Result<(), ChannelError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = key.channel_id;
        if guard.contains_key(&id) {
            return Err(ChannelError::DuplicateChannel(id));
        }
        guard.insert(id, key);
        Ok(())
    }

    pub fn get(&self, id: &ChannelId) -> Option<ChannelKey> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Drop a channel key on leaving the channel.
    pub fn remove(&self, id: &ChannelId) -> Option<ChannelKey> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encrypt a channel key for local storage so raw keys never sit
/// unencrypted in the store. The wrapping key is BLAKE3-derived from
/// the identity secret.
pub fn wrap_for_storage(key: &ChannelKey, identity: &Identity) -> Result<Vec<u8>, CryptoError> {
    let wrapping = kdf::derive_key(kdf::CONTEXT_CHANNEL_KEY_WRAP, identity.secret_bytes());
    aead::wrap_key(&wrapping, key.key())
}

/// Decrypt a channel key previously wrapped with `wrap_for_storage`.
/// Fails with `CorruptKeyData` if authentication fails.
pub fn unwrap_from_storage(
    channel_id: ChannelId,
    wrapped: &[u8],
    identity: &Identity,
) -> Result<ChannelKey, CryptoError> {
    let wrapping = kdf::derive_key(kdf::CONTEXT_CHANNEL_KEY_WRAP, identity.secret_bytes());
    let raw = aead::unwrap_key(&wrapping, wrapped)?;
    Ok(ChannelKey::from_bytes(channel_id, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn insert_and_get() {
        let ring = KeyRing::new();
        let key = ChannelKey::generate(ChannelId::new());
        let id = key.channel_id;

        ring.insert(key.clone()).unwrap();
        assert_eq!(ring.get(&id).unwrap().key(), key.key());
        assert!(ring.contains(&id));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn duplicate_insert_rejected_and_original_kept() {
        let ring = KeyRing::new();
        let id = ChannelId::new();
        let original = ChannelKey::generate(id);
        let imposter = ChannelKey::generate(id);

        ring.insert(original.clone()).unwrap();
        match ring.insert(imposter) {
            Err(ChannelError::DuplicateChannel(dup)) => assert_eq!(dup, id),
            other => panic!("expected DuplicateChannel, got {other:?}"),
        }
        assert_eq!(ring.get(&id).unwrap().key(), original.key());
    }

    #[test]
    fn remove_frees_the_id() {
        let ring = KeyRing::new();
        let key = ChannelKey::generate(ChannelId::new());
        let id = key.channel_id;

        ring.insert(key).unwrap();
        assert!(ring.remove(&id).is_some());
        assert!(!ring.contains(&id));
        assert!(ring.insert(ChannelKey::generate(id)).is_ok());
    }

    #[test]
    fn concurrent_inserts_for_same_id_admit_exactly_one() {
        let ring = Arc::new(KeyRing::new());
        let id = ChannelId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || ring.insert(ChannelKey::generate(id)).is_ok())
            })
            .collect();

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn concurrent_inserts_for_distinct_ids_all_land() {
        let ring = Arc::new(KeyRing::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ring = Arc::clone(&ring);
                std::thread::spawn(move || ring.insert(ChannelKey::generate(ChannelId::new())))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(ring.len(), 8);
    }

    #[test]
    fn storage_wrap_roundtrip() {
        let identity = Identity::generate().unwrap();
        let key = ChannelKey::generate(ChannelId::new());

        let wrapped = wrap_for_storage(&key, &identity).unwrap();
        let unwrapped = unwrap_from_storage(key.channel_id, &wrapped, &identity).unwrap();
        assert_eq!(unwrapped.key(), key.key());
    }

    #[test]
    fn storage_wrap_hides_raw_key() {
        let identity = Identity::generate().unwrap();
        let key = ChannelKey::generate(ChannelId::new());
        let wrapped = wrap_for_storage(&key, &identity).unwrap();
        assert!(!wrapped.windows(32).any(|w| w == key.key().as_slice()));
    }

    #[test]
    fn unwrap_with_wrong_identity_is_corrupt() {
        let key = ChannelKey::generate(ChannelId::new());
        let wrapped = wrap_for_storage(&key, &Identity::generate().unwrap()).unwrap();

        let other = Identity::generate().unwrap();
        match unwrap_from_storage(key.channel_id, &wrapped, &other) {
            Err(CryptoError::CorruptKeyData) => {}
            other => panic!("expected CorruptKeyData, got {other:?}"),
        }
    }
}
