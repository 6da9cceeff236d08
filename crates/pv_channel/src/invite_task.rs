//! Rolling invite regeneration.
//!
//! A displayed invite code would otherwise expire under the user's
//! eyes. Instead of the UI polling on a timer, a scheduled task
//! re-issues the invite comfortably before each expiry and publishes
//! every fresh token on a watch channel for the UI to observe.
//! Superseded tokens stay valid until their own expiry — regeneration
//! narrows exposure, it does not revoke.

use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use pv_crypto::{CryptoError, Identity};
use pv_proto::invite::InviteToken;
use pv_proto::types::ChannelKey;

use crate::config::ProtocolConfig;

/// Control surface returned to the caller.
pub struct InviteRotationHandle {
    /// Wake the loop for an immediate re-issue (e.g. the user opened
    /// the invite dialog and wants a full-window token).
    pub wake: Arc<Notify>,
    /// Send `true` to stop the loop.
    pub shutdown_tx: watch::Sender<bool>,
    /// Always holds the most recently issued token.
    pub tokens: watch::Receiver<InviteToken>,
}

/// Spawn the rotation loop for one displayed invite. The first token is
/// issued synchronously so observers always see a valid value.
pub fn spawn_invite_rotation(
    identity: Arc<Identity>,
    channel_name: String,
    key: ChannelKey,
    config: &ProtocolConfig,
) -> Result<(JoinHandle<()>, InviteRotationHandle), CryptoError> {
    let ttl = config.invite_ttl_secs;
    let interval = config.invite_rotation();

    let initial = InviteToken::issue(&identity, &channel_name, &key, ttl)?;
    let (tokens_tx, tokens_rx) = watch::channel(initial);

    let wake = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let wake_task = Arc::clone(&wake);
    let channel_id = key.channel_id;

    let handle = tokio::spawn(async move {
        info!(channel = %channel_id, interval_secs = interval.as_secs(), "invite rotation started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = wake_task.notified() => {
                    debug!(channel = %channel_id, "invite rotation woken early");
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(channel = %channel_id, "invite rotation stopped");
                        return;
                    }
                }
            }

            if *shutdown_rx.borrow() {
                return;
            }

            match InviteToken::issue(&identity, &channel_name, &key, ttl) {
                Ok(token) => {
                    debug!(channel = %channel_id, expires_at = %token.expires_at, "invite re-issued");
                    if tokens_tx.send(token).is_err() {
                        // Every observer is gone; nothing left to rotate for.
                        return;
                    }
                }
                Err(e) => {
                    // Entropy failure is fatal and non-retryable; stop
                    // rotating rather than loop on a broken RNG.
                    tracing::error!(channel = %channel_id, error = %e, "invite re-issue failed");
                    return;
                }
            }
        }
    });

    Ok((
        handle,
        InviteRotationHandle {
            wake,
            shutdown_tx,
            tokens: tokens_rx,
        },
    ))
}
