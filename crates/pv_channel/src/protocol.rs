//! The channel protocol orchestrator.
//!
//! `ChannelProtocol` wires the primitives to the external transport and
//! store: channel creation, invite issuance/consumption, message
//! send/receive, and peer-session establishment. It holds the local
//! identity as an explicitly passed handle — the composition root
//! creates or loads it through `IdentityStore` and passes it in; there
//! is no global current-identity singleton.
//!
//! Concurrency: seal/open and each peer's handshake are independent and
//! may run in parallel; the key ring is the only cross-call mutable
//! structure and serializes only its inserts. Envelopes may arrive and
//! decrypt out of order — AEAD authentication is per message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use pv_crypto::{Identity, PublicKey};
use pv_proto::envelope::{message_aad, MessageEnvelope};
use pv_proto::invite::InviteToken;
use pv_proto::message::ChannelMessage;
use pv_proto::types::{ChannelId, ChannelKey};

use crate::config::ProtocolConfig;
use crate::error::{ChannelError, HandshakeError};
use crate::keyring::KeyRing;
use crate::peers::{classify_sessions, ConnectionMode};
use crate::session::{PeerSession, SessionHandshake};
use crate::store::MessageStore;
use crate::transport::{PeerAddr, PeerTransport, SessionHandle};

pub struct ChannelProtocol<T: PeerTransport, S: MessageStore> {
    identity: Arc<Identity>,
    config: ProtocolConfig,
    keyring: KeyRing,
    transport: Arc<T>,
    store: Arc<S>,
    sessions: Mutex<HashMap<SessionHandle, PeerSession>>,
    router: Arc<InboundRouter>,
}

impl<T: PeerTransport, S: MessageStore> ChannelProtocol<T, S> {
    /// Build the protocol and register its inbound frame router with
    /// the transport.
    pub fn new(
        identity: Arc<Identity>,
        config: ProtocolConfig,
        transport: Arc<T>,
        store: Arc<S>,
    ) -> Self {
        let router = Arc::new(InboundRouter::default());
        {
            let router = Arc::clone(&router);
            transport.on_receive(Arc::new(move |handle, frame| router.dispatch(handle, frame)));
        }
        Self {
            identity,
            config,
            keyring: KeyRing::new(),
            transport,
            store,
            sessions: Mutex::new(HashMap::new()),
            router,
        }
    }

    pub fn identity(&self) -> PublicKey {
        self.identity.public()
    }

    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    // ── Channels and invites ─────────────────────────────────────────

    /// Create a channel: fresh id, fresh random key, registered locally.
    /// The returned key is the caller's to persist (wrapped).
    pub fn create_channel(&self, name: &str) -> Result<(ChannelId, ChannelKey), ChannelError> {
        let channel_id = ChannelId::new();
        let key = ChannelKey::generate(channel_id);
        self.keyring.insert(key.clone())?;
        info!(channel = %channel_id, name, "channel created");
        Ok((channel_id, key))
    }

    /// Issue a time-limited invite for a joined channel.
    pub fn create_invite(
        &self,
        channel_id: ChannelId,
        channel_name: &str,
    ) -> Result<InviteToken, ChannelError> {
        let key = self
            .keyring
            .get(&channel_id)
            .ok_or(ChannelError::UnknownChannel(channel_id))?;
        let token =
            InviteToken::issue(&self.identity, channel_name, &key, self.config.invite_ttl_secs)?;
        info!(channel = %channel_id, expires_at = %token.expires_at, "invite issued");
        Ok(token)
    }

    /// Consume an invite code, joining its channel.
    pub fn accept_invite(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(ChannelId, String, ChannelKey), ChannelError> {
        let token = InviteToken::decode(code)?;
        let (channel_id, name, key) = token.accept(now)?;
        self.keyring.insert(key.clone())?;
        info!(channel = %channel_id, name = %name, issuer = %token.issuer.short(), "joined channel via invite");
        Ok((channel_id, name, key))
    }

    // ── Messages ─────────────────────────────────────────────────────

    /// Seal a message, persist the ciphertext, and hand it to the
    /// transport for fan-out to the channel's members.
    pub async fn send_message(
        &self,
        channel_id: ChannelId,
        plaintext: &[u8],
    ) -> Result<Uuid, ChannelError> {
        if plaintext.len() > self.config.max_message_len {
            return Err(ChannelError::MessageTooLarge {
                size: plaintext.len(),
                max: self.config.max_message_len,
            });
        }
        let key = self
            .keyring
            .get(&channel_id)
            .ok_or(ChannelError::UnknownChannel(channel_id))?;

        let sender = self.identity.public();
        let aad = message_aad(&channel_id, &sender);
        let envelope = MessageEnvelope::seal(key.key(), &aad, plaintext)?;
        let message = ChannelMessage::new(channel_id, sender, &envelope);

        self.store
            .persist(channel_id, sender, &envelope, message.sent_at)
            .await?;
        self.transport
            .publish(&channel_id, message.to_bytes()?)
            .await?;

        info!(channel = %channel_id, message_id = %message.message_id, "message sent");
        Ok(message.message_id)
    }

    /// Open a received envelope. On success the ciphertext is persisted
    /// and the plaintext returned for display. On authentication
    /// failure the message is dropped and the failure reported as
    /// observability data — the conversation continues.
    pub async fn receive_message(
        &self,
        channel_id: ChannelId,
        envelope: &MessageEnvelope,
        sender: PublicKey,
    ) -> Result<Vec<u8>, ChannelError> {
        let key = self
            .keyring
            .get(&channel_id)
            .ok_or(ChannelError::UnknownChannel(channel_id))?;

        let aad = message_aad(&channel_id, &sender);
        let plaintext = match envelope.open(key.key(), &aad) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(channel = %channel_id, sender = %sender.short(), "message failed authentication; dropped");
                return Err(ChannelError::AuthFailure);
            }
        };

        self.store
            .persist(channel_id, sender, envelope, Utc::now())
            .await?;
        Ok(plaintext)
    }

    /// Decode a raw wire frame from the transport and open its envelope.
    pub async fn receive_wire(&self, frame: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let message = ChannelMessage::from_bytes(frame)?;
        let envelope = message.envelope()?;
        self.receive_message(message.channel_id, &envelope, message.sender)
            .await
    }

    // ── Peer sessions ────────────────────────────────────────────────

    /// Dial a peer and run the initiator side of the handshake. On any
    /// failure only this session is torn down; a fresh attempt may
    /// follow.
    pub async fn establish_session(
        &self,
        addr: &PeerAddr,
        expected_peer: Option<PublicKey>,
    ) -> Result<SessionHandle, ChannelError> {
        let handle = self.transport.connect(addr).await?;
        let mut rx = self
            .router
            .subscribe(handle)
            .ok_or(HandshakeError::TransportClosed)?;

        let driven = tokio::time::timeout(
            self.config.handshake_timeout(),
            self.drive_initiator(handle, &mut rx, expected_peer),
        )
        .await;

        let session = match driven {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                self.router.remove(handle);
                return Err(e);
            }
            Err(_) => {
                self.router.remove(handle);
                return Err(HandshakeError::Timeout.into());
            }
        };

        let peer = session.remote();
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, session);
        info!(handle = %handle, peer = %peer.short(), "peer session established (initiator)");
        Ok(handle)
    }

    async fn drive_initiator(
        &self,
        handle: SessionHandle,
        rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        expected_peer: Option<PublicKey>,
    ) -> Result<PeerSession, ChannelError> {
        let mut hs = SessionHandshake::initiator(&self.identity, expected_peer)?;

        let m1 = hs.write_message()?;
        self.transport.send(handle, m1).await?;

        let m2 = rx.recv().await.ok_or(HandshakeError::TransportClosed)?;
        hs.read_message(&m2)?;

        let m3 = hs.write_message()?;
        self.transport.send(handle, m3).await?;

        let relayed = self.transport.is_relayed(handle);
        Ok(hs.into_session(relayed)?)
    }

    /// Run the responder side of the handshake on an incoming
    /// connection. Call when the transport reports a new connection;
    /// frames that raced ahead are already buffered by the router.
    pub async fn accept_session(&self, handle: SessionHandle) -> Result<PublicKey, ChannelError> {
        let mut rx = self
            .router
            .subscribe(handle)
            .ok_or(HandshakeError::TransportClosed)?;

        let driven = tokio::time::timeout(
            self.config.handshake_timeout(),
            self.drive_responder(handle, &mut rx),
        )
        .await;

        let session = match driven {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                self.router.remove(handle);
                return Err(e);
            }
            Err(_) => {
                self.router.remove(handle);
                return Err(HandshakeError::Timeout.into());
            }
        };

        let peer = session.remote();
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, session);
        info!(handle = %handle, peer = %peer.short(), "peer session established (responder)");
        Ok(peer)
    }

    async fn drive_responder(
        &self,
        handle: SessionHandle,
        rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<PeerSession, ChannelError> {
        let mut hs = SessionHandshake::responder(&self.identity)?;

        let m1 = rx.recv().await.ok_or(HandshakeError::TransportClosed)?;
        hs.read_message(&m1)?;

        let m2 = hs.write_message()?;
        self.transport.send(handle, m2).await?;

        let m3 = rx.recv().await.ok_or(HandshakeError::TransportClosed)?;
        hs.read_message(&m3)?;

        let relayed = self.transport.is_relayed(handle);
        Ok(hs.into_session(relayed)?)
    }

    /// Close a session — the normal end of its life, not an abort.
    pub fn close_session(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut session) = sessions.remove(&handle) {
            session.close();
        }
        self.router.remove(handle);
    }

    /// Encrypt a frame for the transport stream of one session.
    /// This layers UNDER the channel envelope: the frame normally
    /// carries already-sealed channel messages.
    pub fn transport_encrypt(
        &self,
        handle: SessionHandle,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, ChannelError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(&handle)
            .ok_or(ChannelError::NoSession(handle.0))?;
        Ok(session.encrypt(plaintext)?)
    }

    /// Decrypt a frame from the transport stream of one session.
    pub fn transport_decrypt(
        &self,
        handle: SessionHandle,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ChannelError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(&handle)
            .ok_or(ChannelError::NoSession(handle.0))?;
        Ok(session.decrypt(ciphertext)?)
    }

    /// Identity of the peer behind an established session.
    pub fn session_peer(&self, handle: SessionHandle) -> Option<PublicKey> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .map(|s| s.remote())
    }

    /// `Direct` if any established session avoids a relay, `Relayed`
    /// if all established sessions go through one, else `Disconnected`.
    pub fn classify_connection(&self) -> ConnectionMode {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        classify_sessions(sessions.values().map(|s| (s.state(), s.is_relayed())))
    }
}

/// Demultiplexes the transport's single inbound callback into
/// per-connection inboxes. Frames arriving before anyone subscribes
/// are buffered, so a responder that reacts to a connection event
/// never loses the first handshake frame.
#[derive(Default)]
struct InboundRouter {
    inboxes: Mutex<HashMap<SessionHandle, Inbox>>,
}

struct Inbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

impl InboundRouter {
    fn dispatch(&self, handle: SessionHandle, frame: Vec<u8>) {
        let mut inboxes = self.inboxes.lock().unwrap_or_else(PoisonError::into_inner);
        let inbox = inboxes.entry(handle).or_insert_with(Inbox::new);
        // A closed receiver means the session is being torn down;
        // dropping the frame is correct.
        let _ = inbox.tx.send(frame);
    }

    /// Take the receiving end for a connection. `None` if something
    /// already took it.
    fn subscribe(&self, handle: SessionHandle) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        let mut inboxes = self.inboxes.lock().unwrap_or_else(PoisonError::into_inner);
        inboxes.entry(handle).or_insert_with(Inbox::new).rx.take()
    }

    fn remove(&self, handle: SessionHandle) {
        self.inboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
    }
}
