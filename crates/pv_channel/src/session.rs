//! Peer-session handshake and transport encryption.
//!
//! Noise `XX_25519_ChaChaPoly_BLAKE2s`: both parties prove possession
//! of their long-term identity while agreeing on an ephemeral transport
//! key, and neither static key is visible to a passive observer before
//! the ephemeral exchange completes.
//!
//! The Noise statics are X25519 keys bridged from the Ed25519 identity
//! (see `pv_crypto::identity`). The handshake messages that carry a
//! static also carry an `IdentityProof` payload — the sender's Ed25519
//! public key plus a signature over its Noise static — so the receiver
//! can tie the DH key it just authenticated to a Palaver identity:
//!
//! ```text
//! msg1  I -> R : e
//! msg2  R -> I : e, ee, s, es   + responder proof (encrypted)
//! msg3  I -> R : s, se          + initiator proof (encrypted)
//! ```
//!
//! State machine (per side): `Init → SentEphemeral → ReceivedEphemeral
//! → Authenticated → Established`, terminal `Failed`. Every
//! verification failure moves to `Failed` and drops the Noise state;
//! there is no unauthenticated fallback. Dropping the value before
//! `Established` cancels the handshake; afterwards, `close()` ends the
//! session.
//!
//! The established session encrypts the transport byte stream. This is
//! layered UNDER channel-key envelope encryption: a relay that
//! legitimately terminates a transport session still sees only sealed
//! channel envelopes.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pv_crypto::{identity, kdf, Identity, PublicKey, SymmetricKey};

use crate::error::HandshakeError;

const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";
const BIND_DOMAIN: &[u8] = b"palaver-session-bind-v1\x00";

/// Largest handshake frame we will produce or accept.
const HANDSHAKE_BUF_LEN: usize = 1024;

/// Noise transport messages carry a 16-byte tag and are capped at
/// 65535 bytes overall.
const TRANSPORT_TAG_LEN: usize = 16;
const MAX_TRANSPORT_PAYLOAD: usize = 65535 - TRANSPORT_TAG_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    SentEphemeral,
    ReceivedEphemeral,
    Authenticated,
    Established,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

/// Payload carried inside the handshake messages that transmit a
/// static key: claims an Ed25519 identity and binds it to the Noise
/// static with a signature.
#[derive(Debug, Serialize, Deserialize)]
struct IdentityProof {
    identity: String,
    signature: String,
}

fn binding_bytes(noise_static: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BIND_DOMAIN.len() + noise_static.len());
    out.extend_from_slice(BIND_DOMAIN);
    out.extend_from_slice(noise_static);
    out
}

/// In-progress mutually-authenticated key exchange. Sans-I/O: the
/// caller moves the produced frames over the transport.
pub struct SessionHandshake {
    role: Role,
    state: SessionState,
    noise: Option<snow::HandshakeState>,
    local_identity: PublicKey,
    proof: IdentityProof,
    expected_peer: Option<PublicKey>,
    remote_identity: Option<PublicKey>,
}

impl SessionHandshake {
    /// Start a handshake as the dialing side. When `expected_peer` is
    /// set (re-connecting to a known peer), any other identity — even a
    /// validly-proven one — is rejected.
    pub fn initiator(
        identity: &Identity,
        expected_peer: Option<PublicKey>,
    ) -> Result<Self, HandshakeError> {
        Self::new(identity, Role::Initiator, expected_peer)
    }

    /// Start a handshake as the accepting side. The responder cannot
    /// know who will dial; it authenticates whatever identity the
    /// initiator proves.
    pub fn responder(identity: &Identity) -> Result<Self, HandshakeError> {
        Self::new(identity, Role::Responder, None)
    }

    fn new(
        identity: &Identity,
        role: Role,
        expected_peer: Option<PublicKey>,
    ) -> Result<Self, HandshakeError> {
        let static_secret = identity.x25519_secret();
        let static_public = x25519_dalek::PublicKey::from(&static_secret);

        let params = NOISE_PATTERN
            .parse()
            .map_err(|e| HandshakeError::Noise(format!("{e}")))?;
        let static_secret_bytes = static_secret.to_bytes();
        let builder = snow::Builder::new(params).local_private_key(&static_secret_bytes);
        let noise = match role {
            Role::Initiator => builder.build_initiator(),
            Role::Responder => builder.build_responder(),
        }
        .map_err(|e| HandshakeError::Noise(e.to_string()))?;

        let proof = IdentityProof {
            identity: identity.public().to_b64(),
            signature: URL_SAFE_NO_PAD
                .encode(identity.sign(&binding_bytes(static_public.as_bytes()))),
        };

        Ok(Self {
            role,
            state: SessionState::Init,
            noise: Some(noise),
            local_identity: identity.public(),
            proof,
            expected_peer,
            remote_identity: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Identity of the peer, known once its proof has been verified.
    pub fn remote_identity(&self) -> Option<PublicKey> {
        self.remote_identity
    }

    /// Handshake complete on this side; ready for `into_session`.
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Authenticated
            && self
                .noise
                .as_ref()
                .map(|n| n.is_handshake_finished())
                .unwrap_or(false)
    }

    /// Produce the next outgoing handshake frame.
    pub fn write_message(&mut self) -> Result<Vec<u8>, HandshakeError> {
        let payload: Vec<u8> = match (self.role, self.state) {
            // msg1: ephemeral only — nothing to prove yet, and nothing
            // is encrypted yet, so the payload stays empty.
            (Role::Initiator, SessionState::Init) => Vec::new(),
            // msg2 / msg3 carry our static; attach the identity proof.
            (Role::Responder, SessionState::ReceivedEphemeral)
            | (Role::Initiator, SessionState::ReceivedEphemeral) => serde_json::to_vec(&self.proof)
                .map_err(|e| HandshakeError::Noise(format!("proof encoding: {e}")))?,
            _ => return Err(self.fail(HandshakeError::InvalidState("unexpected write"))),
        };

        let noise = match self.noise.as_mut() {
            Some(noise) => noise,
            None => return Err(HandshakeError::InvalidState("handshake already failed")),
        };

        let mut buf = vec![0u8; HANDSHAKE_BUF_LEN];
        let len = match noise.write_message(&payload, &mut buf) {
            Ok(len) => len,
            Err(e) => return Err(self.fail(HandshakeError::Noise(e.to_string()))),
        };
        buf.truncate(len);

        self.state = match (self.role, self.state) {
            (Role::Initiator, SessionState::Init) => SessionState::SentEphemeral,
            (Role::Responder, SessionState::ReceivedEphemeral) => SessionState::SentEphemeral,
            (Role::Initiator, SessionState::ReceivedEphemeral) => SessionState::Authenticated,
            _ => unreachable!("states checked above"),
        };
        debug!(role = ?self.role, state = ?self.state, "handshake frame written");
        Ok(buf)
    }

    /// Consume an incoming handshake frame, verifying the peer's
    /// identity proof on the messages that carry a static key.
    pub fn read_message(&mut self, frame: &[u8]) -> Result<(), HandshakeError> {
        let expects_proof = match (self.role, self.state) {
            (Role::Responder, SessionState::Init) => false, // msg1
            (Role::Initiator, SessionState::SentEphemeral) => true, // msg2
            (Role::Responder, SessionState::SentEphemeral) => true, // msg3
            _ => return Err(self.fail(HandshakeError::InvalidState("unexpected read"))),
        };

        let noise = match self.noise.as_mut() {
            Some(noise) => noise,
            None => return Err(HandshakeError::InvalidState("handshake already failed")),
        };

        let mut buf = vec![0u8; HANDSHAKE_BUF_LEN];
        let len = match noise.read_message(frame, &mut buf) {
            Ok(len) => len,
            Err(e) => return Err(self.fail(HandshakeError::Noise(e.to_string()))),
        };

        if expects_proof {
            let remote_static = match noise.get_remote_static().map(<[u8]>::to_vec) {
                Some(s) => s,
                None => {
                    return Err(self.fail(HandshakeError::InvalidState("remote static missing")))
                }
            };
            match verify_proof(&buf[..len], &remote_static, self.expected_peer.as_ref()) {
                Ok(peer) => {
                    self.remote_identity = Some(peer);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }

        self.state = match (self.role, self.state) {
            (Role::Responder, SessionState::Init) => SessionState::ReceivedEphemeral,
            (Role::Initiator, SessionState::SentEphemeral) => SessionState::ReceivedEphemeral,
            (Role::Responder, SessionState::SentEphemeral) => SessionState::Authenticated,
            _ => unreachable!("states checked above"),
        };
        debug!(role = ?self.role, state = ?self.state, "handshake frame read");
        Ok(())
    }

    /// Finalize into an established session with the derived transport
    /// key. Only valid after both sides' proofs have been exchanged.
    pub fn into_session(mut self, relayed: bool) -> Result<PeerSession, HandshakeError> {
        if !self.is_complete() {
            return Err(HandshakeError::InvalidState("handshake not complete"));
        }
        let remote = self
            .remote_identity
            .ok_or_else(|| HandshakeError::InvalidState("peer identity not verified"))?;
        let noise = self
            .noise
            .take()
            .ok_or_else(|| HandshakeError::InvalidState("handshake already failed"))?;

        let transport_key = kdf::derive_transport_key(noise.get_handshake_hash())
            .map_err(|e| HandshakeError::Noise(e.to_string()))?;
        let transport = noise
            .into_transport_mode()
            .map_err(|e| HandshakeError::Noise(e.to_string()))?;

        debug!(peer = %remote.short(), relayed, "session established");
        Ok(PeerSession {
            local: self.local_identity,
            remote,
            transport,
            transport_key,
            state: SessionState::Established,
            relayed,
            established_at: Utc::now(),
        })
    }

    /// Tear down: record the failure, drop all key material, report it.
    fn fail(&mut self, err: HandshakeError) -> HandshakeError {
        warn!(role = ?self.role, error = %err, "handshake failed");
        self.state = SessionState::Failed;
        self.noise = None;
        err
    }
}

fn verify_proof(
    payload: &[u8],
    remote_static: &[u8],
    expected: Option<&PublicKey>,
) -> Result<PublicKey, HandshakeError> {
    let proof: IdentityProof = serde_json::from_slice(payload)
        .map_err(|e| HandshakeError::BadProof(format!("payload decoding: {e}")))?;

    let claimed = PublicKey::from_b64(&proof.identity)
        .map_err(|e| HandshakeError::BadProof(e.to_string()))?;

    if let Some(expected) = expected {
        if *expected != claimed {
            return Err(HandshakeError::PeerMismatch {
                expected: expected.short(),
                actual: claimed.short(),
            });
        }
    }

    let sig = URL_SAFE_NO_PAD
        .decode(&proof.signature)
        .map_err(|e| HandshakeError::BadProof(format!("signature decoding: {e}")))?;
    identity::verify(&claimed, &binding_bytes(remote_static), &sig)
        .map_err(|_| HandshakeError::BadProof("signature does not verify".into()))?;

    // The proven Ed25519 identity must map to the very static key the
    // Noise handshake authenticated — otherwise the proof could be
    // pasted onto someone else's DH key.
    let bound_static = claimed
        .to_x25519()
        .map_err(|e| HandshakeError::BadProof(e.to_string()))?;
    if bound_static.as_slice() != remote_static {
        return Err(HandshakeError::BadProof(
            "identity does not match the handshake static key".into(),
        ));
    }

    Ok(claimed)
}

/// An authenticated, established peer link.
pub struct PeerSession {
    local: PublicKey,
    remote: PublicKey,
    transport: snow::TransportState,
    transport_key: SymmetricKey,
    state: SessionState,
    relayed: bool,
    established_at: DateTime<Utc>,
}

impl PeerSession {
    pub fn local(&self) -> PublicKey {
        self.local
    }

    pub fn remote(&self) -> PublicKey {
        self.remote
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_relayed(&self) -> bool {
        self.relayed
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// The symmetric key both sides derived from the handshake hash.
    /// Available to callers that layer additional transport framing.
    pub fn transport_key(&self) -> &SymmetricKey {
        &self.transport_key
    }

    /// Encrypt one transport frame for the peer.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if self.state != SessionState::Established {
            return Err(HandshakeError::InvalidState("session is closed"));
        }
        if plaintext.len() > MAX_TRANSPORT_PAYLOAD {
            return Err(HandshakeError::Noise(format!(
                "transport frame too large: {} > {MAX_TRANSPORT_PAYLOAD}",
                plaintext.len()
            )));
        }
        let mut buf = vec![0u8; plaintext.len() + TRANSPORT_TAG_LEN];
        let len = self
            .transport
            .write_message(plaintext, &mut buf)
            .map_err(|e| HandshakeError::Noise(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Decrypt one transport frame from the peer.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        if self.state != SessionState::Established {
            return Err(HandshakeError::InvalidState("session is closed"));
        }
        let mut buf = vec![0u8; ciphertext.len()];
        let len = self
            .transport
            .read_message(ciphertext, &mut buf)
            .map_err(|e| HandshakeError::Noise(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Close the session. Closing is the normal end of life after
    /// `Established` — distinct from a handshake abort.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        debug!(peer = %self.remote.short(), "session closed");
    }
}

/// Drive two in-process handshakes to completion. Test and loopback
/// helper; real peers move the frames over a transport.
#[cfg(test)]
fn run_handshake(
    initiator: &mut SessionHandshake,
    responder: &mut SessionHandshake,
) -> Result<(), HandshakeError> {
    let m1 = initiator.write_message()?;
    responder.read_message(&m1)?;
    let m2 = responder.write_message()?;
    initiator.read_message(&m2)?;
    let m3 = initiator.write_message()?;
    responder.read_message(&m3)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Identity, Identity) {
        (Identity::generate().unwrap(), Identity::generate().unwrap())
    }

    #[test]
    fn honest_parties_establish_with_equal_keys() {
        let (alice, bob) = pair();
        let mut init = SessionHandshake::initiator(&alice, Some(bob.public())).unwrap();
        let mut resp = SessionHandshake::responder(&bob).unwrap();

        run_handshake(&mut init, &mut resp).unwrap();
        assert!(init.is_complete());
        assert!(resp.is_complete());
        assert_eq!(init.remote_identity(), Some(bob.public()));
        assert_eq!(resp.remote_identity(), Some(alice.public()));

        let a = init.into_session(false).unwrap();
        let b = resp.into_session(false).unwrap();
        assert_eq!(a.transport_key(), b.transport_key());
        assert_eq!(a.state(), SessionState::Established);
        assert_eq!(b.state(), SessionState::Established);
    }

    #[test]
    fn transport_frames_flow_both_ways() {
        let (alice, bob) = pair();
        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        let mut resp = SessionHandshake::responder(&bob).unwrap();
        run_handshake(&mut init, &mut resp).unwrap();

        let mut a = init.into_session(false).unwrap();
        let mut b = resp.into_session(false).unwrap();

        let ct = a.encrypt(b"from alice").unwrap();
        assert_eq!(b.decrypt(&ct).unwrap(), b"from alice");

        let ct = b.encrypt(b"from bob").unwrap();
        assert_eq!(a.decrypt(&ct).unwrap(), b"from bob");
    }

    #[test]
    fn state_progression_initiator() {
        let (alice, bob) = pair();
        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        let mut resp = SessionHandshake::responder(&bob).unwrap();

        assert_eq!(init.state(), SessionState::Init);
        let m1 = init.write_message().unwrap();
        assert_eq!(init.state(), SessionState::SentEphemeral);

        resp.read_message(&m1).unwrap();
        assert_eq!(resp.state(), SessionState::ReceivedEphemeral);
        let m2 = resp.write_message().unwrap();
        assert_eq!(resp.state(), SessionState::SentEphemeral);

        init.read_message(&m2).unwrap();
        assert_eq!(init.state(), SessionState::ReceivedEphemeral);
        let m3 = init.write_message().unwrap();
        assert_eq!(init.state(), SessionState::Authenticated);

        resp.read_message(&m3).unwrap();
        assert_eq!(resp.state(), SessionState::Authenticated);
    }

    #[test]
    fn unexpected_peer_identity_is_rejected() {
        let (alice, bob) = pair();
        let mallory = Identity::generate().unwrap();

        // Alice dials expecting Bob; Mallory answers with her own
        // (validly proven) identity.
        let mut init = SessionHandshake::initiator(&alice, Some(bob.public())).unwrap();
        let mut resp = SessionHandshake::responder(&mallory).unwrap();

        let m1 = init.write_message().unwrap();
        resp.read_message(&m1).unwrap();
        let m2 = resp.write_message().unwrap();

        match init.read_message(&m2) {
            Err(HandshakeError::PeerMismatch { .. }) => {}
            other => panic!("expected PeerMismatch, got {other:?}"),
        }
        assert_eq!(init.state(), SessionState::Failed);
    }

    #[test]
    fn imposter_claiming_another_identity_is_rejected() {
        let (alice, bob) = pair();
        let mallory = Identity::generate().unwrap();

        // Mallory responds but claims to be Bob. She can sign the
        // binding with her own key, not Bob's, so the proof fails.
        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        let mut resp = SessionHandshake::responder(&mallory).unwrap();
        let forged_static = x25519_dalek::PublicKey::from(&mallory.x25519_secret());
        resp.proof = IdentityProof {
            identity: bob.public().to_b64(),
            signature: URL_SAFE_NO_PAD
                .encode(mallory.sign(&binding_bytes(forged_static.as_bytes()))),
        };

        let m1 = init.write_message().unwrap();
        resp.read_message(&m1).unwrap();
        let m2 = resp.write_message().unwrap();

        match init.read_message(&m2) {
            Err(HandshakeError::BadProof(_)) => {}
            other => panic!("expected BadProof, got {other:?}"),
        }
        assert_eq!(init.state(), SessionState::Failed);
        assert!(init.into_session(false).is_err());
    }

    #[test]
    fn proof_pasted_onto_foreign_static_is_rejected() {
        let (alice, bob) = pair();
        let mallory = Identity::generate().unwrap();

        // Mallory replays Bob's self-signed proof for Bob's OWN static.
        // The signature verifies, but the static in the handshake is
        // Mallory's, so the binding check fails.
        let bob_static = x25519_dalek::PublicKey::from(&bob.x25519_secret());
        let mut resp = SessionHandshake::responder(&mallory).unwrap();
        resp.proof = IdentityProof {
            identity: bob.public().to_b64(),
            signature: URL_SAFE_NO_PAD.encode(bob.sign(&binding_bytes(bob_static.as_bytes()))),
        };

        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        let m1 = init.write_message().unwrap();
        resp.read_message(&m1).unwrap();
        let m2 = resp.write_message().unwrap();

        match init.read_message(&m2) {
            Err(HandshakeError::BadProof(_)) => {}
            other => panic!("expected BadProof, got {other:?}"),
        }
    }

    #[test]
    fn out_of_order_write_fails() {
        let (alice, _) = pair();
        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        init.write_message().unwrap();
        assert!(matches!(
            init.write_message(),
            Err(HandshakeError::InvalidState(_))
        ));
    }

    #[test]
    fn garbled_frame_fails_the_handshake() {
        let (alice, bob) = pair();
        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        let mut resp = SessionHandshake::responder(&bob).unwrap();

        let m1 = init.write_message().unwrap();
        resp.read_message(&m1).unwrap();
        let mut m2 = resp.write_message().unwrap();
        let last = m2.len() - 1;
        m2[last] ^= 0xFF;

        assert!(init.read_message(&m2).is_err());
        assert_eq!(init.state(), SessionState::Failed);
    }

    #[test]
    fn closed_session_refuses_traffic() {
        let (alice, bob) = pair();
        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        let mut resp = SessionHandshake::responder(&bob).unwrap();
        run_handshake(&mut init, &mut resp).unwrap();

        let mut session = init.into_session(false).unwrap();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.encrypt(b"late").is_err());
        assert!(session.decrypt(b"late").is_err());
    }

    #[test]
    fn incomplete_handshake_cannot_become_session() {
        let (alice, _) = pair();
        let mut init = SessionHandshake::initiator(&alice, None).unwrap();
        init.write_message().unwrap();
        assert!(!init.is_complete());
        assert!(init.into_session(false).is_err());
    }
}
