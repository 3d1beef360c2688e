//! `NoiseManager`: one static key, one role, many sessions.
//!
//! The manager performs no I/O and draws no randomness itself; the registry
//! passes session ids and ephemeral secrets in. This keeps every handshake
//! replayable under simulation.

use std::collections::{BTreeMap, HashSet};

use ringlink_crypto::{Handshake, KEY_LEN, public_key_from_secret};
use zeroize::Zeroizing;

use crate::{
    config::NoiseConfig,
    error::SessionError,
    ids::SessionId,
    session::{ManagerRole, NoiseSession, NoiseSessionState, RekeyDirection, SessionInfo, SessionStatus},
};

/// Prologue bound into every ringlink handshake
pub const PROLOGUE: &[u8] = b"ringlink-noise-v1";

/// Output of `initiate` and `accept`: the new session and the message to
/// deliver to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeStep {
    /// Session created by this step
    pub session_id: SessionId,
    /// Handshake message for the peer
    pub message: Vec<u8>,
}

/// Session owner bound to one role and one static key.
pub struct NoiseManager {
    role: ManagerRole,
    static_secret: Zeroizing<[u8; KEY_LEN]>,
    static_public: [u8; KEY_LEN],
    key_id: String,
    device_id: String,
    config: NoiseConfig,
    sessions: BTreeMap<SessionId, NoiseSession>,
    /// Initiator ephemeral keys of every first message accepted so far.
    /// Kept for the manager's lifetime; replay protection ends with it.
    accepted: HashSet<[u8; KEY_LEN]>,
}

impl NoiseManager {
    /// Create a manager around an X25519 static secret.
    pub fn new(
        role: ManagerRole,
        static_secret: [u8; KEY_LEN],
        key_id: impl Into<String>,
        device_id: impl Into<String>,
        config: NoiseConfig,
    ) -> Self {
        let static_public = public_key_from_secret(&static_secret);
        Self {
            role,
            static_secret: Zeroizing::new(static_secret),
            static_public,
            key_id: key_id.into(),
            device_id: device_id.into(),
            config,
            sessions: BTreeMap::new(),
            accepted: HashSet::new(),
        }
    }

    /// Role of this manager.
    pub fn role(&self) -> ManagerRole {
        self.role
    }

    /// Static public key peers must know (servers) or will learn (clients).
    pub fn static_public(&self) -> [u8; KEY_LEN] {
        self.static_public
    }

    /// Key id this manager was created with.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Device id this manager was created with.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Operational configuration.
    pub fn config(&self) -> &NoiseConfig {
        &self.config
    }

    /// Begin an IK handshake toward `peer_static`. Client only.
    pub fn initiate(
        &mut self,
        session_id: SessionId,
        peer_static: &[u8],
        hint: Option<&str>,
        ephemeral_secret: [u8; KEY_LEN],
    ) -> Result<HandshakeStep, SessionError> {
        self.require_role(ManagerRole::Client, "initiate")?;
        let peer: [u8; KEY_LEN] = peer_static.try_into().map_err(|_| SessionError::InvalidPeerKey)?;
        if peer == [0u8; KEY_LEN] {
            return Err(SessionError::InvalidPeerKey);
        }

        let mut handshake = Handshake::new_initiator(&self.static_secret, &peer, PROLOGUE);
        let payload = hint.unwrap_or_default().as_bytes();
        let message = handshake.write_message(payload, ephemeral_secret).map_err(|e| match e {
            ringlink_crypto::CryptoError::BadPublicKey => SessionError::InvalidPeerKey,
            other => other.into(),
        })?;

        self.sessions.insert(session_id, NoiseSession::pending(session_id, handshake, hint.map(str::to_owned)));
        tracing::debug!(session = %session_id, key_id = %self.key_id, "handshake initiated");
        Ok(HandshakeStep { session_id, message })
    }

    /// Process a client's first message and answer it. Server only.
    ///
    /// Each first message is accepted at most once.
    pub fn accept(
        &mut self,
        session_id: SessionId,
        message: &[u8],
        ephemeral_secret: [u8; KEY_LEN],
    ) -> Result<HandshakeStep, SessionError> {
        self.require_role(ManagerRole::Server, "accept")?;

        let mut initiator_ephemeral = [0u8; KEY_LEN];
        let prefix = message.get(..KEY_LEN).ok_or(ringlink_crypto::CryptoError::BadMessage)?;
        initiator_ephemeral.copy_from_slice(prefix);
        if self.accepted.contains(&initiator_ephemeral) {
            return Err(SessionError::DuplicateHandshake);
        }

        let mut handshake = Handshake::new_responder(&self.static_secret, PROLOGUE);
        let payload = handshake.read_message(message)?;
        let response = handshake.write_message(&[], ephemeral_secret)?;
        let transport = handshake.into_transport()?;

        let hint = (!payload.is_empty()).then(|| String::from_utf8_lossy(&payload).into_owned());
        self.accepted.insert(initiator_ephemeral);
        self.sessions.insert(session_id, NoiseSession::awaiting_confirmation(session_id, transport, hint));

        tracing::debug!(session = %session_id, key_id = %self.key_id, "handshake accepted");
        Ok(HandshakeStep { session_id, message: response })
    }

    /// Finish a handshake started by `initiate`. Client only.
    pub fn complete(&mut self, session_id: SessionId, response: &[u8]) -> Result<SessionId, SessionError> {
        self.require_role(ManagerRole::Client, "complete")?;
        self.session_mut(session_id)?.complete(response)?;
        tracing::debug!(session = %session_id, "handshake complete");
        Ok(session_id)
    }

    /// Encrypt one message on a connected session.
    pub fn encrypt(&mut self, session_id: SessionId, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.session_mut(session_id)?.encrypt(plaintext)
    }

    /// Decrypt one message on a connected (or confirming) session.
    pub fn decrypt(&mut self, session_id: SessionId, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.session_mut(session_id)?.decrypt(ciphertext)
    }

    /// Rekey one direction of a session.
    pub fn rekey(&mut self, session_id: SessionId, direction: RekeyDirection) -> Result<(), SessionError> {
        self.session_mut(session_id)?.rekey(direction)
    }

    /// Snapshot a session for persistence.
    pub fn save_state(&self, session_id: SessionId) -> Result<NoiseSessionState, SessionError> {
        self.session(session_id)?.save()
    }

    /// Install a persisted session, replacing any live session with that id.
    ///
    /// Counter checks against previously observed values are the caller's
    /// responsibility (see `SessionRegistry::restore_state`); this only
    /// checks the state against the live session and the manager role.
    pub fn restore_state(&mut self, state: &NoiseSessionState) -> Result<SessionId, SessionError> {
        if state.transport.role != self.role.handshake_role() {
            return Err(SessionError::WrongRole { required: self.role, operation: "restore state" });
        }
        if let Some(live) = self.sessions.get(&state.session_id) {
            check_not_below(state, live.write_counter(), live.read_counter())?;
        }

        self.sessions.insert(state.session_id, NoiseSession::restored(state));
        Ok(state.session_id)
    }

    /// All sessions, ordered by id.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(NoiseSession::info).collect()
    }

    /// Status of one session.
    pub fn status(&self, session_id: SessionId) -> Result<SessionStatus, SessionError> {
        Ok(self.session(session_id)?.status())
    }

    /// Caller-reported connectivity.
    pub fn set_status(&mut self, session_id: SessionId, status: SessionStatus) -> Result<(), SessionError> {
        self.session_mut(session_id)?.set_status(status)
    }

    /// Drop a session, returning its final summary.
    pub fn remove_session(&mut self, session_id: SessionId) -> Result<SessionInfo, SessionError> {
        self.sessions.remove(&session_id).map(|s| s.info()).ok_or(SessionError::SessionNotFound(session_id))
    }

    /// Current `(write, read)` counters of a session.
    pub fn counters(&self, session_id: SessionId) -> Result<(u64, u64), SessionError> {
        let session = self.session(session_id)?;
        Ok((session.write_counter(), session.read_counter()))
    }

    /// True if a session id is already in use.
    pub fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }

    fn session(&self, session_id: SessionId) -> Result<&NoiseSession, SessionError> {
        self.sessions.get(&session_id).ok_or(SessionError::SessionNotFound(session_id))
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut NoiseSession, SessionError> {
        self.sessions.get_mut(&session_id).ok_or(SessionError::SessionNotFound(session_id))
    }

    fn require_role(&self, required: ManagerRole, operation: &'static str) -> Result<(), SessionError> {
        if self.role != required {
            return Err(SessionError::WrongRole { required, operation });
        }
        Ok(())
    }
}

/// Reject `state` if either counter is below the given watermark.
pub(crate) fn check_not_below(state: &NoiseSessionState, write: u64, read: u64) -> Result<(), SessionError> {
    if state.write_counter() < write {
        return Err(SessionError::CounterRegression {
            session_id: state.session_id,
            counter: "write",
            watermark: write,
            attempted: state.write_counter(),
        });
    }
    if state.read_counter() < read {
        return Err(SessionError::CounterRegression {
            session_id: state.session_id,
            counter: "read",
            watermark: read,
            attempted: state.read_counter(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_SECRET: [u8; KEY_LEN] = [0x21; KEY_LEN];
    const SERVER_SECRET: [u8; KEY_LEN] = [0x42; KEY_LEN];

    fn sid(n: u128) -> SessionId {
        SessionId::from_u128(n)
    }

    fn managers() -> (NoiseManager, NoiseManager) {
        (
            NoiseManager::new(ManagerRole::Client, CLIENT_SECRET, "kid", "device123", NoiseConfig::default()),
            NoiseManager::new(ManagerRole::Server, SERVER_SECRET, "kid", "server", NoiseConfig::default()),
        )
    }

    fn connect(client: &mut NoiseManager, server: &mut NoiseManager) -> (SessionId, SessionId) {
        let server_pub = server.static_public();
        let first = client.initiate(sid(1), &server_pub, Some("relay-a"), [0x01; KEY_LEN]).unwrap();
        let reply = server.accept(sid(2), &first.message, [0x02; KEY_LEN]).unwrap();
        client.complete(first.session_id, &reply.message).unwrap();
        (first.session_id, reply.session_id)
    }

    #[test]
    fn full_handshake_connects_after_confirmation() {
        let (mut client, mut server) = managers();
        let (c, s) = connect(&mut client, &mut server);

        assert_eq!(client.status(c).unwrap(), SessionStatus::Connected);
        assert_eq!(server.status(s).unwrap(), SessionStatus::Handshaking);
        assert!(matches!(server.encrypt(s, b"early"), Err(SessionError::NotConnected(_))));

        let ct = client.encrypt(c, b"hello").unwrap();
        assert_eq!(server.decrypt(s, &ct).unwrap(), b"hello");
        assert_eq!(server.status(s).unwrap(), SessionStatus::Connected);

        let info = &server.list_sessions()[0];
        assert_eq!(info.peer_hint.as_deref(), Some("relay-a"));
        assert_eq!(info.peer_static, Some(client.static_public()));
    }

    #[test]
    fn roles_are_enforced() {
        let (mut client, mut server) = managers();
        assert!(matches!(
            server.initiate(sid(1), &[7u8; KEY_LEN], None, [1; KEY_LEN]),
            Err(SessionError::WrongRole { required: ManagerRole::Client, .. })
        ));
        assert!(matches!(
            client.accept(sid(1), &[0u8; 96], [1; KEY_LEN]),
            Err(SessionError::WrongRole { required: ManagerRole::Server, .. })
        ));
        assert!(matches!(
            server.complete(sid(1), &[0u8; 48]),
            Err(SessionError::WrongRole { required: ManagerRole::Client, .. })
        ));
    }

    #[test]
    fn malformed_peer_key_is_rejected() {
        let (mut client, _) = managers();
        assert_eq!(client.initiate(sid(1), &[1u8; 31], None, [1; KEY_LEN]), Err(SessionError::InvalidPeerKey));
        assert_eq!(client.initiate(sid(1), &[0u8; 32], None, [1; KEY_LEN]), Err(SessionError::InvalidPeerKey));
        assert!(client.list_sessions().is_empty());
    }

    #[test]
    fn first_message_is_accepted_once() {
        let (mut client, mut server) = managers();
        let first = client.initiate(sid(1), &server.static_public(), None, [0x01; KEY_LEN]).unwrap();

        server.accept(sid(2), &first.message, [0x02; KEY_LEN]).unwrap();
        assert_eq!(server.accept(sid(3), &first.message, [0x03; KEY_LEN]), Err(SessionError::DuplicateHandshake));
    }

    #[test]
    fn complete_is_only_for_pending_sessions() {
        let (mut client, mut server) = managers();
        let (c, _) = connect(&mut client, &mut server);
        assert!(matches!(client.complete(c, &[0u8; 48]), Err(SessionError::InvalidState { .. })));
        assert_eq!(client.complete(sid(99), &[0u8; 48]), Err(SessionError::SessionNotFound(sid(99))));
    }

    #[test]
    fn bad_response_moves_session_to_error() {
        let (mut client, server) = managers();
        let first = client.initiate(sid(1), &server.static_public(), None, [0x01; KEY_LEN]).unwrap();

        assert!(client.complete(first.session_id, &[0u8; 48]).is_err());
        assert_eq!(client.status(first.session_id).unwrap(), SessionStatus::Error);
    }

    #[test]
    fn tampered_ciphertext_moves_session_to_error() {
        let (mut client, mut server) = managers();
        let (c, s) = connect(&mut client, &mut server);

        let mut ct = client.encrypt(c, b"hello").unwrap();
        ct[0] ^= 1;
        assert!(server.decrypt(s, &ct).is_err());
        assert_eq!(server.status(s).unwrap(), SessionStatus::Error);
    }

    #[test]
    fn status_hints_only_apply_to_established_sessions() {
        let (mut client, mut server) = managers();
        let (c, s) = connect(&mut client, &mut server);

        client.set_status(c, SessionStatus::Reconnecting).unwrap();
        assert!(matches!(client.encrypt(c, b"x"), Err(SessionError::NotConnected(_))));
        client.set_status(c, SessionStatus::Connected).unwrap();
        client.encrypt(c, b"x").unwrap();

        assert!(server.set_status(s, SessionStatus::Connected).is_err());
        assert!(client.set_status(c, SessionStatus::Handshaking).is_err());
    }

    #[test]
    fn restore_rejects_live_regression() {
        let (mut client, mut server) = managers();
        let (c, _) = connect(&mut client, &mut server);

        let saved = client.save_state(c).unwrap();
        client.encrypt(c, b"one").unwrap();

        assert!(matches!(
            client.restore_state(&saved),
            Err(SessionError::CounterRegression { counter: "write", watermark: 1, attempted: 0, .. })
        ));
    }

    #[test]
    fn restore_rejects_foreign_role() {
        let (mut client, mut server) = managers();
        let (c, _) = connect(&mut client, &mut server);
        let saved = client.save_state(c).unwrap();

        assert!(matches!(server.restore_state(&saved), Err(SessionError::WrongRole { .. })));
    }

    #[test]
    fn rekey_in_both_directions_keeps_channel() {
        let (mut client, mut server) = managers();
        let (c, s) = connect(&mut client, &mut server);

        client.rekey(c, RekeyDirection::Send).unwrap();
        server.rekey(s, RekeyDirection::Receive).unwrap();

        let ct = client.encrypt(c, b"after rekey").unwrap();
        assert_eq!(server.decrypt(s, &ct).unwrap(), b"after rekey");
        assert_eq!(client.list_sessions()[0].write_counter, 1);
    }

    #[test]
    fn remove_session_forgets_it() {
        let (mut client, mut server) = managers();
        let (c, _) = connect(&mut client, &mut server);

        let info = client.remove_session(c).unwrap();
        assert_eq!(info.status, SessionStatus::Connected);
        assert_eq!(client.status(c), Err(SessionError::SessionNotFound(c)));
    }
}
