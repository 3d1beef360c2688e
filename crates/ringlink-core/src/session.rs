//! A single Noise session and its persisted form.
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────┐ initiate/accept ┌─────────────┐ complete / first decrypt ┌───────────┐
//! │ Uninitialized │────────────────>│ Handshaking │─────────────────────────>│ Connected │
//! └───────────────┘                 └─────────────┘                          └───────────┘
//!                                          │ bad response                     │   ⇅ set_status
//!                                          ↓                                  │ Reconnecting
//!                                     ┌───────┐       transport error         │ Disconnected
//!                                     │ Error │<──────────────────────────────┘
//!                                     └───────┘
//! ```
//!
//! `Connected`, `Reconnecting` and `Disconnected` are connectivity hints set
//! by the caller; only `Connected` permits transport operations.

use ringlink_crypto::{CryptoError, Handshake, HandshakeRole, TransportSnapshot, TransportState};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::SessionError, ids::SessionId};

/// Role of a manager and all sessions it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagerRole {
    /// Initiates IK handshakes toward a known server key
    Client,
    /// Accepts IK handshakes from any client
    Server,
}

impl ManagerRole {
    /// Noise handshake role used by sessions of this manager.
    pub fn handshake_role(self) -> HandshakeRole {
        match self {
            Self::Client => HandshakeRole::Initiator,
            Self::Server => HandshakeRole::Responder,
        }
    }
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Handshake in progress, or awaiting key confirmation on the server
    Handshaking,
    /// Transport ready
    Connected,
    /// Caller reports the link is being re-established
    Reconnecting,
    /// Caller reports the link is down
    Disconnected,
    /// Handshake or transport failure; terminal
    Error,
}

/// Rekey target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyDirection {
    /// Cipher used by `encrypt`
    Send,
    /// Cipher used by `decrypt`
    Receive,
}

enum Channel {
    /// Client waiting for the responder's message
    Pending(Box<Handshake>),
    /// Handshake split into transport ciphers
    Transport(TransportState),
    /// Handshake failed; no key material retained
    Failed,
}

/// One Noise session owned by a manager.
pub struct NoiseSession {
    id: SessionId,
    status: SessionStatus,
    peer_hint: Option<String>,
    channel: Channel,
}

/// Read-only summary of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id
    pub session_id: SessionId,
    /// Current status
    pub status: SessionStatus,
    /// Peer static public key, once authenticated by the handshake
    pub peer_static: Option<[u8; 32]>,
    /// Messages encrypted
    pub write_counter: u64,
    /// Messages decrypted
    pub read_counter: u64,
    /// Opaque hint the client attached to its first message
    pub peer_hint: Option<String>,
}

impl NoiseSession {
    pub(crate) fn pending(id: SessionId, handshake: Handshake, peer_hint: Option<String>) -> Self {
        Self { id, status: SessionStatus::Handshaking, peer_hint, channel: Channel::Pending(Box::new(handshake)) }
    }

    /// Server-side session; stays `Handshaking` until the first decrypt
    /// confirms the client holds the transport keys.
    pub(crate) fn awaiting_confirmation(id: SessionId, transport: TransportState, peer_hint: Option<String>) -> Self {
        Self { id, status: SessionStatus::Handshaking, peer_hint, channel: Channel::Transport(transport) }
    }

    pub(crate) fn restored(state: &NoiseSessionState) -> Self {
        Self {
            id: state.session_id,
            status: state.status,
            peer_hint: state.peer_hint.clone(),
            channel: Channel::Transport(TransportState::from_snapshot(&state.transport)),
        }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Messages encrypted so far (0 before the handshake completes).
    pub fn write_counter(&self) -> u64 {
        match &self.channel {
            Channel::Transport(t) => t.send_counter(),
            _ => 0,
        }
    }

    /// Messages decrypted so far.
    pub fn read_counter(&self) -> u64 {
        match &self.channel {
            Channel::Transport(t) => t.recv_counter(),
            _ => 0,
        }
    }

    /// Summary of this session.
    pub fn info(&self) -> SessionInfo {
        let peer_static = match &self.channel {
            Channel::Transport(t) => Some(*t.remote_static()),
            Channel::Pending(h) => h.remote_static(),
            Channel::Failed => None,
        };
        SessionInfo {
            session_id: self.id,
            status: self.status,
            peer_static,
            write_counter: self.write_counter(),
            read_counter: self.read_counter(),
            peer_hint: self.peer_hint.clone(),
        }
    }

    /// Finish a client handshake with the responder's message.
    pub(crate) fn complete(&mut self, response: &[u8]) -> Result<(), SessionError> {
        let Channel::Pending(handshake) = &mut self.channel else {
            return Err(SessionError::InvalidState { status: self.status, operation: "complete" });
        };

        if let Err(e) = handshake.read_message(response) {
            self.fail();
            return Err(e.into());
        }

        let Channel::Pending(handshake) = std::mem::replace(&mut self.channel, Channel::Failed) else {
            return Err(SessionError::InvalidState { status: self.status, operation: "complete" });
        };
        match (*handshake).into_transport() {
            Ok(transport) => {
                self.channel = Channel::Transport(transport);
                self.status = SessionStatus::Connected;
                Ok(())
            },
            Err(e) => {
                self.fail();
                Err(e.into())
            },
        }
    }

    pub(crate) fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        if self.status != SessionStatus::Connected {
            return Err(SessionError::NotConnected(self.id));
        }
        let Channel::Transport(transport) = &mut self.channel else {
            return Err(SessionError::NotConnected(self.id));
        };

        match transport.encrypt(plaintext) {
            Ok(ciphertext) => Ok(ciphertext),
            Err(CryptoError::NonceExhausted) => {
                self.fail();
                Err(CryptoError::NonceExhausted.into())
            },
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let confirming = self.status == SessionStatus::Handshaking;
        if self.status != SessionStatus::Connected && !confirming {
            return Err(SessionError::NotConnected(self.id));
        }
        let Channel::Transport(transport) = &mut self.channel else {
            return Err(SessionError::NotConnected(self.id));
        };

        match transport.decrypt(ciphertext) {
            Ok(plaintext) => {
                if confirming {
                    tracing::debug!(session = %self.id, "key confirmation received");
                    self.status = SessionStatus::Connected;
                }
                Ok(plaintext)
            },
            Err(CryptoError::BadMessage) => Err(CryptoError::BadMessage.into()),
            Err(e) => {
                self.fail();
                Err(e.into())
            },
        }
    }

    pub(crate) fn rekey(&mut self, direction: RekeyDirection) -> Result<(), SessionError> {
        let Channel::Transport(transport) = &mut self.channel else {
            return Err(SessionError::InvalidState { status: self.status, operation: "rekey" });
        };
        match direction {
            RekeyDirection::Send => transport.rekey_send()?,
            RekeyDirection::Receive => transport.rekey_recv()?,
        }
        Ok(())
    }

    /// Caller-reported connectivity. Only valid once the handshake has
    /// finished and before any failure.
    pub(crate) fn set_status(&mut self, status: SessionStatus) -> Result<(), SessionError> {
        let settable = matches!(
            status,
            SessionStatus::Connected | SessionStatus::Reconnecting | SessionStatus::Disconnected
        );
        let established = matches!(
            self.status,
            SessionStatus::Connected | SessionStatus::Reconnecting | SessionStatus::Disconnected
        );
        if !settable || !established {
            return Err(SessionError::InvalidState { status: self.status, operation: "set status" });
        }
        self.status = status;
        Ok(())
    }

    pub(crate) fn save(&self) -> Result<NoiseSessionState, SessionError> {
        let Channel::Transport(transport) = &self.channel else {
            return Err(SessionError::InvalidState { status: self.status, operation: "save state" });
        };
        Ok(NoiseSessionState {
            session_id: self.id,
            status: self.status,
            peer_hint: self.peer_hint.clone(),
            transport: transport.snapshot(),
        })
    }

    fn fail(&mut self) {
        tracing::warn!(session = %self.id, "session moved to error state");
        self.status = SessionStatus::Error;
        self.channel = Channel::Failed;
    }
}

/// Persisted session: status, counters and live transport keys.
///
/// Encoded with CBOR. Contains secret key material; zeroized on drop and
/// redacted from `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct NoiseSessionState {
    /// Session id
    #[zeroize(skip)]
    pub session_id: SessionId,
    /// Status at save time
    #[zeroize(skip)]
    pub status: SessionStatus,
    /// Client hint recorded at handshake time
    pub peer_hint: Option<String>,
    /// Transport keys and counters
    pub transport: TransportSnapshot,
}

impl NoiseSessionState {
    /// Messages encrypted at save time.
    pub fn write_counter(&self) -> u64 {
        self.transport.send_counter
    }

    /// Messages decrypted at save time.
    pub fn read_counter(&self) -> u64 {
        self.transport.recv_counter
    }

    /// Encode as CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| SessionError::Encoding(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        ciborium::from_reader(bytes).map_err(|e| SessionError::Encoding(e.to_string()))
    }
}

impl std::fmt::Debug for NoiseSessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSessionState")
            .field("session_id", &self.session_id)
            .field("status", &self.status)
            .field("write_counter", &self.write_counter())
            .field("read_counter", &self.read_counter())
            .finish_non_exhaustive()
    }
}
