//! Post-handshake transport ciphers

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{MAX_MESSAGE_LEN, cipher::CipherState, cipher::TAG_LEN, handshake::HandshakeRole};
use crate::{CryptoError, keys::KEY_LEN};

/// Send and receive ciphers of an established session.
///
/// Counters equal the number of messages sent or successfully received, and
/// double as the AEAD nonces.
pub struct TransportState {
    role: HandshakeRole,
    send: CipherState,
    recv: CipherState,
    handshake_hash: [u8; 32],
    remote_static: [u8; KEY_LEN],
}

impl Drop for TransportState {
    fn drop(&mut self) {
        self.handshake_hash.zeroize();
    }
}

/// Serializable copy of a [`TransportState`], used to persist and restore a
/// session. Contains live key material; zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TransportSnapshot {
    /// Role this side played in the handshake
    #[zeroize(skip)]
    pub role: HandshakeRole,
    /// Sending key
    pub send_key: [u8; KEY_LEN],
    /// Messages sent so far
    pub send_counter: u64,
    /// Receiving key
    pub recv_key: [u8; KEY_LEN],
    /// Messages received so far
    pub recv_counter: u64,
    /// Final handshake hash (channel binding)
    pub handshake_hash: [u8; 32],
    /// Peer static public key
    pub remote_static: [u8; KEY_LEN],
}

impl std::fmt::Debug for TransportSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSnapshot")
            .field("role", &self.role)
            .field("send_counter", &self.send_counter)
            .field("recv_counter", &self.recv_counter)
            .finish_non_exhaustive()
    }
}

impl TransportState {
    pub(crate) fn new(
        role: HandshakeRole,
        send_key: [u8; KEY_LEN],
        recv_key: [u8; KEY_LEN],
        handshake_hash: [u8; 32],
        remote_static: [u8; KEY_LEN],
    ) -> Self {
        Self {
            role,
            send: CipherState::with_nonce(send_key, 0),
            recv: CipherState::with_nonce(recv_key, 0),
            handshake_hash,
            remote_static,
        }
    }

    /// Rebuild transport ciphers from a snapshot.
    pub fn from_snapshot(snapshot: &TransportSnapshot) -> Self {
        Self {
            role: snapshot.role,
            send: CipherState::with_nonce(snapshot.send_key, snapshot.send_counter),
            recv: CipherState::with_nonce(snapshot.recv_key, snapshot.recv_counter),
            handshake_hash: snapshot.handshake_hash,
            remote_static: snapshot.remote_static,
        }
    }

    /// Capture keys and counters for persistence.
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            role: self.role,
            send_key: self.send.key().copied().unwrap_or_default(),
            send_counter: self.send.nonce(),
            recv_key: self.recv.key().copied().unwrap_or_default(),
            recv_counter: self.recv.nonce(),
            handshake_hash: self.handshake_hash,
            remote_static: self.remote_static,
        }
    }

    /// Encrypt a message for the peer and advance the send counter.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() + TAG_LEN > MAX_MESSAGE_LEN {
            return Err(CryptoError::BadMessage);
        }
        self.send.encrypt_with_ad(&[], plaintext)
    }

    /// Decrypt a message from the peer.
    ///
    /// The receive counter advances only when authentication succeeds.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() > MAX_MESSAGE_LEN {
            return Err(CryptoError::BadMessage);
        }
        self.recv.decrypt_with_ad(&[], ciphertext)
    }

    /// Replace the sending key with `REKEY(k)`. Counters are unchanged.
    pub fn rekey_send(&mut self) -> Result<(), CryptoError> {
        self.send.rekey()
    }

    /// Replace the receiving key with `REKEY(k)`.
    pub fn rekey_recv(&mut self) -> Result<(), CryptoError> {
        self.recv.rekey()
    }

    /// Messages encrypted so far.
    pub fn send_counter(&self) -> u64 {
        self.send.nonce()
    }

    /// Messages successfully decrypted so far.
    pub fn recv_counter(&self) -> u64 {
        self.recv.nonce()
    }

    /// Channel binding value, equal on both sides.
    pub fn handshake_hash(&self) -> &[u8; 32] {
        &self.handshake_hash
    }

    /// Peer static public key.
    pub fn remote_static(&self) -> &[u8; KEY_LEN] {
        &self.remote_static
    }

    /// Role this side played in the handshake.
    pub fn role(&self) -> HandshakeRole {
        self.role
    }
}
