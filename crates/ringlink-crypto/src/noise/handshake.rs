//! IK handshake state machine
//!
//! ```text
//! IK:
//!   <- s
//!   ...
//!   -> e, es, s, ss
//!   <- e, ee, se
//! ```
//!
//! Message 1 layout: `[e (32)][enc(s) (32+16)][enc(payload) (N+16)]`
//! Message 2 layout: `[e (32)][enc(payload) (N+16)]`

use zeroize::{Zeroize, Zeroizing};

use super::{
    MAX_MESSAGE_LEN,
    cipher::TAG_LEN,
    symmetric::{PROTOCOL_NAME, SymmetricState},
    transport::TransportState,
};
use crate::{
    CryptoError,
    keys::{KEY_LEN, dh, generate_keypair, public_key_from_secret},
};

/// Which side of the handshake this state machine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HandshakeRole {
    /// Knows the responder's static key up front and sends the first message
    Initiator,
    /// Learns the initiator's static key from the first message
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    InitiatorWriteMsg1,
    InitiatorReadMsg2,
    ResponderReadMsg1,
    ResponderWriteMsg2,
    Complete,
    Failed,
}

/// A `Noise_IK_25519_ChaChaPoly_SHA256` handshake.
///
/// Ephemeral secrets are passed into [`Handshake::write_message`] so the
/// handshake is deterministic under test. Any read error poisons the state;
/// a new handshake must be started.
pub struct Handshake {
    symmetric: SymmetricState,
    phase: Phase,
    role: HandshakeRole,
    s: Zeroizing<[u8; KEY_LEN]>,
    s_pub: [u8; KEY_LEN],
    rs: Option<[u8; KEY_LEN]>,
    e: Option<Zeroizing<[u8; KEY_LEN]>>,
    re: Option<[u8; KEY_LEN]>,
}

impl Drop for Handshake {
    fn drop(&mut self) {
        self.s_pub.zeroize();
        self.rs.zeroize();
        self.re.zeroize();
    }
}

impl Handshake {
    /// Start a handshake as initiator toward a known responder key.
    ///
    /// Both sides must use the same `prologue`.
    pub fn new_initiator(local_secret: &[u8; KEY_LEN], remote_public: &[u8; KEY_LEN], prologue: &[u8]) -> Self {
        let mut symmetric = SymmetricState::initialize(PROTOCOL_NAME);
        symmetric.mix_hash(prologue);
        // <- s
        symmetric.mix_hash(remote_public);

        Self {
            symmetric,
            phase: Phase::InitiatorWriteMsg1,
            role: HandshakeRole::Initiator,
            s: Zeroizing::new(*local_secret),
            s_pub: public_key_from_secret(local_secret),
            rs: Some(*remote_public),
            e: None,
            re: None,
        }
    }

    /// Start a handshake as responder.
    pub fn new_responder(local_secret: &[u8; KEY_LEN], prologue: &[u8]) -> Self {
        let s_pub = public_key_from_secret(local_secret);
        let mut symmetric = SymmetricState::initialize(PROTOCOL_NAME);
        symmetric.mix_hash(prologue);
        // <- s
        symmetric.mix_hash(&s_pub);

        Self {
            symmetric,
            phase: Phase::ResponderReadMsg1,
            role: HandshakeRole::Responder,
            s: Zeroizing::new(*local_secret),
            s_pub,
            rs: None,
            e: None,
            re: None,
        }
    }

    /// Role of this side.
    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    /// True once both messages have been processed.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// True if this side writes the next message.
    pub fn is_my_turn(&self) -> bool {
        matches!(self.phase, Phase::InitiatorWriteMsg1 | Phase::ResponderWriteMsg2)
    }

    /// Peer static key: configured for an initiator, learned by a responder.
    pub fn remote_static(&self) -> Option<[u8; KEY_LEN]> {
        self.rs
    }

    /// Current handshake hash.
    pub fn handshake_hash(&self) -> [u8; 32] {
        *self.symmetric.handshake_hash()
    }

    /// Produce the next handshake message carrying `payload`.
    ///
    /// `ephemeral_secret` MUST come from a CSPRNG.
    pub fn write_message(&mut self, payload: &[u8], ephemeral_secret: [u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
        let result = match self.phase {
            Phase::InitiatorWriteMsg1 => self.write_msg1(payload, ephemeral_secret),
            Phase::ResponderWriteMsg2 => self.write_msg2(payload, ephemeral_secret),
            _ => return Err(CryptoError::WrongState),
        };
        self.poison_on_error(result)
    }

    /// Process the peer's handshake message, returning its payload.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if message.len() > MAX_MESSAGE_LEN {
            self.phase = Phase::Failed;
            return Err(CryptoError::BadMessage);
        }

        let result = match self.phase {
            Phase::ResponderReadMsg1 => self.read_msg1(message),
            Phase::InitiatorReadMsg2 => self.read_msg2(message),
            _ => return Err(CryptoError::WrongState),
        };
        self.poison_on_error(result)
    }

    /// Split a completed handshake into transport ciphers.
    ///
    /// The initiator sends with the first key, the responder receives with it.
    pub fn into_transport(self) -> Result<TransportState, CryptoError> {
        if self.phase != Phase::Complete {
            return Err(CryptoError::WrongState);
        }

        let remote_static = self.rs.ok_or(CryptoError::WrongState)?;
        let (k1, k2, h) = self.symmetric.split();
        let (send, recv) = match self.role {
            HandshakeRole::Initiator => (k1, k2),
            HandshakeRole::Responder => (k2, k1),
        };
        Ok(TransportState::new(self.role, *send, *recv, h, remote_static))
    }

    fn poison_on_error(&mut self, result: Result<Vec<u8>, CryptoError>) -> Result<Vec<u8>, CryptoError> {
        if result.is_err() {
            self.phase = Phase::Failed;
        }
        result
    }

    fn check_payload_len(payload: &[u8], overhead: usize) -> Result<(), CryptoError> {
        if payload.len() + overhead > MAX_MESSAGE_LEN {
            return Err(CryptoError::BadMessage);
        }
        Ok(())
    }

    // -> e, es, s, ss
    fn write_msg1(&mut self, payload: &[u8], ephemeral_secret: [u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
        Self::check_payload_len(payload, KEY_LEN + KEY_LEN + 2 * TAG_LEN)?;
        let rs = self.rs.ok_or(CryptoError::WrongState)?;

        let (e, e_pub) = generate_keypair(ephemeral_secret);
        let mut out = Vec::with_capacity(KEY_LEN * 2 + 2 * TAG_LEN + payload.len());
        out.extend_from_slice(&e_pub);
        self.symmetric.mix_hash(&e_pub);

        self.symmetric.mix_key(&*dh(&e, &rs)?);

        let s_pub = self.s_pub;
        out.extend_from_slice(&self.symmetric.encrypt_and_hash(&s_pub)?);

        self.symmetric.mix_key(&*dh(&self.s, &rs)?);

        out.extend_from_slice(&self.symmetric.encrypt_and_hash(payload)?);

        self.e = Some(e);
        self.phase = Phase::InitiatorReadMsg2;
        Ok(out)
    }

    fn read_msg1(&mut self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let encrypted_s_len = KEY_LEN + TAG_LEN;
        if message.len() < KEY_LEN + encrypted_s_len + TAG_LEN {
            return Err(CryptoError::BadMessage);
        }
        let (re_bytes, rest) = message.split_at(KEY_LEN);
        let (encrypted_s, encrypted_payload) = rest.split_at(encrypted_s_len);

        let mut re = [0u8; KEY_LEN];
        re.copy_from_slice(re_bytes);
        self.symmetric.mix_hash(&re);

        self.symmetric.mix_key(&*dh(&self.s, &re)?);

        let rs_bytes = self.symmetric.decrypt_and_hash(encrypted_s)?;
        let mut rs = [0u8; KEY_LEN];
        rs.copy_from_slice(&rs_bytes);

        self.symmetric.mix_key(&*dh(&self.s, &rs)?);

        let payload = self.symmetric.decrypt_and_hash(encrypted_payload)?;

        self.re = Some(re);
        self.rs = Some(rs);
        self.phase = Phase::ResponderWriteMsg2;
        Ok(payload)
    }

    // <- e, ee, se
    fn write_msg2(&mut self, payload: &[u8], ephemeral_secret: [u8; KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
        Self::check_payload_len(payload, KEY_LEN + TAG_LEN)?;
        let re = self.re.ok_or(CryptoError::WrongState)?;
        let rs = self.rs.ok_or(CryptoError::WrongState)?;

        let (e, e_pub) = generate_keypair(ephemeral_secret);
        let mut out = Vec::with_capacity(KEY_LEN + TAG_LEN + payload.len());
        out.extend_from_slice(&e_pub);
        self.symmetric.mix_hash(&e_pub);

        self.symmetric.mix_key(&*dh(&e, &re)?);
        self.symmetric.mix_key(&*dh(&e, &rs)?);

        out.extend_from_slice(&self.symmetric.encrypt_and_hash(payload)?);

        self.e = Some(e);
        self.phase = Phase::Complete;
        Ok(out)
    }

    fn read_msg2(&mut self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if message.len() < KEY_LEN + TAG_LEN {
            return Err(CryptoError::BadMessage);
        }
        let (re_bytes, encrypted_payload) = message.split_at(KEY_LEN);
        let e = self.e.as_ref().ok_or(CryptoError::WrongState)?;

        let mut re = [0u8; KEY_LEN];
        re.copy_from_slice(re_bytes);
        self.symmetric.mix_hash(&re);

        let ee = dh(e, &re)?;
        self.symmetric.mix_key(&*ee);
        self.symmetric.mix_key(&*dh(&self.s, &re)?);

        let payload = self.symmetric.decrypt_and_hash(encrypted_payload)?;

        self.re = Some(re);
        self.phase = Phase::Complete;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIATOR: [u8; KEY_LEN] = [0x01; KEY_LEN];
    const RESPONDER: [u8; KEY_LEN] = [0x02; KEY_LEN];

    fn pair() -> (Handshake, Handshake) {
        let responder_pub = public_key_from_secret(&RESPONDER);
        (
            Handshake::new_initiator(&INITIATOR, &responder_pub, b"prologue"),
            Handshake::new_responder(&RESPONDER, b"prologue"),
        )
    }

    #[test]
    fn message_sizes_match_pattern_overhead() {
        let (mut initiator, mut responder) = pair();

        let msg1 = initiator.write_message(b"hello", [0x11; KEY_LEN]).unwrap();
        assert_eq!(msg1.len(), 96 + 5);

        responder.read_message(&msg1).unwrap();
        let msg2 = responder.write_message(b"", [0x22; KEY_LEN]).unwrap();
        assert_eq!(msg2.len(), 48);
    }

    #[test]
    fn payloads_are_delivered_and_hashes_agree() {
        let (mut initiator, mut responder) = pair();

        let msg1 = initiator.write_message(b"from initiator", [0x11; KEY_LEN]).unwrap();
        assert_eq!(responder.read_message(&msg1).unwrap(), b"from initiator");
        assert_eq!(responder.remote_static(), Some(public_key_from_secret(&INITIATOR)));

        let msg2 = responder.write_message(b"from responder", [0x22; KEY_LEN]).unwrap();
        assert_eq!(initiator.read_message(&msg2).unwrap(), b"from responder");

        assert!(initiator.is_complete());
        assert!(responder.is_complete());
        assert_eq!(initiator.handshake_hash(), responder.handshake_hash());
    }

    #[test]
    fn mismatched_prologue_fails() {
        let responder_pub = public_key_from_secret(&RESPONDER);
        let mut initiator = Handshake::new_initiator(&INITIATOR, &responder_pub, b"one");
        let mut responder = Handshake::new_responder(&RESPONDER, b"two");

        let msg1 = initiator.write_message(b"", [0x11; KEY_LEN]).unwrap();
        assert_eq!(responder.read_message(&msg1), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn wrong_responder_key_fails() {
        let other_pub = public_key_from_secret(&[0x03; KEY_LEN]);
        let mut initiator = Handshake::new_initiator(&INITIATOR, &other_pub, b"");
        let mut responder = Handshake::new_responder(&RESPONDER, b"");

        let msg1 = initiator.write_message(b"", [0x11; KEY_LEN]).unwrap();
        assert_eq!(responder.read_message(&msg1), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn out_of_turn_operations_are_rejected() {
        let (mut initiator, mut responder) = pair();
        assert_eq!(initiator.read_message(&[0u8; 64]), Err(CryptoError::WrongState));
        assert_eq!(responder.write_message(b"", [0x22; KEY_LEN]), Err(CryptoError::WrongState));
        assert!(initiator.is_my_turn());
        assert!(!responder.is_my_turn());
    }

    #[test]
    fn truncated_message_poisons_handshake() {
        let (_, mut responder) = pair();
        assert_eq!(responder.read_message(&[0u8; 10]), Err(CryptoError::BadMessage));
        assert_eq!(responder.read_message(&[0u8; 200]), Err(CryptoError::WrongState));
    }

    #[test]
    fn incomplete_handshake_cannot_split() {
        let (initiator, _) = pair();
        assert!(matches!(initiator.into_transport(), Err(CryptoError::WrongState)));
    }
}
