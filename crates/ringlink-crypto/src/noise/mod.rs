//! `Noise_IK_25519_ChaChaPoly_SHA256`
//!
//! A caller-driven implementation of the IK pattern: the initiator knows the
//! responder's static key in advance, both static keys are authenticated
//! after two messages, and the completed handshake splits into a pair of
//! transport ciphers.
//!
//! Randomness is supplied per call ([`Handshake::write_message`] takes the
//! ephemeral secret), so handshakes replay exactly under simulation.

mod cipher;
mod handshake;
mod symmetric;
mod transport;

pub use handshake::{Handshake, HandshakeRole};
pub use transport::{TransportSnapshot, TransportState};

/// Largest handshake or transport message, in bytes
pub const MAX_MESSAGE_LEN: usize = 65535;
