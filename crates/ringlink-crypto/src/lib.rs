//! ringlink Cryptographic Primitives
//!
//! Cryptographic building blocks for the ringlink handoff protocol and its
//! Noise sessions. Pure functions with deterministic outputs. Callers provide
//! random bytes so that every operation can be replayed in tests.
//!
//! # Key Lifecycle
//!
//! The identity holder owns one long-term secret. Everything shipped to a
//! consumer app is derived from it per device and per epoch, so handing off a
//! session never exposes the long-term secret itself.
//!
//! ```text
//! Long-term secret (32 bytes)
//!        │
//!        ├── HKDF(device_id, epoch) → Noise static keypair (per epoch)
//!        │
//!        └── HKDF(device_id)        → Noise seed (consumer derives later epochs)
//!
//! Handoff payload
//!        │
//!        ▼
//! X25519(ephemeral, recipient) → HKDF → XChaCha20-Poly1305(aad) → Sealed envelope
//! ```
//!
//! # Security
//!
//! Sealed envelopes:
//! - A fresh sender ephemeral key per envelope (forward secrecy per handoff)
//! - AAD binds the envelope to its storage path, owner and request id
//! - The purpose tag is mixed into the key schedule, so a purpose swap fails
//!   authentication
//!
//! Noise sessions:
//! - `Noise_IK_25519_ChaChaPoly_SHA256`, mutual static-key authentication
//! - Transport nonces are the session's write/read counters and never repeat
//! - All secret material is zeroized on drop

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod kdf;
pub mod keys;
pub mod mnemonic;
pub mod noise;
pub mod sealed;

pub use error::CryptoError;
pub use kdf::{NoiseKeypair, derive_key, derive_noise_keypair, derive_noise_seed};
pub use keys::{
    IdentityKey, KEY_LEN, decode_key_hex, generate_keypair, public_key_from_secret,
    verify_signature,
};
pub use mnemonic::{
    is_recovery_phrase, is_secret_key_hex, secret_from_import, secret_from_recovery_phrase,
};
pub use noise::{Handshake, HandshakeRole, MAX_MESSAGE_LEN, TransportSnapshot, TransportState};
pub use sealed::{
    ENVELOPE_VERSION, NONCE_LEN, SealedEnvelope, is_sealed_envelope, open, seal,
};
