//! Error types for ringlink cryptographic operations

use thiserror::Error;

/// Errors from key derivation, sealing and Noise operations.
///
/// Variants never carry key material or plaintext. Callers may log them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material has the wrong length or encoding
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// Key material is not valid hex
    #[error("invalid key encoding")]
    InvalidKeyEncoding,

    /// Public key is a low-order point (all-zero shared secret)
    #[error("invalid public key")]
    BadPublicKey,

    /// AEAD tag did not verify: wrong key, wrong AAD, or tampered data
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Envelope bytes are not a well-formed sealed envelope
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What was wrong with the envelope
        reason: &'static str,
    },

    /// Envelope uses a format version this build does not understand
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// Handshake or transport message is truncated or oversized
    #[error("malformed message")]
    BadMessage,

    /// Operation is not valid in the current handshake phase
    #[error("operation not valid in current handshake phase")]
    WrongState,

    /// Transport nonce counter exhausted (2^64 - 1 messages)
    #[error("nonce counter exhausted")]
    NonceExhausted,

    /// Serialization of a payload failed
    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl CryptoError {
    /// Returns true if the error indicates tampering or a wrong key.
    ///
    /// These are terminal for the operation and must not be retried with the
    /// same inputs.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::BadPublicKey)
    }
}
