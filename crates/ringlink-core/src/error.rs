//! Error types for the ringlink session layer.
//!
//! `SessionError` covers registry lookups, handshake ordering, transport
//! failures and state restoration. Cryptographic failures are wrapped, never
//! stringified, so callers can still test `is_authentication_failure`.

use ringlink_crypto::CryptoError;
use thiserror::Error;

use crate::{
    ids::{ManagerId, SessionId},
    session::{ManagerRole, SessionStatus},
};

/// No secure random source is available.
///
/// Fatal for the operation that needed randomness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("secure random source unavailable: {reason}")]
pub struct EntropyError {
    /// OS or simulation reason
    pub reason: String,
}

impl EntropyError {
    /// Create an entropy error with a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Errors from [`SessionRegistry`](crate::SessionRegistry) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Manager id is unknown or the manager was destroyed
    #[error("manager not found: {0}")]
    ManagerNotFound(ManagerId),

    /// Session id is unknown to this manager
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Operation is reserved for the other role
    #[error("{operation} requires a {required:?} manager")]
    WrongRole {
        /// Role the operation needs
        required: ManagerRole,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Operation is out of order for the session's handshake state
    #[error("invalid state: cannot {operation} while {status:?}")]
    InvalidState {
        /// Session status when the call was made
        status: SessionStatus,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Transport operation on a session that is not connected
    #[error("session {0} is not connected")]
    NotConnected(SessionId),

    /// A first handshake message was presented twice
    #[error("handshake message already accepted")]
    DuplicateHandshake,

    /// Peer static key has the wrong length or is a low-order point
    #[error("invalid peer static key")]
    InvalidPeerKey,

    /// Restored counters are below a previously observed value
    #[error("counter regression for {session_id}: {counter} {attempted} < {watermark}")]
    CounterRegression {
        /// Session being restored
        session_id: SessionId,
        /// Which counter regressed (`write` or `read`)
        counter: &'static str,
        /// Highest value previously observed
        watermark: u64,
        /// Value in the rejected state
        attempted: u64,
    },

    /// Session is live in another manager; two copies would reuse nonces
    #[error("session {session_id} is live in manager {owner}")]
    SessionInUse {
        /// Session being restored
        session_id: SessionId,
        /// Manager currently holding it
        owner: ManagerId,
    },

    /// Cryptographic failure
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// Random source unavailable
    #[error(transparent)]
    Entropy(#[from] EntropyError),

    /// Persisted state could not be encoded or decoded
    #[error("state encoding: {0}")]
    Encoding(String),

    /// A lock was poisoned by a panicking holder
    #[error("session registry lock poisoned")]
    Poisoned,

    /// The blocking worker running the operation panicked or was cancelled
    #[error("session worker failed")]
    WorkerFailed,
}

impl SessionError {
    /// Returns true for errors caused by a caller referencing something that
    /// does not exist (as opposed to a failing operation).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ManagerNotFound(_) | Self::SessionNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(SessionError::ManagerNotFound(ManagerId::from_u128(1)).is_not_found());
        assert!(SessionError::SessionNotFound(SessionId::from_u128(1)).is_not_found());
        assert!(!SessionError::DuplicateHandshake.is_not_found());
    }

    #[test]
    fn crypto_errors_keep_their_kind() {
        let err = SessionError::from(CryptoError::AuthenticationFailed);
        assert!(matches!(err, SessionError::Crypto(e) if e.is_authentication_failure()));
    }

    #[test]
    fn display_names_the_manager() {
        let err = SessionError::ManagerNotFound(ManagerId::from_u128(0xAB));
        assert_eq!(err.to_string(), format!("manager not found: {:032x}", 0xAB));
    }
}
