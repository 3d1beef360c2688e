//! Error types for action handling.
//!
//! Every failure a handler can produce is an [`ActionError`]. Its
//! [`class`](ActionError::class) drives how the host presents it, and
//! [`user_message`](ActionError::user_message) is the only text that should
//! reach a user. Neither ever contains key material.

use ringlink_core::{EntropyError, SessionError};
use ringlink_crypto::CryptoError;
use thiserror::Error;

use crate::action::ActionKind;

/// Longest remote error summary kept in an [`ActionError::Remote`].
const REMOTE_SUMMARY_LEN: usize = 120;

/// Failure reported by a collaborator service (homeserver, secret store,
/// launcher).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Nothing stored at the requested path or identity
    #[error("not found: {0}")]
    NotFound(String),

    /// Request refused (bad token, missing capability, signup rejected)
    #[error("rejected: {0}")]
    Rejected(String),

    /// Service unreachable or failed
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Broad category of an [`ActionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Input was malformed; nothing was attempted
    Validation,
    /// Caller state is missing (no identity)
    Precondition,
    /// A collaborator failed or timed out
    Remote,
    /// Key derivation, sealing or opening failed
    Crypto,
    /// No secure random source; fatal
    Entropy,
    /// A handler crashed
    Internal,
}

/// Errors from classifying, dispatching and running actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// Input did not classify as any supported action
    #[error("unrecognized input")]
    UnknownAction,

    /// A required parameter is absent
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    /// A parameter is present but malformed
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name as it appears in the link
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Handoff request carries no ephemeral key to seal to
    #[error("handoff request has no ephemeral key")]
    MissingEphemeralKey,

    /// Handoff ephemeral key is not 32 bytes of hex
    #[error("handoff ephemeral key is malformed")]
    InvalidEphemeralKey,

    /// Callback is not an absolute URL with a scheme
    #[error("invalid callback url")]
    InvalidCallback,

    /// Callback received by a consumer has an unexpected shape
    #[error("unexpected callback: {reason}")]
    UnexpectedCallback {
        /// Which check failed
        reason: String,
    },

    /// Action needs an active identity and none is selected
    #[error("no active identity")]
    NoActiveIdentity,

    /// A collaborator failed
    #[error("{operation} failed: {message}")]
    Remote {
        /// Operation that was attempted
        operation: &'static str,
        /// Summarized collaborator error
        message: String,
    },

    /// A collaborator or rendezvous did not answer in time
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Cryptographic failure
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// Handoff payload failed validation after opening
    #[error("invalid handoff payload: {0}")]
    InvalidPayload(String),

    /// Session layer failure
    #[error("session: {0}")]
    Session(#[from] SessionError),

    /// No secure random source
    #[error("secure random source unavailable")]
    EntropyUnavailable,

    /// A handler panicked
    #[error("{kind:?} handler crashed")]
    HandlerCrashed {
        /// Kind of the request whose handler crashed
        kind: ActionKind,
    },
}

impl From<EntropyError> for ActionError {
    fn from(err: EntropyError) -> Self {
        tracing::warn!(reason = %err.reason, "entropy source failed");
        Self::EntropyUnavailable
    }
}

impl ActionError {
    /// Wrap a collaborator failure, keeping a bounded summary of its message.
    pub fn remote(operation: &'static str, err: &StoreError) -> Self {
        let full = err.to_string();
        let first_line = full.lines().next().unwrap_or_default();
        let message = first_line.chars().take(REMOTE_SUMMARY_LEN).collect();
        Self::Remote { operation, message }
    }

    /// Category of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownAction
            | Self::MissingParameter(_)
            | Self::InvalidParameter { .. }
            | Self::MissingEphemeralKey
            | Self::InvalidEphemeralKey
            | Self::InvalidCallback
            | Self::UnexpectedCallback { .. } => ErrorClass::Validation,
            Self::NoActiveIdentity => ErrorClass::Precondition,
            Self::Remote { .. } | Self::Timeout { .. } => ErrorClass::Remote,
            Self::Crypto(_) | Self::InvalidPayload(_) => ErrorClass::Crypto,
            Self::Session(SessionError::Entropy(_)) | Self::EntropyUnavailable => ErrorClass::Entropy,
            Self::Session(SessionError::Crypto(_)) => ErrorClass::Crypto,
            Self::Session(_) | Self::HandlerCrashed { .. } => ErrorClass::Internal,
        }
    }

    /// Short, non-secret text suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnknownAction => "This link or code is not recognized.",
            Self::MissingParameter(_) | Self::InvalidParameter { .. } => "The request is incomplete or malformed.",
            Self::MissingEphemeralKey | Self::InvalidEphemeralKey => {
                "The requesting app did not provide a valid key. Update the app and try again."
            },
            Self::InvalidCallback => "The requesting app provided an invalid return address.",
            Self::UnexpectedCallback { .. } => "The response could not be verified.",
            Self::NoActiveIdentity => "Select or create an identity first.",
            Self::Remote { .. } => "The server could not complete the request.",
            Self::Timeout { .. } => "The request timed out. Check your connection and try again.",
            Self::Crypto(_) | Self::InvalidPayload(_) => "The secure exchange failed.",
            Self::EntropyUnavailable => "This device cannot generate secure keys right now.",
            Self::Session(_) => match self.class() {
                ErrorClass::Entropy => "This device cannot generate secure keys right now.",
                ErrorClass::Crypto => "The secure exchange failed.",
                _ => "Something went wrong.",
            },
            Self::HandlerCrashed { .. } => "Something went wrong.",
        }
    }
}
