//! Deterministic simulation harness for ringlink.
//!
//! In-memory implementations of the [`Environment`](ringlink_core::Environment)
//! and every collaborator trait, so complete handoff flows (holder dispatch,
//! envelope in the directory, consumer receive, Noise session) run in one
//! process from a seed.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties of a finished run rather than
//! specific outputs. Use [`InvariantRegistry::standard()`] after any flow.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod invariants;
pub mod sim_env;
pub mod sim_services;
pub mod sim_store;

pub use invariants::{
    CallbackCarriesNoSecrets, CounterMonotonicity, EnvelopesAreSealed, HandoffSnapshot, Invariant, InvariantRegistry,
    InvariantResult, OneEnvelopePerCallback, StoredBlob, Violation,
};
pub use sim_env::{FailingEntropyEnv, SIM_WALL_CLOCK_START_MS, SimEnv};
pub use sim_services::{MemorySecretStore, RecordingLauncher, RecordingSink, SimHomeserver, SimServices};
pub use sim_store::{ChaoticStore, MemoryDirectoryStore, StoreOp};
