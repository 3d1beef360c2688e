//! ringlink Session Core
//!
//! Session lifecycle for Noise IK channels established after a key handoff,
//! plus the environment abstraction every other ringlink crate is written
//! against.
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry (arena, ManagerId → manager)
//!        │
//!        ├── NoiseManager (role, static key, config)
//!        │        │
//!        │        └── NoiseSession (handshake → transport, counters, status)
//!        │
//!        └── counter ledger (SessionId → highest write/read seen)
//! ```
//!
//! Managers and sessions are pure state machines. The registry supplies
//! randomness from its [`Environment`], so a seeded environment replays every
//! handshake exactly.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod ids;
pub mod manager;
pub mod registry;
pub mod session;
mod system_env;

pub use config::{MAX_CHUNK_LEN, NoiseConfig, NoiseProfile, ReconnectPolicy};
pub use env::Environment;
pub use error::{EntropyError, SessionError};
pub use ids::{ManagerId, SessionId};
pub use manager::{HandshakeStep, NoiseManager, PROLOGUE};
pub use registry::{CounterWatermark, SessionRegistry};
pub use session::{ManagerRole, NoiseSessionState, RekeyDirection, SessionInfo, SessionStatus};
pub use system_env::SystemEnv;
