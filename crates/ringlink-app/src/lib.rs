//! ringlink Application Layer
//!
//! Everything between raw external input and the session core: input
//! classification, action dispatch, the secure key handoff on both sides, and
//! an async facade over the session registry.
//!
//! # Architecture
//!
//! ```text
//! raw input ─> classify ─> ActionRequest ─> Dispatcher ─> handler
//!                                                          │
//!                             ┌────────────────────────────┤
//!                             ↓                            ↓
//!                    Services (traits)            secure handoff
//!                    DirectoryStore               derive ─> seal ─> store ─> callback
//!                    HomeserverSessions                                         │
//!                    SecretStore                                                ↓
//!                    UrlLauncher                  HandoffReceiver (consumer): fetch ─> open ─> seed NoiseManager
//! ```
//!
//! Collaborators are traits so the harness can drive every flow in memory
//! with a seeded environment.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod action;
pub mod callback;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
mod handlers;
mod handoff;
pub mod pending;
pub mod protocol;
pub mod receiver;
pub mod services;
pub mod session_service;

pub use action::{
    ActionKind, ActionParams, ActionRequest, AuthParams, FollowsParams, HandoffParams, ImportParams, InputSource,
    InviteParams, ProfileParams, SecretString, SignParams, SignupParams,
};
pub use callback::{HandoffCallback, SECRET_PARAMS, append_query};
pub use classifier::{classify, is_invite_code, normalize};
pub use config::{HandoffConfig, PollConfig};
pub use dispatcher::{DispatchContext, Dispatcher};
pub use error::{ActionError, ErrorClass, StoreError};
pub use pending::{PendingRequests, PendingResponse, poll_rendezvous};
pub use protocol::{HandoffPayload, NoiseEndpointRecord, PayloadKeypair, RequestId};
pub use receiver::{HandoffReceiver, HandoffRequest, seed_manager};
pub use services::{
    ActiveIdentity, DirectoryStore, DispatchEvent, EventSink, HomeserverSession, HomeserverSessions, NullSink,
    SecretStore, Services, UrlLauncher,
};
pub use session_service::SessionService;
