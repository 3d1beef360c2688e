//! Collaborator services.
//!
//! The homeserver, the platform secret store and the URL launcher live
//! outside this crate. Handlers reach them only through these traits, so the
//! simulation harness can substitute in-memory doubles with fault injection.

use std::sync::Arc;

use async_trait::async_trait;
use ringlink_crypto::KEY_LEN;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Path-addressed per-owner blob store (the homeserver).
///
/// Reads are public; writes and deletes are authenticated as `owner`.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Write `body` at `path` in `owner`'s namespace, replacing any previous value.
    async fn put(&self, owner: &str, path: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Read `path` in `owner`'s namespace.
    async fn get(&self, owner: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Delete `path` in `owner`'s namespace. Deleting a missing path succeeds.
    async fn delete(&self, owner: &str, path: &str) -> Result<(), StoreError>;

    /// Paths under `prefix` in `owner`'s namespace.
    async fn list(&self, owner: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Authenticated homeserver session.
pub struct HomeserverSession {
    /// Bearer secret for the session
    pub session_secret: Zeroizing<String>,
    /// Capabilities the homeserver granted
    pub capabilities: Vec<String>,
}

impl std::fmt::Debug for HomeserverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeserverSession").field("capabilities", &self.capabilities).finish_non_exhaustive()
    }
}

/// Homeserver account and session operations.
#[async_trait]
pub trait HomeserverSessions: Send + Sync {
    /// Sign in as `owner` and open a session with `capabilities`.
    async fn establish(&self, owner: &str, capabilities: &[String]) -> Result<HomeserverSession, StoreError>;

    /// Create an account for `owner` at `homeserver` using `token`.
    async fn sign_up(&self, homeserver: &str, owner: &str, token: &str) -> Result<(), StoreError>;

    /// Deliver an authorization grant to an app waiting on `relay`.
    ///
    /// `channel_secret` identifies the app's relay channel.
    async fn deliver_grant(
        &self,
        relay: &str,
        channel_secret: &str,
        session: &HomeserverSession,
    ) -> Result<(), StoreError>;
}

/// Platform secure storage for identity secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Secret for `identity`.
    async fn load(&self, identity: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, StoreError>;

    /// Store the secret for `identity`, replacing any previous one.
    async fn store(&self, identity: &str, secret: Zeroizing<[u8; KEY_LEN]>) -> Result<(), StoreError>;
}

/// Opens callback URLs in other apps.
#[async_trait]
pub trait UrlLauncher: Send + Sync {
    /// Open `url`.
    async fn open(&self, url: &str) -> Result<(), StoreError>;
}

/// All collaborators a dispatcher needs.
#[derive(Clone)]
pub struct Services {
    /// Homeserver storage
    pub directory: Arc<dyn DirectoryStore>,
    /// Homeserver sessions and accounts
    pub homeserver: Arc<dyn HomeserverSessions>,
    /// Identity secrets
    pub secrets: Arc<dyn SecretStore>,
    /// Callback launcher
    pub launcher: Arc<dyn UrlLauncher>,
}

/// Identity selected by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveIdentity {
    /// Hex Ed25519 public key
    pub identity: String,
}

/// Progress notifications emitted while handling an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// An identity was imported and stored
    IdentityImported {
        /// Imported identity
        identity: String,
    },
    /// A new identity was created and signed up
    IdentityCreated {
        /// New identity
        identity: String,
        /// Homeserver it was signed up at
        homeserver: String,
    },
    /// A handoff envelope was written
    HandoffDelivered {
        /// Owning identity
        identity: String,
        /// Hex request id of the envelope
        request_id: String,
    },
    /// A callback URL was opened, or handed to the host for display when the
    /// request did not arrive through a deep link
    CallbackOpened {
        /// Callback including appended parameters
        url: String,
        /// False when the host must present `url` instead of it being launched
        launched: bool,
    },
}

/// Receiver of [`DispatchEvent`]s.
pub trait EventSink: Send + Sync {
    /// Record `event`.
    fn emit(&self, event: DispatchEvent);
}

impl EventSink for mpsc::UnboundedSender<DispatchEvent> {
    fn emit(&self, event: DispatchEvent) {
        if self.send(event).is_err() {
            tracing::debug!("dispatch event receiver dropped");
        }
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: DispatchEvent) {}
}
