//! In-memory collaborator doubles: homeserver, secret store, URL launcher and
//! event sink.
//!
//! Each double records what it was asked to do, so tests can assert on side
//! effects (zero network calls, exactly one callback) without mocks.

#![allow(clippy::disallowed_types, reason = "Locking simple double state")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use ringlink_app::{
    DirectoryStore, DispatchEvent, EventSink, HomeserverSession, HomeserverSessions, SecretStore, Services,
    StoreError, UrlLauncher,
};
use ringlink_crypto::{IdentityKey, KEY_LEN};
use zeroize::Zeroizing;

use crate::sim_store::MemoryDirectoryStore;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct HomeserverState {
    sessions: Vec<(String, Vec<String>)>,
    signups: Vec<(String, String)>,
    grants: Vec<(String, Vec<String>)>,
    rejected_tokens: Vec<String>,
    fail_establish: bool,
    establish_delay: Option<Duration>,
}

/// Homeserver double.
///
/// Issues deterministic session secrets and grants every requested
/// capability unless configured to fail.
#[derive(Clone, Default)]
pub struct SimHomeserver {
    state: Arc<Mutex<HomeserverState>>,
}

impl SimHomeserver {
    /// Create a homeserver that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make session establishment fail.
    pub fn fail_establish(&self) {
        locked(&self.state).fail_establish = true;
    }

    /// Delay session establishment (tokio time).
    pub fn delay_establish(&self, delay: Duration) {
        locked(&self.state).establish_delay = Some(delay);
    }

    /// Reject signups using `token`.
    pub fn reject_token(&self, token: impl Into<String>) {
        locked(&self.state).rejected_tokens.push(token.into());
    }

    /// Sessions established so far as `(owner, capabilities)`.
    pub fn sessions(&self) -> Vec<(String, Vec<String>)> {
        locked(&self.state).sessions.clone()
    }

    /// Signups so far as `(homeserver, owner)`.
    pub fn signups(&self) -> Vec<(String, String)> {
        locked(&self.state).signups.clone()
    }

    /// Grants delivered so far as `(relay, capabilities)`.
    pub fn grants(&self) -> Vec<(String, Vec<String>)> {
        locked(&self.state).grants.clone()
    }

    /// Session secret issued to the `n`th session of `owner`.
    pub fn session_secret_for(owner: &str, n: usize) -> String {
        format!("sim-session-{n}-{owner}")
    }
}

#[async_trait]
impl HomeserverSessions for SimHomeserver {
    async fn establish(&self, owner: &str, capabilities: &[String]) -> Result<HomeserverSession, StoreError> {
        let delay = locked(&self.state).establish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = locked(&self.state);
        if state.fail_establish {
            return Err(StoreError::Unavailable("homeserver unreachable".to_string()));
        }
        let n = state.sessions.iter().filter(|(o, _)| o == owner).count();
        state.sessions.push((owner.to_string(), capabilities.to_vec()));
        Ok(HomeserverSession {
            session_secret: Zeroizing::new(Self::session_secret_for(owner, n)),
            capabilities: capabilities.to_vec(),
        })
    }

    async fn sign_up(&self, homeserver: &str, owner: &str, token: &str) -> Result<(), StoreError> {
        let mut state = locked(&self.state);
        if state.rejected_tokens.iter().any(|t| t == token) {
            return Err(StoreError::Rejected("signup token rejected".to_string()));
        }
        state.signups.push((homeserver.to_string(), owner.to_string()));
        Ok(())
    }

    async fn deliver_grant(&self, relay: &str, _channel_secret: &str, session: &HomeserverSession) -> Result<(), StoreError> {
        locked(&self.state).grants.push((relay.to_string(), session.capabilities.clone()));
        Ok(())
    }
}

/// Secret store double keyed by identity.
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    secrets: Arc<Mutex<HashMap<String, Zeroizing<[u8; KEY_LEN]>>>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `secret` under its derived identity and return the identity.
    pub fn add_secret(&self, secret: [u8; KEY_LEN]) -> String {
        let identity = IdentityKey::from_secret(&secret).identity();
        locked(&self.secrets).insert(identity.clone(), Zeroizing::new(secret));
        identity
    }

    /// Identities with a stored secret.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = locked(&self.secrets).keys().cloned().collect();
        identities.sort();
        identities
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn load(&self, identity: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, StoreError> {
        locked(&self.secrets)
            .get(identity)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("no secret for {identity}")))
    }

    async fn store(&self, identity: &str, secret: Zeroizing<[u8; KEY_LEN]>) -> Result<(), StoreError> {
        locked(&self.secrets).insert(identity.to_string(), secret);
        Ok(())
    }
}

#[derive(Default)]
struct LauncherState {
    opened: Vec<String>,
    fail: bool,
}

/// Launcher double recording every URL it is asked to open.
#[derive(Clone, Default)]
pub struct RecordingLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl RecordingLauncher {
    /// Create a launcher that opens everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every launch fail (the URL is still recorded).
    pub fn fail_launches(&self) {
        locked(&self.state).fail = true;
    }

    /// URLs opened so far.
    pub fn opened(&self) -> Vec<String> {
        locked(&self.state).opened.clone()
    }
}

#[async_trait]
impl UrlLauncher for RecordingLauncher {
    async fn open(&self, url: &str) -> Result<(), StoreError> {
        let mut state = locked(&self.state);
        state.opened.push(url.to_string());
        if state.fail {
            return Err(StoreError::Unavailable("no app handles this url".to_string()));
        }
        Ok(())
    }
}

/// Event sink keeping every event.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DispatchEvent>>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far.
    pub fn events(&self) -> Vec<DispatchEvent> {
        locked(&self.events).clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DispatchEvent) {
        locked(&self.events).push(event);
    }
}

/// A full set of doubles sharing state with the [`Services`] they produce.
#[derive(Clone, Default)]
pub struct SimServices {
    /// Directory store
    pub directory: MemoryDirectoryStore,
    /// Homeserver
    pub homeserver: SimHomeserver,
    /// Secret store
    pub secrets: MemorySecretStore,
    /// Launcher
    pub launcher: RecordingLauncher,
}

impl SimServices {
    /// Fresh doubles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Services backed by these doubles.
    pub fn services(&self) -> Services {
        self.services_with_directory(Arc::new(self.directory.clone()))
    }

    /// Services backed by these doubles, with `directory` in front of the
    /// store (e.g. a [`ChaoticStore`](crate::ChaoticStore) wrapping it).
    pub fn services_with_directory(&self, directory: Arc<dyn DirectoryStore>) -> Services {
        Services {
            directory,
            homeserver: Arc::new(self.homeserver.clone()),
            secrets: Arc::new(self.secrets.clone()),
            launcher: Arc::new(self.launcher.clone()),
        }
    }

    /// Total calls that reached the network doubles (store and homeserver).
    pub fn network_calls(&self) -> usize {
        self.directory.operation_count()
            + self.homeserver.sessions().len()
            + self.homeserver.signups().len()
            + self.homeserver.grants().len()
    }
}
