//! Async facade over the session registry.
//!
//! Registry calls take locks and run X25519, so every call is moved onto the
//! blocking pool. The registry itself stays synchronous and runtime agnostic.

use std::sync::Arc;

use ringlink_core::{
    Environment, HandshakeStep, ManagerId, ManagerRole, NoiseConfig, NoiseSessionState, RekeyDirection,
    SessionError, SessionId, SessionInfo, SessionRegistry, SessionStatus,
};
use ringlink_crypto::KEY_LEN;
use zeroize::Zeroizing;

/// Cloneable async handle to a shared [`SessionRegistry`].
pub struct SessionService<E: Environment> {
    registry: Arc<SessionRegistry<E>>,
}

impl<E: Environment> Clone for SessionService<E> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}

impl<E: Environment> SessionService<E> {
    /// Create a service over a fresh registry.
    pub fn new(env: E) -> Self {
        Self { registry: Arc::new(SessionRegistry::new(env)) }
    }

    /// Wrap an existing registry.
    pub fn from_registry(registry: Arc<SessionRegistry<E>>) -> Self {
        Self { registry }
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Arc<SessionRegistry<E>> {
        &self.registry
    }

    async fn run<T, F>(&self, call: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionRegistry<E>) -> Result<T, SessionError> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        tokio::task::spawn_blocking(move || call(&registry)).await.map_err(|e| {
            tracing::warn!(error = %e, "session worker failed");
            SessionError::WorkerFailed
        })?
    }

    /// See [`SessionRegistry::create_manager`].
    pub async fn create_manager(
        &self,
        role: ManagerRole,
        static_secret: Zeroizing<[u8; KEY_LEN]>,
        key_id: String,
        device_id: String,
        config: NoiseConfig,
    ) -> Result<ManagerId, SessionError> {
        self.run(move |r| r.create_manager(role, *static_secret, &key_id, &device_id, config)).await
    }

    /// See [`SessionRegistry::initiate`].
    pub async fn initiate(
        &self,
        id: ManagerId,
        peer_static: [u8; KEY_LEN],
        hint: Option<String>,
    ) -> Result<HandshakeStep, SessionError> {
        self.run(move |r| r.initiate(id, &peer_static, hint.as_deref())).await
    }

    /// See [`SessionRegistry::accept`].
    pub async fn accept(&self, id: ManagerId, message: Vec<u8>) -> Result<HandshakeStep, SessionError> {
        self.run(move |r| r.accept(id, &message)).await
    }

    /// See [`SessionRegistry::complete`].
    pub async fn complete(&self, id: ManagerId, session_id: SessionId, response: Vec<u8>) -> Result<SessionId, SessionError> {
        self.run(move |r| r.complete(id, session_id, &response)).await
    }

    /// See [`SessionRegistry::encrypt`].
    pub async fn encrypt(&self, id: ManagerId, session_id: SessionId, plaintext: Vec<u8>) -> Result<Vec<u8>, SessionError> {
        self.run(move |r| r.encrypt(id, session_id, &plaintext)).await
    }

    /// See [`SessionRegistry::decrypt`].
    pub async fn decrypt(&self, id: ManagerId, session_id: SessionId, ciphertext: Vec<u8>) -> Result<Vec<u8>, SessionError> {
        self.run(move |r| r.decrypt(id, session_id, &ciphertext)).await
    }

    /// See [`SessionRegistry::rekey`].
    pub async fn rekey(&self, id: ManagerId, session_id: SessionId, direction: RekeyDirection) -> Result<(), SessionError> {
        self.run(move |r| r.rekey(id, session_id, direction)).await
    }

    /// See [`SessionRegistry::save_state`].
    pub async fn save_state(&self, id: ManagerId, session_id: SessionId) -> Result<NoiseSessionState, SessionError> {
        self.run(move |r| r.save_state(id, session_id)).await
    }

    /// See [`SessionRegistry::restore_state`].
    pub async fn restore_state(&self, id: ManagerId, state: NoiseSessionState) -> Result<SessionId, SessionError> {
        self.run(move |r| r.restore_state(id, &state)).await
    }

    /// See [`SessionRegistry::list_sessions`].
    pub async fn list_sessions(&self, id: ManagerId) -> Result<Vec<SessionInfo>, SessionError> {
        self.run(move |r| r.list_sessions(id)).await
    }

    /// See [`SessionRegistry::get_status`].
    pub async fn get_status(&self, id: ManagerId, session_id: SessionId) -> Result<SessionStatus, SessionError> {
        self.run(move |r| r.get_status(id, session_id)).await
    }

    /// See [`SessionRegistry::set_status`].
    pub async fn set_status(&self, id: ManagerId, session_id: SessionId, status: SessionStatus) -> Result<(), SessionError> {
        self.run(move |r| r.set_status(id, session_id, status)).await
    }

    /// See [`SessionRegistry::remove_session`].
    pub async fn remove_session(&self, id: ManagerId, session_id: SessionId) -> Result<(), SessionError> {
        self.run(move |r| r.remove_session(id, session_id)).await
    }

    /// See [`SessionRegistry::destroy_manager`].
    pub async fn destroy_manager(&self, id: ManagerId) -> Result<(), SessionError> {
        self.run(move |r| r.destroy_manager(id)).await
    }
}
