//! Process-wide arena of `NoiseManager`s.
//!
//! Managers are addressed by random 128-bit [`ManagerId`]s. The outer map
//! lock is held only for insert/lookup/remove; each manager has its own lock
//! serializing mutations of its sessions, so two calls on the same session
//! never interleave partial counter updates.
//!
//! The registry also keeps a counter ledger, `SessionId → (write, read,
//! owner)`. Every successful encrypt and decrypt raises the watermark, and
//! the owner is the manager currently holding the session. A restore is
//! refused while another manager holds the session, and refused when its
//! counters are below the watermark, so no two copies of a session ever
//! encrypt under the same nonce.
//!
//! Ledger entries are kept for the registry's lifetime. Dropping one would
//! make every persisted snapshot of that session restorable again.
//!
//! Lock order: managers map, then one manager, then the ledger.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use ringlink_crypto::KEY_LEN;

use crate::{
    config::NoiseConfig,
    env::Environment,
    error::SessionError,
    ids::{ManagerId, SessionId},
    manager::{HandshakeStep, NoiseManager, check_not_below},
    session::{ManagerRole, NoiseSessionState, RekeyDirection, SessionInfo, SessionStatus},
};

/// Highest counters observed for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterWatermark {
    /// Highest write counter seen
    pub write: u64,
    /// Highest read counter seen
    pub read: u64,
}

impl CounterWatermark {
    fn raise(&mut self, write: u64, read: u64) {
        self.write = self.write.max(write);
        self.read = self.read.max(read);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LedgerEntry {
    watermark: CounterWatermark,
    owner: Option<ManagerId>,
}

type SharedManager = Arc<Mutex<NoiseManager>>;

/// Registry of Noise managers.
pub struct SessionRegistry<E: Environment> {
    env: E,
    managers: Mutex<HashMap<ManagerId, SharedManager>>,
    ledger: Mutex<HashMap<SessionId, LedgerEntry>>,
}

impl<E: Environment> SessionRegistry<E> {
    /// Create an empty registry drawing ids and ephemerals from `env`.
    pub fn new(env: E) -> Self {
        Self { env, managers: Mutex::new(HashMap::new()), ledger: Mutex::new(HashMap::new()) }
    }

    /// Allocate a manager and register it under a fresh random id.
    pub fn create_manager(
        &self,
        role: ManagerRole,
        static_secret: [u8; KEY_LEN],
        key_id: &str,
        device_id: &str,
        config: NoiseConfig,
    ) -> Result<ManagerId, SessionError> {
        let manager = NoiseManager::new(role, static_secret, key_id, device_id, config);

        let mut managers = lock(&self.managers)?;
        let id = loop {
            let candidate = ManagerId::from_u128(self.env.random_u128()?);
            if !managers.contains_key(&candidate) {
                break candidate;
            }
        };
        managers.insert(id, Arc::new(Mutex::new(manager)));

        tracing::debug!(manager = %id, ?role, key_id, device_id, "manager created");
        Ok(id)
    }

    /// Static public key of a manager.
    pub fn static_public(&self, id: ManagerId) -> Result<[u8; KEY_LEN], SessionError> {
        self.with_manager(id, |m| Ok(m.static_public()))
    }

    /// Begin a handshake toward `peer_static`. Client managers only.
    pub fn initiate(&self, id: ManagerId, peer_static: &[u8], hint: Option<&str>) -> Result<HandshakeStep, SessionError> {
        let ephemeral = self.env.random_array::<KEY_LEN>()?;
        self.with_manager(id, |m| {
            let session_id = self.fresh_session_id(m)?;
            let step = m.initiate(session_id, peer_static, hint, ephemeral)?;
            self.claim(step.session_id, id)?;
            Ok(step)
        })
    }

    /// Answer a client's first message. Server managers only.
    pub fn accept(&self, id: ManagerId, message: &[u8]) -> Result<HandshakeStep, SessionError> {
        let ephemeral = self.env.random_array::<KEY_LEN>()?;
        self.with_manager(id, |m| {
            let session_id = self.fresh_session_id(m)?;
            let step = m.accept(session_id, message, ephemeral)?;
            self.claim(step.session_id, id)?;
            Ok(step)
        })
    }

    /// Finish a client handshake.
    pub fn complete(&self, id: ManagerId, session_id: SessionId, response: &[u8]) -> Result<SessionId, SessionError> {
        self.with_manager(id, |m| m.complete(session_id, response))
    }

    /// Encrypt one message; the write counter grows by one.
    pub fn encrypt(&self, id: ManagerId, session_id: SessionId, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.with_manager(id, |m| {
            let ciphertext = m.encrypt(session_id, plaintext)?;
            self.track(m, session_id)?;
            Ok(ciphertext)
        })
    }

    /// Decrypt one message; the read counter grows by one on success.
    pub fn decrypt(&self, id: ManagerId, session_id: SessionId, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.with_manager(id, |m| {
            let plaintext = m.decrypt(session_id, ciphertext)?;
            self.track(m, session_id)?;
            Ok(plaintext)
        })
    }

    /// Rekey one direction of a session without touching counters.
    pub fn rekey(&self, id: ManagerId, session_id: SessionId, direction: RekeyDirection) -> Result<(), SessionError> {
        self.with_manager(id, |m| m.rekey(session_id, direction))
    }

    /// Snapshot a session and record its counters in the ledger.
    pub fn save_state(&self, id: ManagerId, session_id: SessionId) -> Result<NoiseSessionState, SessionError> {
        self.with_manager(id, |m| {
            let state = m.save_state(session_id)?;
            self.observe(session_id, state.write_counter(), state.read_counter())?;
            Ok(state)
        })
    }

    /// Install a persisted session.
    ///
    /// Rejects a state whose session is held by another manager, and any
    /// state whose counters are below the ledger watermark or the live
    /// session's counters. Accepted states raise the watermark and move
    /// ownership to `id`.
    pub fn restore_state(&self, id: ManagerId, state: &NoiseSessionState) -> Result<SessionId, SessionError> {
        self.with_manager(id, |m| {
            let mut ledger = lock(&self.ledger)?;
            let entry = ledger.get(&state.session_id).copied().unwrap_or_default();
            if let Some(owner) = entry.owner.filter(|owner| *owner != id) {
                tracing::warn!(session = %state.session_id, %owner, "rejected restore of a session held elsewhere");
                return Err(SessionError::SessionInUse { session_id: state.session_id, owner });
            }
            if let Err(e) = check_not_below(state, entry.watermark.write, entry.watermark.read) {
                tracing::warn!(session = %state.session_id, "rejected restore with regressed counters");
                return Err(e);
            }

            let session_id = m.restore_state(state)?;
            let entry = ledger.entry(session_id).or_default();
            entry.watermark.raise(state.write_counter(), state.read_counter());
            entry.owner = Some(id);
            Ok(session_id)
        })
    }

    /// Summaries of every session of a manager.
    pub fn list_sessions(&self, id: ManagerId) -> Result<Vec<SessionInfo>, SessionError> {
        self.with_manager(id, |m| Ok(m.list_sessions()))
    }

    /// Status of one session.
    pub fn get_status(&self, id: ManagerId, session_id: SessionId) -> Result<SessionStatus, SessionError> {
        self.with_manager(id, |m| m.status(session_id))
    }

    /// Record caller-reported connectivity.
    pub fn set_status(&self, id: ManagerId, session_id: SessionId, status: SessionStatus) -> Result<(), SessionError> {
        self.with_manager(id, |m| m.set_status(session_id, status))
    }

    /// Drop one session, recording its final counters.
    pub fn remove_session(&self, id: ManagerId, session_id: SessionId) -> Result<(), SessionError> {
        self.with_manager(id, |m| {
            let info = m.remove_session(session_id)?;
            self.release(session_id, id, info.write_counter, info.read_counter)
        })
    }

    /// Remove a manager and every session it owns.
    ///
    /// Later calls with `id` fail with `ManagerNotFound`.
    pub fn destroy_manager(&self, id: ManagerId) -> Result<(), SessionError> {
        let manager = lock(&self.managers)?.remove(&id).ok_or(SessionError::ManagerNotFound(id))?;

        let sessions = lock(&manager)?.list_sessions();
        for info in &sessions {
            self.release(info.session_id, id, info.write_counter, info.read_counter)?;
        }
        tracing::debug!(manager = %id, sessions = sessions.len(), "manager destroyed");
        Ok(())
    }

    /// Number of live managers.
    pub fn manager_count(&self) -> Result<usize, SessionError> {
        Ok(lock(&self.managers)?.len())
    }

    /// Ledger watermark for a session, if any was recorded.
    pub fn watermark(&self, session_id: SessionId) -> Result<Option<CounterWatermark>, SessionError> {
        Ok(lock(&self.ledger)?.get(&session_id).map(|entry| entry.watermark))
    }

    fn with_manager<T>(
        &self,
        id: ManagerId,
        f: impl FnOnce(&mut NoiseManager) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let manager = lock(&self.managers)?.get(&id).cloned().ok_or(SessionError::ManagerNotFound(id))?;
        let mut guard = lock(&manager)?;
        f(&mut guard)
    }

    fn fresh_session_id(&self, manager: &NoiseManager) -> Result<SessionId, SessionError> {
        loop {
            let candidate = SessionId::from_u128(self.env.random_u128()?);
            if !manager.contains(candidate) && !lock(&self.ledger)?.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    fn claim(&self, session_id: SessionId, owner: ManagerId) -> Result<(), SessionError> {
        lock(&self.ledger)?.entry(session_id).or_default().owner = Some(owner);
        Ok(())
    }

    fn track(&self, manager: &NoiseManager, session_id: SessionId) -> Result<(), SessionError> {
        let (write, read) = manager.counters(session_id)?;
        self.observe(session_id, write, read)
    }

    fn observe(&self, session_id: SessionId, write: u64, read: u64) -> Result<(), SessionError> {
        lock(&self.ledger)?.entry(session_id).or_default().watermark.raise(write, read);
        Ok(())
    }

    fn release(&self, session_id: SessionId, owner: ManagerId, write: u64, read: u64) -> Result<(), SessionError> {
        let mut ledger = lock(&self.ledger)?;
        let entry = ledger.entry(session_id).or_default();
        entry.watermark.raise(write, read);
        if entry.owner == Some(owner) {
            entry.owner = None;
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, SessionError> {
    mutex.lock().map_err(|_| SessionError::Poisoned)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU64, Ordering},
        time::{Duration, Instant},
    };

    use super::*;
    use crate::error::EntropyError;

    /// Counter-based randomness: distinct, reproducible, not secure.
    #[derive(Clone, Default)]
    struct CountingEnv(Arc<AtomicU64>);

    impl Environment for CountingEnv {
        type Instant = Instant;

        #[allow(clippy::disallowed_methods)]
        fn now(&self) -> Instant {
            Instant::now()
        }

        fn wall_clock_millis(&self) -> u64 {
            0
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
            for chunk in buffer.chunks_mut(8) {
                let next = self.0.fetch_add(1, Ordering::Relaxed) + 1;
                let bytes = next.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
            Ok(())
        }
    }

    fn connected(registry: &SessionRegistry<CountingEnv>) -> (ManagerId, SessionId, ManagerId, SessionId) {
        let client = registry.create_manager(ManagerRole::Client, [0x11; KEY_LEN], "kid", "device123", NoiseConfig::default()).unwrap();
        let server = registry.create_manager(ManagerRole::Server, [0x22; KEY_LEN], "kid", "server", NoiseConfig::default()).unwrap();

        let server_pub = registry.static_public(server).unwrap();
        let first = registry.initiate(client, &server_pub, None).unwrap();
        let reply = registry.accept(server, &first.message).unwrap();
        registry.complete(client, first.session_id, &reply.message).unwrap();
        (client, first.session_id, server, reply.session_id)
    }

    #[test]
    fn manager_ids_are_unique() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let a = registry.create_manager(ManagerRole::Client, [1; KEY_LEN], "k", "d", NoiseConfig::default()).unwrap();
        let b = registry.create_manager(ManagerRole::Client, [1; KEY_LEN], "k", "d", NoiseConfig::default()).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.manager_count().unwrap(), 2);
    }

    #[test]
    fn destroyed_manager_is_not_found() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let (client, session, _, _) = connected(&registry);

        registry.destroy_manager(client).unwrap();
        assert_eq!(registry.encrypt(client, session, b"x"), Err(SessionError::ManagerNotFound(client)));
        assert_eq!(registry.list_sessions(client), Err(SessionError::ManagerNotFound(client)));
        assert_eq!(registry.destroy_manager(client), Err(SessionError::ManagerNotFound(client)));
    }

    #[test]
    fn ledger_outlives_managers() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let (client, session, _, _) = connected(&registry);

        let stale = registry.save_state(client, session).unwrap();
        registry.encrypt(client, session, b"one").unwrap();
        registry.encrypt(client, session, b"two").unwrap();
        registry.destroy_manager(client).unwrap();
        assert_eq!(registry.watermark(session).unwrap(), Some(CounterWatermark { write: 2, read: 0 }));

        let fresh = registry.create_manager(ManagerRole::Client, [0x11; KEY_LEN], "kid", "device123", NoiseConfig::default()).unwrap();
        assert!(matches!(
            registry.restore_state(fresh, &stale),
            Err(SessionError::CounterRegression { watermark: 2, attempted: 0, .. })
        ));
    }

    #[test]
    fn transport_raises_watermark() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let (client, session, server, server_session) = connected(&registry);
        assert_eq!(registry.watermark(session).unwrap(), Some(CounterWatermark::default()));

        for _ in 0..3 {
            let ct = registry.encrypt(client, session, b"m").unwrap();
            registry.decrypt(server, server_session, &ct).unwrap();
        }
        assert_eq!(registry.watermark(session).unwrap(), Some(CounterWatermark { write: 3, read: 0 }));
        assert_eq!(registry.watermark(server_session).unwrap(), Some(CounterWatermark { write: 0, read: 3 }));
    }

    #[test]
    fn live_session_cannot_be_restored_elsewhere() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let (client, session, _, _) = connected(&registry);

        let saved = registry.save_state(client, session).unwrap();
        registry.encrypt(client, session, b"AAAAAAAA").unwrap();
        registry.encrypt(client, session, b"x").unwrap();

        let other = registry.create_manager(ManagerRole::Client, [0x11; KEY_LEN], "kid", "device123", NoiseConfig::default()).unwrap();
        assert_eq!(
            registry.restore_state(other, &saved),
            Err(SessionError::SessionInUse { session_id: session, owner: client })
        );
        assert!(registry.list_sessions(other).unwrap().is_empty());

        // Current counters do not make a second live copy acceptable either
        let current = registry.save_state(client, session).unwrap();
        assert!(matches!(registry.restore_state(other, &current), Err(SessionError::SessionInUse { .. })));
    }

    #[test]
    fn snapshot_restores_once_per_counter_position() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let (client, session, _, _) = connected(&registry);
        let saved = registry.save_state(client, session).unwrap();
        registry.destroy_manager(client).unwrap();

        let first = registry.create_manager(ManagerRole::Client, [0x11; KEY_LEN], "kid", "device123", NoiseConfig::default()).unwrap();
        let second = registry.create_manager(ManagerRole::Client, [0x11; KEY_LEN], "kid", "device123", NoiseConfig::default()).unwrap();
        registry.restore_state(first, &saved).unwrap();
        assert!(matches!(registry.restore_state(second, &saved), Err(SessionError::SessionInUse { .. })));

        registry.encrypt(first, session, b"x").unwrap();
        registry.destroy_manager(first).unwrap();
        assert_eq!(
            registry.restore_state(second, &saved),
            Err(SessionError::CounterRegression { session_id: session, counter: "write", watermark: 1, attempted: 0 })
        );
    }

    #[test]
    fn removed_session_releases_ownership() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let (client, session, _, _) = connected(&registry);
        registry.encrypt(client, session, b"x").unwrap();
        let saved = registry.save_state(client, session).unwrap();
        registry.remove_session(client, session).unwrap();

        let other = registry.create_manager(ManagerRole::Client, [0x11; KEY_LEN], "kid", "device123", NoiseConfig::default()).unwrap();
        assert_eq!(registry.restore_state(other, &saved), Ok(session));
    }

    #[test]
    fn remove_session_records_watermark() {
        let registry = SessionRegistry::new(CountingEnv::default());
        let (client, session, _, _) = connected(&registry);

        registry.encrypt(client, session, b"x").unwrap();
        registry.remove_session(client, session).unwrap();
        assert_eq!(registry.watermark(session).unwrap(), Some(CounterWatermark { write: 1, read: 0 }));
        assert_eq!(registry.get_status(client, session), Err(SessionError::SessionNotFound(session)));
    }
}
