//! In-memory directory stores.
//!
//! [`MemoryDirectoryStore`] is a faithful per-owner blob store that records
//! every operation for later assertions. [`ChaoticStore`] wraps any store and
//! fails a seeded fraction of operations.

#![allow(clippy::disallowed_types, reason = "Locking simple store and RNG state")]

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use ringlink_app::{DirectoryStore, StoreError};

/// One recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// `put(owner, path)`
    Put {
        /// Namespace owner
        owner: String,
        /// Path written
        path: String,
    },
    /// `get(owner, path)`
    Get {
        /// Namespace owner
        owner: String,
        /// Path read
        path: String,
    },
    /// `delete(owner, path)`
    Delete {
        /// Namespace owner
        owner: String,
        /// Path deleted
        path: String,
    },
    /// `list(owner, prefix)`
    List {
        /// Namespace owner
        owner: String,
        /// Prefix listed
        prefix: String,
    },
}

#[derive(Default)]
struct StoreState {
    blobs: BTreeMap<(String, String), Vec<u8>>,
    log: Vec<StoreOp>,
    failing_prefixes: Vec<String>,
}

/// Thread-safe in-memory directory store.
#[derive(Clone, Default)]
pub struct MemoryDirectoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryDirectoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every write under `prefix` fail with `Unavailable`.
    pub fn fail_writes_under(&self, prefix: impl Into<String>) {
        self.state().failing_prefixes.push(prefix.into());
    }

    /// Seed a blob without recording an operation.
    pub fn insert(&self, owner: &str, path: &str, body: Vec<u8>) {
        self.state().blobs.insert((owner.to_string(), path.to_string()), body);
    }

    /// Current value at `path`.
    pub fn blob(&self, owner: &str, path: &str) -> Option<Vec<u8>> {
        self.state().blobs.get(&(owner.to_string(), path.to_string())).cloned()
    }

    /// Every stored `(owner, path, body)`.
    pub fn blobs(&self) -> Vec<(String, String, Vec<u8>)> {
        self.state().blobs.iter().map(|((o, p), b)| (o.clone(), p.clone(), b.clone())).collect()
    }

    /// Every operation attempted, in order.
    pub fn log(&self) -> Vec<StoreOp> {
        self.state().log.clone()
    }

    /// Paths written (attempted, including failed writes) under `prefix`.
    pub fn writes_under(&self, prefix: &str) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter_map(|op| match op {
                StoreOp::Put { path, .. } if path.starts_with(prefix) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of operations attempted.
    pub fn operation_count(&self) -> usize {
        self.state().log.len()
    }
}

#[async_trait]
impl DirectoryStore for MemoryDirectoryStore {
    async fn put(&self, owner: &str, path: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let mut state = self.state();
        state.log.push(StoreOp::Put { owner: owner.to_string(), path: path.to_string() });
        if state.failing_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(StoreError::Unavailable(format!("injected write failure at {path}")));
        }
        state.blobs.insert((owner.to_string(), path.to_string()), body);
        Ok(())
    }

    async fn get(&self, owner: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut state = self.state();
        state.log.push(StoreOp::Get { owner: owner.to_string(), path: path.to_string() });
        Ok(state.blobs.get(&(owner.to_string(), path.to_string())).cloned())
    }

    async fn delete(&self, owner: &str, path: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        state.log.push(StoreOp::Delete { owner: owner.to_string(), path: path.to_string() });
        state.blobs.remove(&(owner.to_string(), path.to_string()));
        Ok(())
    }

    async fn list(&self, owner: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.state();
        state.log.push(StoreOp::List { owner: owner.to_string(), prefix: prefix.to_string() });
        Ok(state
            .blobs
            .keys()
            .filter(|(o, p)| o == owner && p.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect())
    }
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos runs are reproducible from the
/// seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

/// Store wrapper that fails a seeded fraction of operations.
///
/// Failed operations never reach the inner store.
#[derive(Clone)]
pub struct ChaoticStore {
    inner: Arc<dyn DirectoryStore>,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operations: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl ChaoticStore {
    /// Wrap `inner`, failing operations with probability `failure_rate`
    /// (clamped to [0.0, 1.0]).
    pub fn with_seed(inner: Arc<dyn DirectoryStore>, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(ChaoticRng { state: seed })),
            operations: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Operations attempted.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Operations failed by injection.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn roll(&self, operation: &str) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        let fail = self.rng.lock().unwrap_or_else(PoisonError::into_inner).next() < self.failure_rate;
        if fail {
            self.failures.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(operation, "chaos: injected store failure");
            return Err(StoreError::Unavailable(format!("chaos: {operation} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryStore for ChaoticStore {
    async fn put(&self, owner: &str, path: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.roll("put")?;
        self.inner.put(owner, path, body).await
    }

    async fn get(&self, owner: &str, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.roll("get")?;
        self.inner.get(owner, path).await
    }

    async fn delete(&self, owner: &str, path: &str) -> Result<(), StoreError> {
        self.roll("delete")?;
        self.inner.delete(owner, path).await
    }

    async fn list(&self, owner: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.roll("list")?;
        self.inner.list(owner, prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_is_per_owner() {
        let store = MemoryDirectoryStore::new();
        store.put("alice", "/pub/a", b"1".to_vec()).await.unwrap();

        assert_eq!(store.get("alice", "/pub/a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("bob", "/pub/a").await.unwrap(), None);
        assert_eq!(store.list("alice", "/pub/").await.unwrap(), vec!["/pub/a".to_string()]);

        store.delete("alice", "/pub/a").await.unwrap();
        assert_eq!(store.blob("alice", "/pub/a"), None);
        assert_eq!(store.operation_count(), 5);
    }

    #[tokio::test]
    async fn injected_write_failures_are_recorded() {
        let store = MemoryDirectoryStore::new();
        store.fail_writes_under("/pub/x/");

        assert!(store.put("alice", "/pub/x/1", vec![]).await.is_err());
        assert!(store.put("alice", "/pub/y/1", vec![]).await.is_ok());
        assert_eq!(store.writes_under("/pub/x/"), vec!["/pub/x/1".to_string()]);
        assert_eq!(store.blob("alice", "/pub/x/1"), None);
    }

    #[tokio::test]
    async fn chaos_is_reproducible() {
        let run = |seed| async move {
            let chaos = ChaoticStore::with_seed(Arc::new(MemoryDirectoryStore::new()), 0.5, seed);
            let mut outcomes = Vec::new();
            for i in 0..32 {
                outcomes.push(chaos.put("o", &format!("/p/{i}"), vec![]).await.is_ok());
            }
            (outcomes, chaos.failure_count())
        };

        let (a, failures) = run(7).await;
        let (b, _) = run(7).await;
        assert_eq!(a, b);
        assert!(failures > 0 && failures < 32);
    }

    #[tokio::test]
    async fn zero_rate_never_fails() {
        let chaos = ChaoticStore::with_seed(Arc::new(MemoryDirectoryStore::new()), 0.0, 1);
        for _ in 0..16 {
            assert!(chaos.get("o", "/p").await.is_ok());
        }
        assert_eq!(chaos.failure_count(), 0);
        assert_eq!(chaos.operation_count(), 16);
    }
}
