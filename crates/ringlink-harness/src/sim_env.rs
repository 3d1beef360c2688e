//! Simulated environments.
//!
//! [`SimEnv`] replaces the OS clock and CSPRNG with a virtual clock and a
//! seeded ChaCha20 stream. Two environments built from the same seed produce
//! the same ids, ephemerals and nonces, so every handshake and handoff
//! replays byte for byte.
//!
//! [`FailingEntropyEnv`] reports its random source as unavailable, for
//! checking that every operation needing randomness fails closed.

#![allow(clippy::disallowed_types, reason = "Locking simulation RNG and clock state")]

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use ringlink_core::{EntropyError, Environment};

/// Unix time (ms) the virtual wall clock starts at: 2024-01-01T00:00:00Z.
pub const SIM_WALL_CLOCK_START_MS: u64 = 1_704_067_200_000;

/// Deterministic environment with a virtual clock.
///
/// `sleep` advances the clock immediately and completes without yielding, so
/// polling loops run to their deadline in zero real time.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    elapsed: Arc<Mutex<Duration>>,
}

impl SimEnv {
    /// Create an environment from a seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += duration;
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    type Instant = Duration;

    fn now(&self) -> Self::Instant {
        self.elapsed()
    }

    fn wall_clock_millis(&self) -> u64 {
        SIM_WALL_CLOCK_START_MS + self.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
        Ok(())
    }
}

/// Environment whose random source fails.
///
/// Time behaves like [`SimEnv`]. The first `successes` random draws succeed
/// (from a seeded stream), every later one fails.
#[derive(Clone)]
pub struct FailingEntropyEnv {
    inner: SimEnv,
    successes: usize,
    draws: Arc<AtomicUsize>,
}

impl FailingEntropyEnv {
    /// Random source that fails from the first draw.
    pub fn new() -> Self {
        Self::after(0)
    }

    /// Random source that fails after `successes` draws.
    pub fn after(successes: usize) -> Self {
        Self { inner: SimEnv::with_seed(0), successes, draws: Arc::new(AtomicUsize::new(0)) }
    }

    /// Number of draws attempted so far, including failed ones.
    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }
}

impl Default for FailingEntropyEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for FailingEntropyEnv {
    type Instant = Duration;

    fn now(&self) -> Self::Instant {
        self.inner.now()
    }

    fn wall_clock_millis(&self) -> u64 {
        self.inner.wall_clock_millis()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.inner.sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        let draw = self.draws.fetch_add(1, Ordering::SeqCst);
        if draw < self.successes {
            return self.inner.random_bytes(buffer);
        }
        Err(EntropyError::new("simulated entropy failure"))
    }
}
