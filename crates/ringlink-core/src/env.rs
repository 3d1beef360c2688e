//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). The
//! production [`SystemEnv`](crate::SystemEnv) uses the OS clock and CSPRNG;
//! the simulation harness substitutes a seeded RNG and a virtual clock, or an
//! entropy source that always fails.

use std::{future::Future, ops::Sub, time::Duration};

use crate::error::EntropyError;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production,
///   and reports failure instead of degrading to a weaker source
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Milliseconds since the Unix epoch, used for payload timestamps.
    fn wall_clock_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (polling loops, retries) should await this.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills `buffer` with random bytes.
    ///
    /// # Errors
    ///
    /// `EntropyError` if no secure random source is available. Callers MUST
    /// abort the operation; there is no fallback.
    fn random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError>;

    /// Generates a fixed-size random array.
    fn random_array<const N: usize>(&self) -> Result<[u8; N], EntropyError> {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes)?;
        Ok(bytes)
    }

    /// Generates a random `u128`.
    ///
    /// Used for manager and session ids.
    fn random_u128(&self) -> Result<u128, EntropyError> {
        self.random_array::<16>().map(u128::from_be_bytes)
    }
}
