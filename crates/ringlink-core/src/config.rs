//! Operational session configuration.
//!
//! Profiles tune reconnection, heartbeats and chunking. None of these values
//! affect the cryptography.

use std::time::Duration;

use ringlink_crypto::MAX_MESSAGE_LEN;
use serde::{Deserialize, Serialize};

/// Poly1305 tag appended to every transport message
const TAG_LEN: usize = 16;

/// Largest plaintext that fits in one transport message.
pub const MAX_CHUNK_LEN: usize = MAX_MESSAGE_LEN - TAG_LEN;

/// Named configuration profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseProfile {
    /// Balanced defaults
    #[default]
    Default,
    /// Fewer wakeups: slow heartbeats, patient reconnects, small chunks
    BatterySaver,
    /// Aggressive reconnects, frequent heartbeats, maximal chunks
    Performance,
}

/// Exponential backoff for reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Give up after this many attempts (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (0-based), or `None` once exhausted.
    ///
    /// Delays double per attempt and saturate at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        Some(self.initial_backoff.saturating_mul(factor).min(self.max_backoff))
    }
}

/// Session manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Profile these values were derived from
    pub profile: NoiseProfile,
    /// Reconnect backoff
    pub reconnect: ReconnectPolicy,
    /// Interval between keepalives while connected
    pub heartbeat_interval: Duration,
    /// Largest plaintext chunk handed to `encrypt`
    pub max_chunk_len: usize,
}

impl NoiseConfig {
    /// Configuration for a named profile.
    pub fn from_profile(profile: NoiseProfile) -> Self {
        match profile {
            NoiseProfile::Default => Self {
                profile,
                reconnect: ReconnectPolicy {
                    initial_backoff: Duration::from_millis(500),
                    max_backoff: Duration::from_secs(30),
                    max_attempts: Some(10),
                },
                heartbeat_interval: Duration::from_secs(30),
                max_chunk_len: 16 * 1024,
            },
            NoiseProfile::BatterySaver => Self {
                profile,
                reconnect: ReconnectPolicy {
                    initial_backoff: Duration::from_secs(5),
                    max_backoff: Duration::from_secs(300),
                    max_attempts: Some(5),
                },
                heartbeat_interval: Duration::from_secs(120),
                max_chunk_len: 4 * 1024,
            },
            NoiseProfile::Performance => Self {
                profile,
                reconnect: ReconnectPolicy {
                    initial_backoff: Duration::from_millis(100),
                    max_backoff: Duration::from_secs(5),
                    max_attempts: None,
                },
                heartbeat_interval: Duration::from_secs(10),
                max_chunk_len: MAX_CHUNK_LEN,
            },
        }
    }

    /// Chunk size actually used: configured size clamped to `1..=MAX_CHUNK_LEN`.
    pub fn effective_chunk_len(&self) -> usize {
        self.max_chunk_len.clamp(1, MAX_CHUNK_LEN)
    }

    /// Split application data into transport-sized chunks.
    ///
    /// Empty input yields a single empty chunk so that a message boundary is
    /// still transmitted.
    pub fn chunk<'a>(&self, plaintext: &'a [u8]) -> Vec<&'a [u8]> {
        if plaintext.is_empty() {
            return vec![plaintext];
        }
        plaintext.chunks(self.effective_chunk_len()).collect()
    }
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self::from_profile(NoiseProfile::Default)
    }
}
