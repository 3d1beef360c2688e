//! Handoff and polling configuration.

use std::time::Duration;

/// Protocol constants and limits for the secure handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffConfig {
    /// Storage namespace, e.g. `pub/ringlink.app`
    pub namespace: String,
    /// Protocol tag bound into the AAD
    pub protocol: String,
    /// Protocol version, also the storage path segment
    pub version: String,
    /// Lifetime of a handoff payload
    pub expiry: Duration,
    /// Bound on each network call (session establishment, store writes)
    pub network_timeout: Duration,
    /// Homeserver used for invite signups
    pub default_homeserver: String,
    /// App namespace for profile and follows lookups
    pub profile_app: String,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            namespace: "pub/ringlink.app".to_string(),
            protocol: "ringlink".to_string(),
            version: "v0".to_string(),
            expiry: Duration::from_secs(5 * 60),
            network_timeout: Duration::from_secs(30),
            default_homeserver: "homeserver.ringlink.app".to_string(),
            profile_app: "ringlink.app".to_string(),
        }
    }
}

/// Bounds for polling a rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between probes
    pub interval: Duration,
    /// Wall-clock cap on the whole wait
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(2), max_wait: Duration::from_secs(5 * 60) }
    }
}
