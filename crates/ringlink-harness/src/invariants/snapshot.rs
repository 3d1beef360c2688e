//! Observable state snapshots for invariant checking.
//!
//! A snapshot is taken after a flow completes and contains only what an
//! outside observer could see: what was written to the directory, which
//! callbacks left the device, and the counters each session reported.

use std::collections::BTreeMap;

use ringlink_app::{DispatchEvent, HandoffConfig};

use crate::sim_services::SimServices;

/// One blob in the directory.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Namespace owner
    pub owner: String,
    /// Path
    pub path: String,
    /// Body as written
    pub body: Vec<u8>,
}

/// Observable state of a handoff run.
#[derive(Debug, Clone, Default)]
pub struct HandoffSnapshot {
    /// Everything currently stored.
    pub blobs: Vec<StoredBlob>,
    /// Path prefix handoff envelopes are written under (without the id).
    pub handoff_prefix: String,
    /// Callback URLs that left the identity holder, launched or presented.
    pub callbacks: Vec<String>,
    /// Secret values that must never appear in callbacks or stored blobs.
    pub secrets: Vec<String>,
    /// Counter observations per session, in order.
    pub counter_history: BTreeMap<String, Vec<u64>>,
}

impl HandoffSnapshot {
    /// Snapshot with nothing observed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Capture directory contents and emitted callbacks.
    pub fn capture(sim: &SimServices, config: &HandoffConfig, events: &[DispatchEvent]) -> Self {
        let blobs = sim
            .directory
            .blobs()
            .into_iter()
            .map(|(owner, path, body)| StoredBlob { owner, path, body })
            .collect();
        let callbacks = events
            .iter()
            .filter_map(|event| match event {
                DispatchEvent::CallbackOpened { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect();

        Self { blobs, handoff_prefix: config.handoff_prefix(), callbacks, ..Self::default() }
    }

    /// Register a secret value to look for.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secrets.push(secret.into());
        self
    }

    /// Record a counter observation.
    pub fn record_counter(&mut self, session: impl Into<String>, counter: u64) {
        self.counter_history.entry(session.into()).or_default().push(counter);
    }

    /// Blobs stored under the handoff prefix.
    pub fn envelopes(&self) -> impl Iterator<Item = &StoredBlob> {
        self.blobs.iter().filter(|blob| blob.path.starts_with(&self.handoff_prefix))
    }
}
