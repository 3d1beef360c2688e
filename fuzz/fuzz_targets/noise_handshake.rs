//! Fuzz target for the session registry under hostile handshake traffic
//!
//! A server manager accepts arbitrary first messages and arbitrary
//! ciphertexts; a client completes against arbitrary responses.
//!
//! # Invariants
//!
//! - no operation panics on malformed input
//! - a rejected handshake message never creates a connected session
//! - read counters only grow on successful decrypts

#![no_main]

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ringlink_core::{EntropyError, Environment, ManagerRole, NoiseConfig, SessionRegistry, SessionStatus};

/// Counter-based randomness so every run is reproducible.
#[derive(Default)]
struct FuzzEnv(AtomicU64);

impl Environment for FuzzEnv {
    type Instant = Instant;

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
            chunk.copy_from_slice(&next.to_le_bytes()[..chunk.len()]);
        }
        Ok(())
    }
}

#[derive(Debug, Arbitrary)]
enum Op {
    Accept(Vec<u8>),
    Complete(Vec<u8>),
    DecryptOnServer(Vec<u8>),
    DecryptOnClient(Vec<u8>),
    Initiate([u8; 32]),
}

fuzz_target!(|ops: Vec<Op>| {
    let registry = SessionRegistry::new(FuzzEnv::default());
    let Ok(client) = registry.create_manager(ManagerRole::Client, [1; 32], "k", "d", NoiseConfig::default()) else {
        return;
    };
    let Ok(server) = registry.create_manager(ManagerRole::Server, [2; 32], "k", "s", NoiseConfig::default()) else {
        return;
    };
    let mut pending = Vec::new();

    for op in ops.into_iter().take(64) {
        match op {
            Op::Initiate(peer) => {
                if let Ok(step) = registry.initiate(client, &peer, None) {
                    pending.push(step.session_id);
                }
            },
            Op::Accept(message) => {
                let _ = registry.accept(server, &message);
            },
            Op::Complete(response) => {
                if let Some(session) = pending.pop() {
                    if registry.complete(client, session, &response).is_err() {
                        assert_ne!(registry.get_status(client, session).ok(), Some(SessionStatus::Connected));
                    }
                }
            },
            Op::DecryptOnServer(ciphertext) => {
                for info in registry.list_sessions(server).unwrap_or_default() {
                    let before = info.read_counter;
                    let ok = registry.decrypt(server, info.session_id, &ciphertext).is_ok();
                    let after = registry
                        .list_sessions(server)
                        .unwrap_or_default()
                        .into_iter()
                        .find(|i| i.session_id == info.session_id)
                        .map_or(before, |i| i.read_counter);
                    if ok {
                        assert_eq!(after, before + 1);
                    } else {
                        assert!(after <= before);
                    }
                }
            },
            Op::DecryptOnClient(ciphertext) => {
                for info in registry.list_sessions(client).unwrap_or_default() {
                    let _ = registry.decrypt(client, info.session_id, &ciphertext);
                }
            },
        }
    }
});
