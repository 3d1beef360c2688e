//! Standard invariant checks.

use std::collections::BTreeMap;

use ringlink_app::{HandoffCallback, SECRET_PARAMS};
use ringlink_crypto::is_sealed_envelope;

use super::{HandoffSnapshot, Invariant, InvariantResult, Violation};

fn query_keys(url: &str) -> impl Iterator<Item = &str> {
    let query = url.split_once('?').map_or("", |(_, q)| q);
    let query = query.split_once('#').map_or(query, |(q, _)| q);
    query.split('&').filter(|p| !p.is_empty()).map(|pair| pair.split_once('=').map_or(pair, |(k, _)| k))
}

/// Callback URLs never carry secret material.
///
/// No callback may have a `secret`, `session_secret` or `sessionSecret`
/// parameter, and no registered secret value may appear anywhere in it.
pub struct CallbackCarriesNoSecrets;

impl Invariant for CallbackCarriesNoSecrets {
    fn name(&self) -> &'static str {
        "callback_carries_no_secrets"
    }

    fn check(&self, state: &HandoffSnapshot) -> InvariantResult {
        for url in &state.callbacks {
            if let Some(key) = query_keys(url).find(|key| SECRET_PARAMS.contains(key)) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("callback {url} has secret parameter {key}"),
                });
            }
            if state.secrets.iter().any(|secret| !secret.is_empty() && url.contains(secret.as_str())) {
                return Err(Violation { invariant: self.name(), message: format!("callback {url} contains a secret") });
            }
        }
        Ok(())
    }
}

/// Each stored envelope is referenced by exactly one handoff callback.
///
/// Envelopes nobody was told about are orphans; two callbacks naming the
/// same envelope mean a request id was reused.
pub struct OneEnvelopePerCallback;

impl Invariant for OneEnvelopePerCallback {
    fn name(&self) -> &'static str {
        "one_envelope_per_callback"
    }

    fn check(&self, state: &HandoffSnapshot) -> InvariantResult {
        let mut references: BTreeMap<String, usize> = BTreeMap::new();
        for url in &state.callbacks {
            if let Ok(callback) = HandoffCallback::parse(url) {
                let path = format!("{}{}", state.handoff_prefix, callback.request_id);
                *references.entry(path).or_default() += 1;
            }
        }

        if let Some((path, count)) = references.iter().find(|(_, count)| **count > 1) {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{count} callbacks reference {path}"),
            });
        }
        for envelope in state.envelopes() {
            if !references.contains_key(&envelope.path) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("envelope {} has no callback", envelope.path),
                });
            }
        }
        Ok(())
    }
}

/// Everything under the handoff prefix is a sealed envelope with no
/// plaintext secret inside.
pub struct EnvelopesAreSealed;

impl Invariant for EnvelopesAreSealed {
    fn name(&self) -> &'static str {
        "envelopes_are_sealed"
    }

    fn check(&self, state: &HandoffSnapshot) -> InvariantResult {
        for envelope in state.envelopes() {
            if !is_sealed_envelope(&envelope.body) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{} is not a sealed envelope", envelope.path),
                });
            }
            let body = String::from_utf8_lossy(&envelope.body);
            if state.secrets.iter().any(|secret| !secret.is_empty() && body.contains(secret.as_str())) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{} contains a plaintext secret", envelope.path),
                });
            }
        }
        Ok(())
    }
}

/// Session counters never decrease.
pub struct CounterMonotonicity;

impl Invariant for CounterMonotonicity {
    fn name(&self) -> &'static str {
        "counter_monotonicity"
    }

    fn check(&self, state: &HandoffSnapshot) -> InvariantResult {
        for (session, history) in &state.counter_history {
            for window in history.windows(2) {
                if window[1] < window[0] {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("session {session}: counter decreased {} -> {}", window[0], window[1]),
                    });
                }
            }
        }
        Ok(())
    }
}
