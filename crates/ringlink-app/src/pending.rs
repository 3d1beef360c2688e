//! Pending continuations and rendezvous polling.
//!
//! A request that leaves the app (a callback to another app, a QR code shown
//! to another device) is parked in [`PendingRequests`] under its correlation
//! id. The inbound callback resolves it. Waiting is always bounded, and
//! dropping the [`PendingResponse`] removes the registration.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use ringlink_core::Environment;
use tokio::sync::oneshot;

use crate::{config::PollConfig, error::ActionError};

type Waiters<T> = Arc<Mutex<HashMap<String, oneshot::Sender<T>>>>;

/// Requests waiting for an inbound response, keyed by correlation id.
pub struct PendingRequests<T> {
    waiters: Waiters<T>,
}

impl<T> Clone for PendingRequests<T> {
    fn clone(&self) -> Self {
        Self { waiters: Arc::clone(&self.waiters) }
    }
}

impl<T> Default for PendingRequests<T> {
    fn default() -> Self {
        Self { waiters: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<T: Send + 'static> PendingRequests<T> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request under `correlation_id`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the id is already waiting.
    pub fn register(&self, correlation_id: impl Into<String>) -> Result<PendingResponse<T>, ActionError> {
        let correlation_id = correlation_id.into();
        let (tx, rx) = oneshot::channel();

        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if waiters.contains_key(&correlation_id) {
            return Err(ActionError::InvalidParameter {
                name: "correlation_id",
                reason: "already pending".to_string(),
            });
        }
        waiters.insert(correlation_id.clone(), tx);

        Ok(PendingResponse { correlation_id, rx, waiters: Arc::clone(&self.waiters) })
    }

    /// Resume the request waiting on `correlation_id`.
    ///
    /// Returns false if nothing was waiting (unknown, timed out or dropped).
    pub fn resolve(&self, correlation_id: &str, value: T) -> bool {
        let sender = self.waiters.lock().unwrap_or_else(PoisonError::into_inner).remove(correlation_id);
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::debug!(correlation_id, "no pending request for response");
                false
            },
        }
    }

    /// Number of requests waiting.
    pub fn len(&self) -> usize {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one parked request.
pub struct PendingResponse<T> {
    correlation_id: String,
    rx: oneshot::Receiver<T>,
    waiters: Waiters<T>,
}

impl<T> PendingResponse<T> {
    /// Correlation id this response waits on.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the response, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, ActionError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) | Err(_) => Err(ActionError::Timeout { operation: "pending response" }),
        }
    }
}

impl<T> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.correlation_id);
    }
}

/// Probe until `probe` yields a value or `config.max_wait` elapses on the
/// environment clock.
///
/// Probe errors abort the wait. Time spent inside probes counts toward the
/// cap.
pub async fn poll_rendezvous<E, T, F, Fut>(env: &E, config: &PollConfig, mut probe: F) -> Result<T, ActionError>
where
    E: Environment,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ActionError>>,
{
    let started = env.now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let Some(value) = probe().await? {
            tracing::debug!(attempts, "rendezvous resolved");
            return Ok(value);
        }
        if env.now() - started >= config.max_wait {
            tracing::debug!(attempts, "rendezvous timed out");
            return Err(ActionError::Timeout { operation: "rendezvous" });
        }
        env.sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_resumes_waiter() {
        let pending = PendingRequests::<u32>::new();
        let response = pending.register("req-1").unwrap();
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve("req-1", 7));
        assert_eq!(response.wait(Duration::from_secs(1)).await, Ok(7));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let pending = PendingRequests::<u32>::new();
        let _first = pending.register("req-1").unwrap();
        assert!(pending.register("req-1").is_err());
    }

    #[tokio::test]
    async fn dropping_cancels() {
        let pending = PendingRequests::<u32>::new();
        let response = pending.register("req-1").unwrap();
        drop(response);

        assert!(pending.is_empty());
        assert!(!pending.resolve("req-1", 1));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let pending = PendingRequests::<u32>::new();
        let response = pending.register("req-1").unwrap();

        let result = response.wait(Duration::from_secs(30)).await;
        assert_eq!(result, Err(ActionError::Timeout { operation: "pending response" }));
        assert!(pending.is_empty());
        assert!(!pending.resolve("req-1", 1));
    }
}
