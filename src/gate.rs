//! Connect-with-retry gate in front of the sync engine.
//!
//! Probes the backend until it answers, pausing a constant time between
//! probes. The first successful probe runs the `on_ready` continuation and
//! ends the gate for good; running out of attempts returns
//! [`GateError::Exhausted`] without ever running it. The pause is a tokio
//! sleep, so the status server keeps answering while the gate waits.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::backend::{BackendError, SearchBackend};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub pause: Duration,
    pub probe_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.start.attempts,
            pause: Duration::from_secs(config.start.pause_seconds),
            probe_timeout: Duration::from_millis(config.elasticsearch.ping_timeout_ms),
        }
    }
}

/// Progress of the gate. `attempt` is the number of the probe about to be
/// made (or just made), starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl ConnectivityState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 1,
            max_attempts: policy.max_attempts,
            backoff: policy.pause,
        }
    }

    /// Record a failed probe. Returns `true` when no attempts are left.
    pub fn record_failure(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt > self.max_attempts
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("backend at {location} not reachable after {attempts} attempts: {last}")]
    Exhausted {
        location: String,
        attempts: u32,
        #[source]
        last: BackendError,
    },
}

pub async fn connect_with_retry<F, Fut, T>(
    backend: &dyn SearchBackend,
    policy: &RetryPolicy,
    on_ready: F,
) -> Result<T, GateError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let mut state = ConnectivityState::new(policy);

    loop {
        info!(
            location = backend.location(),
            attempt = state.attempt,
            max_attempts = state.max_attempts,
            "pinging backend"
        );

        match backend.ping(policy.probe_timeout).await {
            Ok(()) => {
                info!(location = backend.location(), "backend reachable");
                return Ok(on_ready().await);
            }
            Err(e) => {
                let failed_attempt = state.attempt;
                if state.record_failure() {
                    error!(
                        location = backend.location(),
                        attempts = failed_attempt,
                        error = %e,
                        "backend not reachable, giving up"
                    );
                    return Err(GateError::Exhausted {
                        location: backend.location().to_string(),
                        attempts: failed_attempt,
                        last: e,
                    });
                }
                warn!(
                    location = backend.location(),
                    error = %e,
                    "backend not reachable, trying again in {} seconds",
                    state.backoff.as_secs()
                );
                tokio::time::sleep(state.backoff).await;
            }
        }
    }
}
