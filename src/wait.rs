//! Waiting for asynchronous infrastructure transitions
//!
//! RDS operations (snapshot creation, restore, modify, delete) complete
//! asynchronously; this module provides the single generic poll-until-
//! terminal loop the orchestrator builds its three wait flavors on
//! (instance-available, instance-deleted, snapshot-available).
//!
//! Error handling on each poll runs in a fixed order: the expired-credential
//! exemption first (retrying cannot help, and continuing would mask an
//! operator configuration problem), then the per-resource-kind disposition
//! supplied by the caller.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aws::error::{self, AwsError};

/// Configuration for polling a resource until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Minimum delay between polls
    pub min_delay: Duration,
    /// Maximum delay between polls (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before giving up
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(120),
            // should be long enough, even for large instances
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// What a single poll observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The resource reached the awaited terminal state
    Ready,
    /// Not there yet; poll again after the delay
    Pending,
    /// The resource reached a terminal state other than the awaited one
    Failed(String),
}

/// How a poll error should be handled, after the expired-credential
/// exemption has already run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The error means the awaited state was reached (e.g. instance-not-found
    /// while waiting for deletion)
    Ready,
    /// Transient; poll again
    Retry,
    /// Unrecoverable; surface it
    Fatal,
}

/// Wait failures, each distinguishable by the caller.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The time budget elapsed without reaching a terminal state
    #[error("timed out waiting for {resource} after {waited:?}")]
    Timeout { resource: String, waited: Duration },

    /// The caller's cancellation signal fired
    #[error("wait for {resource} was cancelled")]
    Cancelled { resource: String },

    /// Credentials expired mid-wait; aborted without consuming the budget
    #[error("credentials expired while waiting for {resource}")]
    CredentialsExpired {
        resource: String,
        #[source]
        source: anyhow::Error,
    },

    /// The resource reached a terminal state other than the awaited one
    #[error("{resource} entered state '{state}' while waiting")]
    FailedState { resource: String, state: String },

    /// Polling failed with an error the resource kind does not tolerate
    #[error("polling {resource} failed")]
    Poll {
        resource: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Poll `poll` until it reports [`PollOutcome::Ready`], a terminal failure,
/// an intolerable error, cancellation, or the time budget runs out.
///
/// `on_error` encodes the resource kind's default reaction to poll errors;
/// it runs only after the expired-credential exemption.
pub async fn wait_until<F, Fut, E>(
    config: &WaitConfig,
    cancel: &CancellationToken,
    resource: &str,
    poll: F,
    on_error: E,
) -> Result<(), WaitError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<PollOutcome>>,
    E: Fn(&AwsError) -> ErrorDisposition,
{
    let start = std::time::Instant::now();
    let mut delay = config.min_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        if start.elapsed() >= config.timeout {
            return Err(WaitError::Timeout {
                resource: resource.to_string(),
                waited: start.elapsed(),
            });
        }

        // Poll with cancellation support, aborting the in-flight call
        let outcome = tokio::select! {
            outcome = poll() => outcome,
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled {
                    resource: resource.to_string(),
                });
            }
        };

        match outcome {
            Ok(PollOutcome::Ready) => {
                debug!(resource = %resource, attempts, "Resource reached the awaited state");
                return Ok(());
            }
            Ok(PollOutcome::Failed(state)) => {
                return Err(WaitError::FailedState {
                    resource: resource.to_string(),
                    state,
                });
            }
            Ok(PollOutcome::Pending) => {
                debug!(
                    resource = %resource,
                    attempt = attempts,
                    delay_secs = delay.as_secs(),
                    "Resource not ready, polling again"
                );
            }
            Err(e) => {
                let classified = error::find(&e);

                // Exemption: expired credentials abort immediately, however
                // much budget remains
                if classified.is_some_and(AwsError::is_credentials_expired) {
                    return Err(WaitError::CredentialsExpired {
                        resource: resource.to_string(),
                        source: e,
                    });
                }

                match classified.map_or(ErrorDisposition::Fatal, &on_error) {
                    ErrorDisposition::Ready => {
                        debug!(resource = %resource, attempts, "Poll error means the awaited state was reached");
                        return Ok(());
                    }
                    ErrorDisposition::Retry => {
                        warn!(resource = %resource, error = %e, "Poll failed, retrying");
                    }
                    ErrorDisposition::Fatal => {
                        return Err(WaitError::Poll {
                            resource: resource.to_string(),
                            source: e,
                        });
                    }
                }
            }
        }

        // Sleep with cancellation support
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                return Err(WaitError::Cancelled {
                    resource: resource.to_string(),
                });
            }
        }

        delay = (delay * 2).min(config.max_delay);
    }
}

/// Disposition most waits share: throttling is transient, everything else
/// is fatal.
pub fn retry_on_throttle(err: &AwsError) -> ErrorDisposition {
    if err.is_throttled() {
        ErrorDisposition::Retry
    } else {
        ErrorDisposition::Fatal
    }
}
