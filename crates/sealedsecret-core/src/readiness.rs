//! Bounded-retry wait for a dependency that is still starting up.
//!
//! The poller calls a resolver until it succeeds, a failure is classified as
//! fatal, or the deadline passes. Waits between attempts grow exponentially
//! and are clamped so the poller never sleeps past its deadline.
//!
//! The clock is tokio's, so tests can drive it with `start_paused`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::KeyResolveError;
use crate::key::{PublicKey, PublicKeyResolver};

/// How a resolver failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The dependency is not ready yet; try again.
    Retryable,
    /// Give up immediately.
    Fatal,
}

/// Errors returned by [`ReadinessPoller`].
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The resolver never became ready within the deadline.
    #[error(
        "not ready after {}s ({attempts} attempts): {}",
        .waited.as_secs(),
        describe_last(.last)
    )]
    DeadlineExceeded {
        /// Number of resolver calls made.
        attempts: u32,
        /// Time spent waiting.
        waited: Duration,
        /// The last retryable failure, or `None` when no attempt finished.
        #[source]
        last: Option<E>,
    },

    /// The resolver failed with a non-retryable error.
    #[error(transparent)]
    Fatal(E),

    /// The caller cancelled the wait.
    #[error("readiness poll cancelled after {attempts} attempts")]
    Cancelled {
        /// Number of resolver calls made before cancellation.
        attempts: u32,
    },
}

impl<E> PollError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the underlying resolver error, if any.
    pub fn resolver_error(&self) -> Option<&E> {
        match self {
            Self::DeadlineExceeded { last, .. } => last.as_ref(),
            Self::Fatal(err) => Some(err),
            Self::Cancelled { .. } => None,
        }
    }

    /// Returns true if the deadline elapsed.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}

fn describe_last<E: std::fmt::Display>(last: &Option<E>) -> String {
    match last {
        Some(err) => err.to_string(),
        None => "resolver did not answer".to_string(),
    }
}

/// Treats "not found" and "service unavailable" as a controller still coming up.
pub fn classify_key_error(err: &KeyResolveError) -> RetryClass {
    if err.is_not_ready() {
        RetryClass::Retryable
    } else {
        RetryClass::Fatal
    }
}

/// Retries a resolver until it is ready or a deadline elapses.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    deadline: Duration,
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
}

impl ReadinessPoller {
    /// Creates a poller with the given deadline and default backoff.
    pub fn new(deadline: Duration) -> Self {
        Self::builder().deadline(deadline).build()
    }

    /// Creates a new builder.
    pub fn builder() -> ReadinessPollerBuilder {
        ReadinessPollerBuilder::default()
    }

    /// Returns the deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Returns the wait before the second attempt.
    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// Returns the longest wait between two attempts.
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    fn next_interval(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(current.as_secs_f64() * self.multiplier).min(self.max_interval)
    }

    /// Polls `resolver`, classifying failures with `classify`.
    pub async fn poll_until_ready_with<T, E, F, Fut, C>(
        &self,
        mut resolver: F,
        classify: C,
        cancel: &CancellationToken,
    ) -> Result<T, PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryClass,
        E: std::error::Error + 'static,
    {
        let started = Instant::now();
        let deadline_at = started + self.deadline;
        let mut interval = self.initial_interval;
        let mut attempts = 0u32;
        let mut last = None;

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled { attempts });
            }

            // a resolver that never answers is still bounded by cancel and the deadline
            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
                result = resolver() => Some(result),
                _ = tokio::time::sleep_until(deadline_at) => None,
            };
            let err = match outcome {
                Some(Ok(value)) => {
                    if attempts > 1 {
                        debug!("Dependency ready after {} attempts", attempts);
                    }
                    return Ok(value);
                },
                Some(Err(err)) => err,
                None => {
                    warn!(
                        "Resolver did not answer before the {:?} deadline (attempt {})",
                        self.deadline, attempts
                    );
                    return Err(PollError::DeadlineExceeded {
                        attempts,
                        waited: started.elapsed(),
                        last,
                    });
                },
            };

            if classify(&err) == RetryClass::Fatal {
                warn!("Giving up after non-retryable failure: {}", err);
                return Err(PollError::Fatal(err));
            }

            let now = Instant::now();
            if now >= deadline_at {
                warn!(
                    "Dependency still not ready after {:?} ({} attempts)",
                    self.deadline, attempts
                );
                return Err(PollError::DeadlineExceeded {
                    attempts,
                    waited: now - started,
                    last: Some(err),
                });
            }

            let pause = interval.min(deadline_at - now);
            debug!(
                "Dependency not ready (attempt {}): {}; retrying in {:?}",
                attempts, err, pause
            );
            last = Some(err);

            tokio::select! {
                _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts }),
                _ = tokio::time::sleep(pause) => {},
            }

            interval = self.next_interval(interval);
        }
    }

    /// Polls `resolver` using [`classify_key_error`].
    pub async fn poll_until_ready<T, F, Fut>(
        &self,
        resolver: F,
        cancel: &CancellationToken,
    ) -> Result<T, PollError<KeyResolveError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KeyResolveError>>,
    {
        self.poll_until_ready_with(resolver, classify_key_error, cancel)
            .await
    }

    /// Waits for `resolver` to hand out the sealing key.
    pub async fn resolve_key(
        &self,
        resolver: &dyn PublicKeyResolver,
        cancel: &CancellationToken,
    ) -> Result<PublicKey, PollError<KeyResolveError>> {
        debug!("Fetching the sealing public key");
        self.poll_until_ready(|| resolver.resolve(), cancel).await
    }
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for ReadinessPoller.
#[derive(Debug, Default)]
pub struct ReadinessPollerBuilder {
    deadline: Option<Duration>,
    initial_interval: Option<Duration>,
    max_interval: Option<Duration>,
    multiplier: Option<f64>,
}

impl ReadinessPollerBuilder {
    /// Sets the total time to wait for readiness.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the wait before the second attempt.
    pub fn initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = Some(interval);
        self
    }

    /// Sets the longest wait between two attempts.
    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }

    /// Sets the growth factor applied to the wait after each attempt.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Builds the poller.
    pub fn build(self) -> ReadinessPoller {
        let initial_interval = self
            .initial_interval
            .unwrap_or(Duration::from_millis(500));
        let max_interval = self
            .max_interval
            .unwrap_or(Duration::from_secs(10))
            .max(initial_interval);

        ReadinessPoller {
            deadline: self.deadline.unwrap_or(Duration::from_secs(180)),
            initial_interval,
            max_interval,
            multiplier: self.multiplier.unwrap_or(2.0).max(1.0),
        }
    }
}
