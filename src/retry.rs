//! Retry execution for database operations
//!
//! Wraps caller-supplied operations: guarantees a healthy connection before
//! every attempt and transparently re-executes on transient infrastructure
//! failures with capped exponential backoff. Application-level failures
//! propagate on first occurrence.

use crate::classify::{ErrorClassifier, PgErrorClassifier};
use crate::config::RetryConfig;
use crate::connection::{ConnectError, ConnectionManager, Connector};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Terminal failure of a retried operation.
///
/// Both arms are transparent: the underlying error keeps its identity for
/// upstream handling, whichever side of the connection boundary it came from.
#[derive(Debug, Error)]
pub enum ExecError<E>
where
    E: std::error::Error + 'static,
{
    /// The wrapped operation itself failed
    #[error(transparent)]
    Operation(E),

    /// A connection could not be established for an attempt
    #[error(transparent)]
    Connect(ConnectError),
}

impl<E> ExecError<E>
where
    E: std::error::Error + 'static,
{
    /// The failure as a plain error trait object.
    #[must_use]
    pub fn as_dyn(&self) -> &(dyn std::error::Error + 'static) {
        match self {
            Self::Operation(error) => error,
            Self::Connect(error) => error,
        }
    }
}

/// Retry schedule: attempt bound plus capped exponential backoff.
///
/// The delay before the retry that follows failed attempt *n* (1-indexed) is
/// `min(base_delay * 2^(n-1), max_delay)`. The schedule is deterministic
/// unless jitter is switched on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default schedule
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from configuration
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// Set the maximum number of attempts (clamped to at least one)
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        self
    }

    /// Set the delay before the first retry
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the ceiling on retry delays
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable delay randomization
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Maximum number of attempts
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier).min(self.max_delay);
        if self.jitter {
            apply_jitter(delay)
        } else {
            delay
        }
    }
}

/// Spread a delay by up to ±10%
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn apply_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as f64;
    let offset = (fastrand::f64() * 2.0 - 1.0) * millis * 0.1;
    if offset >= 0.0 {
        delay + Duration::from_millis(offset as u64)
    } else {
        delay.saturating_sub(Duration::from_millis((-offset) as u64))
    }
}

/// Runs caller-supplied operations against the managed connection, retrying
/// transient failures.
pub struct RetryExecutor<C: Connector> {
    manager: Arc<ConnectionManager<C>>,
    policy: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
}

impl<C: Connector> RetryExecutor<C> {
    /// Create an executor with the default policy and the PostgreSQL
    /// classifier.
    pub fn new(manager: Arc<ConnectionManager<C>>) -> Self {
        Self {
            manager,
            policy: RetryPolicy::default(),
            classifier: Arc::new(PgErrorClassifier::new()),
        }
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the failure classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// The shared connection manager behind this executor.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    /// Execute `operation` against a live connection, retrying on transient
    /// failures.
    ///
    /// A healthy connection is guaranteed before every attempt, retries
    /// included; the operation receives the live handle as its argument. On a
    /// transient failure the cached connection is discarded, the executor
    /// backs off per the policy, and the attempt is repeated. Fatal failures
    /// and exhausted attempts propagate the most recent underlying error.
    #[allow(clippy::future_not_send)]
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ExecError<E>>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut(C::Handle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, "starting database attempt");

            let failure = match self.manager.ensure_connected().await {
                Ok(handle) => match operation(handle).await {
                    Ok(value) => {
                        if attempt > 1 {
                            info!(attempt, "database operation succeeded after retries");
                        }
                        return Ok(value);
                    }
                    Err(error) => {
                        if !self.classifier.is_retriable(&error) {
                            return Err(ExecError::Operation(error));
                        }
                        ExecError::Operation(error)
                    }
                },
                Err(error) => {
                    if !self.classifier.is_retriable(&error) {
                        return Err(ExecError::Connect(error));
                    }
                    ExecError::Connect(error)
                }
            };

            // The cached handle is suspect after a transient failure.
            self.manager.invalidate();

            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %failure,
                    "transient database failure, backing off before retry"
                );
                last_error = Some(failure);
                sleep(delay).await;
            } else {
                warn!(attempt, error = %failure, "database retries exhausted");
                last_error = Some(failure);
            }
        }

        Err(last_error.expect("at least one attempt runs before exhaustion"))
    }
}
