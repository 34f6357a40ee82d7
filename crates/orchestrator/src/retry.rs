use notify_guard_ratelimit::{BackoffCalculator, CircuitBreaker};
use notify_guard_types::RetryPolicy;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a single attempt did not succeed
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(err) => write!(f, "{err}"),
            AttemptError::TimedOut(timeout) => {
                write!(f, "attempt timed out after {}ms", timeout.as_millis())
            }
        }
    }
}

/// Terminal result of a retried operation. `attempts` counts invocations of
/// the operation that were started.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome<T, E> {
    Success {
        value: T,
        attempts: u32,
    },
    RetryExhausted {
        attempts: u32,
        last_error: AttemptError<E>,
    },
    /// The classifier marked the failure as not worth retrying
    PermanentFailure {
        attempts: u32,
        error: E,
    },
    /// The breaker was open before an attempt could start
    CircuitOpen {
        attempts: u32,
    },
    /// Caller cancellation; never recorded against the breaker
    Cancelled {
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. }
            | RetryOutcome::RetryExhausted { attempts, .. }
            | RetryOutcome::PermanentFailure { attempts, .. }
            | RetryOutcome::CircuitOpen { attempts }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn into_result(self) -> Result<T, RetryError<E>>
    where
        E: fmt::Debug + fmt::Display,
    {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::RetryExhausted {
                attempts,
                last_error,
            } => Err(RetryError::Exhausted {
                attempts,
                last_error,
            }),
            RetryOutcome::PermanentFailure { attempts, error } => {
                Err(RetryError::Permanent { attempts, error })
            }
            RetryOutcome::CircuitOpen { attempts } => Err(RetryError::CircuitOpen { attempts }),
            RetryOutcome::Cancelled { attempts } => Err(RetryError::Cancelled { attempts }),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Debug + fmt::Display> {
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: AttemptError<E>,
    },

    #[error("permanent failure after {attempts} attempts: {error}")]
    Permanent { attempts: u32, error: E },

    #[error("circuit open after {attempts} attempts")]
    CircuitOpen { attempts: u32 },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Drives bounded-attempt execution of a provider call.
///
/// Each attempt consults the breaker, runs under the policy's per-attempt
/// timeout and races the caller's cancellation token. Between failed attempts
/// it sleeps for the backoff delay, still watching for cancellation.
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    backoff: BackoffCalculator,
}

impl RetryOrchestrator {
    pub fn new(backoff: BackoffCalculator) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &BackoffCalculator {
        &self.backoff
    }

    /// Retry every failure
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy,
        breaker: &dyn CircuitBreaker,
        cancel: &CancellationToken,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_retry_classified(operation, policy, breaker, cancel, |_| false)
            .await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry) but flattened
    /// into a `Result`
    pub async fn try_execute_with_retry<T, E, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy,
        breaker: &dyn CircuitBreaker,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Debug + fmt::Display,
    {
        self.execute_with_retry(operation, policy, breaker, cancel)
            .await
            .into_result()
    }

    /// Retry failures unless `is_permanent` says retrying cannot help
    pub async fn execute_with_retry_classified<T, E, F, Fut, C>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
        breaker: &dyn CircuitBreaker,
        cancel: &CancellationToken,
        is_permanent: C,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        C: Fn(&E) -> bool,
    {
        let max_attempts = policy.effective_attempts();
        let timeout = Duration::try_from_secs_f64(policy.timeout_seconds).unwrap_or(Duration::MAX);
        let provider_id = breaker.snapshot().provider_id;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts: attempt };
            }
            if breaker.is_open() {
                debug!(%provider_id, attempt, "circuit open, not attempting");
                return RetryOutcome::CircuitOpen { attempts: attempt };
            }

            debug!(%provider_id, attempt, max_attempts, "starting attempt");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return RetryOutcome::Cancelled { attempts: attempt + 1 };
                }
                result = tokio::time::timeout(timeout, operation(attempt)) => result,
            };
            let attempts = attempt + 1;

            let last_error = match result {
                Ok(Ok(value)) => {
                    breaker.record_success();
                    return RetryOutcome::Success { value, attempts };
                }
                Ok(Err(error)) if is_permanent(&error) => {
                    warn!(%provider_id, attempt, error = %error, "permanent failure, not retrying");
                    return RetryOutcome::PermanentFailure { attempts, error };
                }
                Ok(Err(error)) => AttemptError::Failed(error),
                Err(_elapsed) => AttemptError::TimedOut(timeout),
            };

            breaker.record_failure();
            warn!(
                metric = "retry_attempt_failed",
                %provider_id,
                attempt,
                max_attempts,
                error = %last_error,
                "delivery attempt failed"
            );

            if attempts >= max_attempts {
                return RetryOutcome::RetryExhausted {
                    attempts,
                    last_error,
                };
            }

            let delay = self.backoff.delay_for(attempt, policy);
            debug!(%provider_id, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return RetryOutcome::Cancelled { attempts };
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempt = attempts;
        }
    }
}
