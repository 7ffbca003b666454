//! Retry executor for remote calls
//!
//! Runs a single-attempt operation and decides per failure kind:
//! - `PermissionDenied` is returned on the first occurrence
//! - `NotFound` is returned immediately; callers decide whether absence is fine
//! - `Transient` is retried with exponential backoff until the budget is spent

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::client::{ClientError, ClientResult, ErrorKind, Method};
use crate::error::{ReconcileError, Result};

/// Retry budget and delay policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `retries + 1` attempts at most
    pub retries: u32,
    /// Delay before the first retry
    pub min_timeout: Duration,
    /// Upper bound for any single delay
    pub max_timeout: Duration,
    /// Growth factor applied per retry
    pub factor: f64,
    /// Multiply each delay by a random factor in `[1, 2)`
    pub randomize: bool,
    /// Limit for a single attempt; an elapsed attempt counts as transient
    ///
    /// The abandoned attempt may still have been applied by the service.
    /// A retried `CreatePolicyVersion` can then leave an extra version
    /// behind, and a retried `CreatePolicy` or `CreateRole` fails with
    /// `EntityAlreadyExists.*` until the budget is spent; the next `deploy`
    /// reads the entity back and carries on.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Policy that retries `retries` times without waiting
    pub fn immediate(retries: u32) -> Self {
        RetryPolicy {
            retries,
            min_timeout: Duration::ZERO,
            max_timeout: Duration::ZERO,
            factor: 1.0,
            randomize: false,
            attempt_timeout: None,
        }
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let mut millis = self.min_timeout.as_secs_f64() * 1000.0 * self.factor.powi(exponent);
        if self.randomize {
            millis *= rand::thread_rng().gen_range(1.0..2.0);
        }

        let max = self.max_timeout.as_secs_f64() * 1000.0;
        if !millis.is_finite() || millis > max {
            millis = max;
        }
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    /// 2 retries, 1s doubling to at most 10s, randomized, 10s per attempt
    fn default() -> Self {
        RetryPolicy {
            retries: 2,
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(10),
            factor: 2.0,
            randomize: true,
            attempt_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Executes remote calls under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Backoff { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds or fails definitively
    ///
    /// `method` and `entity` label the error returned to the caller.
    pub async fn run<T, F, Fut>(&self, method: Method, entity: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let outcome = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ClientError::timed_out(method, limit)),
                },
                None => attempt().await,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match error.kind {
                ErrorKind::PermissionDenied => {
                    warn!("{} {} denied: {}", method, entity, error);
                    return Err(ReconcileError::remote(method, entity, attempts, error));
                }
                ErrorKind::NotFound => {
                    debug!("{} {}: entity not found", method, entity);
                    return Err(ReconcileError::remote(method, entity, attempts, error));
                }
                ErrorKind::Transient => {
                    let retry = attempts - 1;
                    if retry >= self.policy.retries {
                        warn!(
                            "{} {} failed after {} attempt(s): {}",
                            method, entity, attempts, error
                        );
                        return Err(ReconcileError::remote(method, entity, attempts, error));
                    }

                    let delay = self.policy.delay(retry);
                    debug!("Error when {} {}, error is: {}", method, entity, error);
                    warn!("{} {}: retry {} time in {:?}", method, entity, retry + 1, delay);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn run_failing(backoff: &Backoff, code: &'static str, failures: u32) -> (Result<u32>, u32) {
        let counter = AtomicU32::new(0);
        let result = backoff
            .run(Method::GetPolicy, "p", || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < failures {
                        Err(ClientError::from_code(code, "boom"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        (result, counter.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let backoff = Backoff::new(RetryPolicy::immediate(3));
        let (result, calls) = run_failing(&backoff, "ServiceUnavailable", 2).await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_transient_budget_exhausted() {
        let backoff = Backoff::new(RetryPolicy::immediate(2));
        let (result, calls) = run_failing(&backoff, "Throttling", u32::MAX).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_permission_denied_is_attempted_once() {
        let backoff = Backoff::new(RetryPolicy::immediate(10));
        let (result, calls) = run_failing(&backoff, "NoPermission", u32::MAX).await;

        assert_eq!(result.unwrap_err().kind(), FailureKind::PermissionDenied);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let backoff = Backoff::new(RetryPolicy::immediate(10));
        let (result, calls) = run_failing(&backoff, "EntityNotExist.Policy", u32::MAX).await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            attempt_timeout: Some(Duration::from_millis(5)),
            ..RetryPolicy::immediate(1)
        };
        let backoff = Backoff::new(policy);
        let counter = AtomicU32::new(0);

        let result: Result<()> = backoff
            .run(Method::GetRole, "r", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(())
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            randomize: false,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(10));
    }

    #[test]
    fn test_randomized_delay_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for retry in 0..5 {
            let delay = policy.delay(retry);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= policy.max_timeout);
        }
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(5);
        assert!(policy.delay(0).is_zero());
        assert!(policy.delay(4).is_zero());
    }
}
