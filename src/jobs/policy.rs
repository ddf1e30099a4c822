//! Retry-or-fail decisions for finished job runs.

use super::job::Job;
use crate::config::QueueSettings;
use crate::Error;
use std::time::Duration;

/// What happens to a job after a run returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry {
        delay: Duration,
        /// The account token must be refreshed before the next run.
        invalidate_token: bool,
    },
    Fail,
    Cancel,
}

/// Exponential backoff with a cap: `base * 2^(attempt - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::new(settings.base_delay(), settings.max_delay())
    }

    /// Delay before the run following run number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Classify a failed run of `job` (whose `attempt` already counts it).
    ///
    /// Validation errors never retry. A cancel request ends the job as
    /// cancelled whatever the error. `AuthExpired` earns one retry after a
    /// forced refresh; a second one is terminal. Everything else retries
    /// while attempts remain, waiting at least the error's `retry_after`.
    pub fn decide(&self, job: &Job, err: &Error) -> Decision {
        if job.cancel_requested || matches!(err, Error::Cancelled) {
            return Decision::Cancel;
        }
        if matches!(err, Error::Validation { .. }) || !job.attempts_remaining() {
            return Decision::Fail;
        }

        let invalidate_token = matches!(err, Error::AuthExpired { .. });
        if invalidate_token && job.auth_retry_used {
            return Decision::Fail;
        }

        let mut delay = self.backoff(job.attempt);
        if let Some(hint) = err.retry_after() {
            delay = delay.max(hint);
        }
        Decision::Retry {
            delay,
            invalidate_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobId, JobKind, JobStatus};
    use std::time::SystemTime;

    fn job(attempt: u32, max_attempts: u32) -> Job {
        Job {
            id: JobId::new(),
            kind: JobKind::Download,
            priority: 0,
            status: JobStatus::Running,
            attempt,
            max_attempts,
            created_at: SystemTime::now(),
            updated_at: SystemTime::now(),
            last_error: None,
            payload: serde_json::Value::Null,
            result: None,
            cancel_requested: false,
            auth_retry_used: false,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(30))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(4), Duration::from_secs(16));
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(200), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_retries_until_exhausted() {
        let p = policy();
        let err = Error::transient("download-service", "reset");
        assert_eq!(
            p.decide(&job(1, 3), &err),
            Decision::Retry {
                delay: Duration::from_secs(2),
                invalidate_token: false
            }
        );
        assert_eq!(p.decide(&job(3, 3), &err), Decision::Fail);
    }

    #[test]
    fn test_circuit_open_waits_for_breaker() {
        let err = Error::CircuitOpen {
            service: "catalog-service".into(),
            retry_after: Duration::from_secs(45),
        };
        assert_eq!(
            policy().decide(&job(1, 3), &err),
            Decision::Retry {
                delay: Duration::from_secs(45),
                invalidate_token: false
            }
        );
    }

    #[test]
    fn test_auth_expired_retries_once() {
        let p = policy();
        let err = Error::auth_expired("main", "401");
        let mut j = job(1, 5);
        assert!(matches!(
            p.decide(&j, &err),
            Decision::Retry {
                invalidate_token: true,
                ..
            }
        ));
        j.auth_retry_used = true;
        j.attempt = 2;
        assert_eq!(p.decide(&j, &err), Decision::Fail);
    }

    #[test]
    fn test_validation_and_cancellation_are_terminal() {
        let p = policy();
        assert_eq!(
            p.decide(&job(1, 5), &Error::validation("bad payload")),
            Decision::Fail
        );
        assert_eq!(p.decide(&job(1, 5), &Error::Cancelled), Decision::Cancel);
        let mut j = job(1, 5);
        j.cancel_requested = true;
        assert_eq!(
            p.decide(&j, &Error::transient("download-service", "reset")),
            Decision::Cancel
        );
    }
}
