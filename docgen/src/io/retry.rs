//! Exponential backoff for model transport calls.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::io::cancel::CancelToken;

/// Retry ceiling and backoff shape for one model request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-indexed), capped at `max_delay_ms`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exp = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_factor.powi(exp);
        let capped = base.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    fn cap(&self, delay: Duration) -> Duration {
        delay.min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Classification of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Rate limits, server errors, timeouts: worth another attempt.
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Authentication and request errors: retrying cannot help.
    Fatal(String),
}

impl AttemptError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, exhausts the policy, or the
/// request is cancelled. `op` receives the 1-indexed attempt number.
pub fn retry_with_backoff<T, F>(policy: &RetryPolicy, cancel: &CancelToken, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> std::result::Result<T, AttemptError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        cancel.check()?;
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(message)) => {
                warn!(attempt, error = %message, "model request rejected");
                return Err(TransportError::Rejected(message).into());
            }
            Err(AttemptError::Retryable {
                message,
                retry_after,
            }) => {
                if attempt >= max_attempts {
                    warn!(attempt, error = %message, "model request retries exhausted");
                    return Err(TransportError::Exhausted {
                        attempts: attempt,
                        last_error: message,
                    }
                    .into());
                }
                let backoff = policy.delay_for_retry(attempt);
                let delay = policy.cap(retry_after.map_or(backoff, |hint| hint.max(backoff)));
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %message, "retrying model request");
                cancel.sleep(delay)?;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Cancelled;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            backoff_factor: 2.0,
            max_delay_ms: 5,
        }
    }

    #[test]
    fn delays_grow_exponentially_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 200,
            backoff_factor: 2.0,
            max_delay_ms: 700,
        };
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(700));
    }

    #[test]
    fn retries_transient_errors_then_succeeds() {
        let mut seen = Vec::new();
        let value = retry_with_backoff(&fast_policy(3), &CancelToken::new(), |attempt| {
            seen.push(attempt);
            if attempt < 3 {
                Err(AttemptError::retryable("503"))
            } else {
                Ok("ok")
            }
        })
        .expect("retry");
        assert_eq!(value, "ok");
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn exhaustion_reports_last_error() {
        let err = retry_with_backoff::<(), _>(&fast_policy(2), &CancelToken::new(), |_| {
            Err(AttemptError::retryable("429 too many requests"))
        })
        .expect_err("should exhaust");
        assert_eq!(
            err.downcast_ref::<TransportError>(),
            Some(&TransportError::Exhausted {
                attempts: 2,
                last_error: "429 too many requests".to_string()
            })
        );
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let mut calls = 0;
        let err = retry_with_backoff::<(), _>(&fast_policy(5), &CancelToken::new(), |_| {
            calls += 1;
            Err(AttemptError::Fatal("401 unauthorized".to_string()))
        })
        .expect_err("should fail");
        assert_eq!(calls, 1);
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::Rejected(_))
        ));
    }

    #[test]
    fn cancelled_token_stops_before_first_attempt() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = retry_with_backoff::<(), _>(&fast_policy(5), &cancel, |_| Ok(()))
            .expect_err("should be cancelled");
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }
}
