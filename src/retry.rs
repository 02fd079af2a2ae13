//! Bounded retry for transient retrieval failures.
//!
//! Image pulls get a fixed number of attempts inside a fixed total window;
//! the window is split into equal waits instead of backing off, so the worst
//! case time to give up is known up front.

use crate::config::ImagePullRetry;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Waits that [`retry_fixed_window`] sleeps between attempts.
pub fn retry_schedule(policy: &ImagePullRetry) -> Vec<Duration> {
    let wait = policy.wait_between_attempts();
    (1..policy.max_attempts).map(|_| wait).collect()
}

/// Run `operation` until it succeeds, `should_retry` says no, or the attempt
/// cap is reached.
pub fn retry_fixed_window<T, E, F, R>(
    policy: &ImagePullRetry,
    operation_name: &str,
    mut operation: F,
    should_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    retry_with_sleep(policy, operation_name, &mut operation, should_retry, thread::sleep)
}

fn retry_with_sleep<T, E, F, R, S>(
    policy: &ImagePullRetry,
    operation_name: &str,
    operation: &mut F,
    should_retry: R,
    mut sleep: S,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
    S: FnMut(Duration),
    E: std::fmt::Display,
{
    let delay = policy.wait_between_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation() {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = %operation_name,
                        attempts = attempt,
                        "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempts = attempt,
                        error = %e,
                        "operation failed after max attempts"
                    );
                    return Err(e);
                }

                if !should_retry(&e) {
                    debug!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "operation failed with non-retryable error"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "operation failed, will retry"
                );
                sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, total_window_secs: u64) -> ImagePullRetry {
        ImagePullRetry {
            max_attempts,
            total_window_secs,
        }
    }

    #[test]
    fn test_schedule_fits_the_window() {
        let p = policy(5, 120);
        let schedule = retry_schedule(&p);
        assert_eq!(schedule.len(), 4);
        assert!(schedule.iter().all(|d| *d == Duration::from_secs(30)));
        assert_eq!(schedule.iter().sum::<Duration>(), Duration::from_secs(120));

        assert!(retry_schedule(&policy(1, 120)).is_empty());
    }

    #[test]
    fn test_retries_until_success() {
        let mut calls = 0;
        let mut slept = Vec::new();
        let result: Result<u32, String> = retry_with_sleep(
            &policy(5, 8),
            "pull",
            &mut || {
                calls += 1;
                if calls < 3 {
                    Err("toomanyrequests".to_string())
                } else {
                    Ok(calls)
                }
            },
            |_| true,
            |d| slept.push(d),
        );
        assert_eq!(result, Ok(3));
        assert_eq!(slept, vec![Duration::from_secs(2); 2]);
    }

    #[test]
    fn test_gives_up_at_the_cap() {
        let mut calls = 0;
        let mut slept = Duration::ZERO;
        let result: Result<(), String> = retry_with_sleep(
            &policy(3, 10),
            "pull",
            &mut || {
                calls += 1;
                Err("down".to_string())
            },
            |_| true,
            |d| slept += d,
        );
        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert!(slept <= Duration::from_secs(10));
    }

    #[test]
    fn test_non_retryable_error_stops_immediately() {
        let mut calls = 0;
        let result: Result<(), String> = retry_with_sleep(
            &policy(5, 10),
            "pull",
            &mut || {
                calls += 1;
                Err("unauthorized".to_string())
            },
            |e| !e.contains("unauthorized"),
            |_| panic!("must not sleep"),
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
