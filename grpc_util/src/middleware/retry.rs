// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::future::Future;
use std::time::{Duration, Instant};

use rc_errors::is_retryable_code;
use tonic::Status;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const RETRY_ATTEMPT_HEADER: &str = "retry-attempt";
pub const RETRY_DELAY_HEADER: &str = "retry-delay";

/// Attach the retry middleware's per-attempt headers (spec §4.B) to an outgoing
/// unary request: the idempotency key shared by every attempt of this logical
/// call, the zero-based attempt number, and — from the second attempt onward —
/// how long it's been since the first attempt, in seconds to millisecond
/// precision.
pub fn set_retry_headers<T>(request: &mut tonic::Request<T>, idempotency_key: &str, attempt: u32, elapsed: Duration) {
    let metadata = request.metadata_mut();
    if let Ok(value) = idempotency_key.parse() {
        metadata.insert(IDEMPOTENCY_KEY_HEADER, value);
    }
    if let Ok(value) = attempt.to_string().parse() {
        metadata.insert(RETRY_ATTEMPT_HEADER, value);
    }
    if attempt > 0 {
        if let Ok(value) = format!("{:.3}", elapsed.as_secs_f64()).parse() {
            metadata.insert(RETRY_DELAY_HEADER, value);
        }
    }
}

/// Exponential backoff schedule for the retry middleware, grounded in the same
/// `interval * multiplier`, capped-delay shape used for process-execution retries
/// elsewhere in this corpus (no crate pulled in for anything this small).
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

/// Unlike auth and deadline, retrying here is a plain async wrapper rather than a
/// `tower::Service`: a unary gRPC request body isn't `Clone`, so retrying at the
/// `tower` layer would mean buffering and re-encoding every request whether or not
/// it ever needs a second attempt. Retrying one level up, around the typed client
/// call the way the teacher's `proxy::server::do_one_client_call` does, re-issues
/// the original typed message for free.
///
/// Retry a unary gRPC call, re-issuing `make_call` with the same idempotency key,
/// the zero-based attempt number, and how long it's been since the first attempt
/// (spec §4.B) — callers attach these as the `idempotency-key`/`retry-attempt`/
/// `retry-delay` headers via [`set_retry_headers`]. Only retries statuses
/// [`is_retryable_code`] reports as transient; gives up after `policy.max_attempts`,
/// returning the last status.
pub async fn retry_unary<T, F, Fut>(
    policy: RetryPolicy,
    idempotency_key: &str,
    mut make_call: F,
) -> Result<T, Status>
where
    F: FnMut(&str, u32, Duration) -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        match make_call(idempotency_key, attempt, start.elapsed()).await {
            Ok(response) => return Ok(response),
            Err(status) if attempt + 1 < policy.max_attempts && is_retryable_code(status.code(), &[]) => {
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(status) => return Err(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn set_retry_headers_omits_delay_on_first_attempt() {
        let mut request = tonic::Request::new(());
        set_retry_headers(&mut request, "idem-1", 0, Duration::from_millis(5));

        let metadata = request.metadata();
        assert_eq!(metadata.get(IDEMPOTENCY_KEY_HEADER).unwrap(), "idem-1");
        assert_eq!(metadata.get(RETRY_ATTEMPT_HEADER).unwrap(), "0");
        assert!(metadata.get(RETRY_DELAY_HEADER).is_none());
    }

    #[test]
    fn set_retry_headers_includes_delay_on_later_attempts() {
        let mut request = tonic::Request::new(());
        set_retry_headers(&mut request, "idem-2", 2, Duration::from_millis(150));

        let metadata = request.metadata();
        assert_eq!(metadata.get(IDEMPOTENCY_KEY_HEADER).unwrap(), "idem-2");
        assert_eq!(metadata.get(RETRY_ATTEMPT_HEADER).unwrap(), "2");
        assert_eq!(metadata.get(RETRY_DELAY_HEADER).unwrap(), "0.150");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, Status> = retry_unary(
            RetryPolicy {
                initial_delay: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
            "key-1",
            |key, attempt, _elapsed| {
                assert_eq!(key, "key-1");
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Status::unavailable("retry me"))
                    } else {
                        assert_eq!(attempt, 2);
                        Ok("done")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Status> = retry_unary(
            RetryPolicy::default(),
            "key-2",
            |_key, _attempt, _elapsed| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Status::invalid_argument("nope")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let result: Result<(), Status> = retry_unary(policy, "key-3", |_key, _attempt, _elapsed| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Status::unavailable("still down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
