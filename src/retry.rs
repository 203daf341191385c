//! Bounded retry for rate-limited platform calls.
//!
//! Only rate-limit signals are retried; permission and not-found failures
//! surface immediately so callers can abandon the operation while leaving
//! state as consistent as possible.

use crate::log_internal;
use serenity::http::HttpError;
use std::{future::Future, time::Duration};

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

pub fn is_rate_limited(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => {
            resp.status_code.as_u16() == 429
        }
        _ => false,
    }
}

/// A 400 or 404 from a member edit usually means the target left voice or
/// the destination channel is already gone.
pub fn is_missing_target(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => {
            matches!(resp.status_code.as_u16(), 400 | 404)
        }
        _ => false,
    }
}

/// Runs `op`, retrying up to `max_attempts` times while `retryable` holds,
/// waiting a fixed backoff between attempts.  The final error is returned
/// unchanged.
pub async fn with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && attempt < max_attempts => {
                log_internal!(
                    "Rate limited, waiting {}s (attempt {}/{})",
                    RATE_LIMIT_BACKOFF.as_secs(),
                    attempt,
                    max_attempts,
                );
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[derive(Debug, PartialEq)]
    enum FakeError {
        RateLimited,
        Fatal,
    }

    fn retryable(err: &FakeError) -> bool {
        *err == FakeError::RateLimited
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_rate_limits() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result = with_backoff(5, retryable, move || {
            let calls = Arc::clone(&calls2);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FakeError::RateLimited)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result: Result<(), _> = with_backoff(3, retryable, move || {
            let calls = Arc::clone(&calls2);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::RateLimited)
            }
        })
        .await;

        assert_eq!(result, Err(FakeError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);

        let result: Result<(), _> = with_backoff(5, retryable, move || {
            let calls = Arc::clone(&calls2);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FakeError::Fatal)
            }
        })
        .await;

        assert_eq!(result, Err(FakeError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
