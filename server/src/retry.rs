//! Explicit retry wrapper replacing the decorator-based retry/timer found
//! in the reference implementation (REDESIGN FLAGS). A callback reports
//! each attempt's outcome as [`Attempt`]; this module owns only the
//! looping, backoff and timing/log instrumentation.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

pub enum Attempt<T, E> {
    Ok(T),
    Retryable(E),
    Fatal(E),
}

pub async fn with_retry<T, E, F, Fut>(
    label: &str,
    max_attempts: u32,
    delay: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut last_err = None;
    for attempt in 1..=max_attempts.max(1) {
        let started = Instant::now();
        match f(attempt).await {
            Attempt::Ok(value) => {
                trace!(label, attempt, elapsed_ms = started.elapsed().as_millis() as u64, "attempt succeeded");
                return Ok(value);
            }
            Attempt::Fatal(err) => return Err(err),
            Attempt::Retryable(err) => {
                warn!(
                    label,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "attempt failed, retrying"
                );
                last_err = Some(err);
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.expect("with_retry always runs at least one attempt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_ok() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry("test", 3, Duration::from_millis(1), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Attempt::Retryable("not yet")
                } else {
                    Attempt::Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retry("test", 5, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Attempt::Fatal("boom") }
        })
        .await;
        assert_eq!(result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let result: Result<u32, &str> = with_retry("test", 2, Duration::from_millis(1), |_| async {
            Attempt::Retryable("still failing")
        })
        .await;
        assert_eq!(result, Err("still failing"));
    }
}
