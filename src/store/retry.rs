use std::future::Future;
use std::time::Duration;

/// Capped linear backoff: the delay before retry `n` is `min(n * step, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_millis(200),
            cap: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects, or the attempts are
    /// used up. The last error is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) if attempt < self.max_attempts && retryable(&err) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        "[Store] {what} failed (attempt {attempt}/{}), retrying in {delay:?}: {err}",
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn linear_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(600));
        assert_eq!(policy.delay(5), Duration::from_millis(1000));
        assert_eq!(policy.delay(9), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let res: Result<(), String> = RetryPolicy::default()
            .run(
                "ping",
                |_: &String| true,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("connection refused".to_string())
                },
            )
            .await;

        assert_eq!(res.unwrap_err(), "connection refused");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let calls = &AtomicU32::new(0);
        let res: Result<u32, String> = RetryPolicy::default()
            .run(
                "ping",
                |_: &String| true,
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 2 {
                        Err("timeout".to_string())
                    } else {
                        Ok(n)
                    }
                },
            )
            .await;

        assert_eq!(res.unwrap(), 2);
    }

    #[tokio::test]
    async fn does_not_retry_rejected_errors() {
        let calls = &AtomicU32::new(0);
        let res: Result<(), String> = RetryPolicy::default()
            .run(
                "ping",
                |_: &String| false,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("WRONGTYPE".to_string())
                },
            )
            .await;

        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
