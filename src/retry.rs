use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Bounded retry with exponential backoff: `base * 2^attempt` between tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }

    /// Run `op` until it succeeds, `is_permanent` says stop, or attempts run out.
    pub fn run<T, E, F, P>(&self, label: &str, mut op: F, is_permanent: P) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if is_permanent(&e) || attempt + 1 >= self.max_attempts => return Err(e),
                Err(e) => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        backoff.as_secs_f64(),
                        e
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }

    pub async fn run_async<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 >= self.max_attempts => return Err(e),
                Err(e) => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        backoff.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, String> = instant().run(
            "insert",
            || {
                calls += 1;
                if calls < 3 { Err("busy".to_string()) } else { Ok(calls) }
            },
            |_| false,
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), String> = instant().run(
            "insert",
            || {
                calls += 1;
                Err(format!("locked #{}", calls))
            },
            |_| false,
        );
        assert_eq!(result, Err("locked #3".to_string()));
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_errors_not_retried() {
        let mut calls = 0;
        let result: Result<(), &str> = instant().run(
            "insert",
            || {
                calls += 1;
                Err("conflict")
            },
            |e| *e == "conflict",
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn async_retries() {
        let mut calls = 0;
        let result: Result<u32, String> = instant()
            .run_async("fetch", || {
                calls += 1;
                let n = calls;
                async move { if n < 2 { Err("503".to_string()) } else { Ok(n) } }
            })
            .await;
        assert_eq!(result, Ok(2));
    }
}
