// src/pipeline/retry.rs
use crate::errors::LumenError;
use log::{error, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts made for rate-limited calls.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Upper bound of the random term added after each doubling.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(3000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

/// Runs external calls with exponential backoff on rate limiting. Every other
/// error is returned after the first attempt.
#[derive(Debug, Clone, Default)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn invoke<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, LumenError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LumenError>>,
    {
        let attempts = self.policy.max_retries.max(1);
        let mut delay = self.policy.initial_delay;

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(LumenError::RateLimited { retry_after }) => {
                    if attempt == attempts {
                        break;
                    }
                    let wait = retry_after.map_or(delay, |hint| hint.max(delay));
                    warn!(
                        "{}: rate limited (attempt {}/{}), retrying in {:?}",
                        label, attempt, attempts, wait
                    );
                    tokio::time::sleep(wait).await;
                    delay = delay * 2 + self.jitter();
                }
                Err(e) => return Err(e),
            }
        }

        error!("{}: still rate limited after {} attempts", label, attempts);
        Err(LumenError::ServiceBusy)
    }

    fn jitter(&self) -> Duration {
        let max = self.policy.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn rate_limited() -> LumenError {
        LumenError::RateLimited { retry_after: None }
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_exhausts_attempts_then_reports_busy() {
        let invoker = RetryingInvoker::default();
        let calls = Arc::new(Mutex::new(0u32));

        let result: Result<(), _> = invoker
            .invoke("test", || {
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(rate_limited())
                }
            })
            .await;

        assert!(matches!(result, Err(LumenError::ServiceBusy)));
        assert_eq!(*calls.lock().unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let invoker = RetryingInvoker::default();
        let calls = Arc::new(Mutex::new(0u32));

        let result: Result<(), _> = invoker
            .invoke("test", || {
                let calls = calls.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(LumenError::PermissionDenied("bad key".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(LumenError::PermissionDenied(_))));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_starts_at_initial_delay_and_at_least_doubles() {
        let invoker = RetryingInvoker::default();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let _: Result<(), _> = invoker
            .invoke("test", || {
                let stamps = stamps.clone();
                async move {
                    stamps.lock().unwrap().push(Instant::now());
                    Err(rate_limited())
                }
            })
            .await;

        let stamps = stamps.lock().unwrap();
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 4);
        assert_eq!(gaps[0], Duration::from_millis(3000));
        for pair in gaps.windows(2) {
            assert!(pair[1] >= pair[0] * 2, "{:?}", gaps);
            assert!(pair[1] <= pair[0] * 2 + Duration::from_millis(1000), "{:?}", gaps);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_fifth_attempt() {
        let invoker = RetryingInvoker::default();
        let calls = Arc::new(Mutex::new(0u32));

        let result = invoker
            .invoke("test", || {
                let calls = calls.clone();
                async move {
                    let mut n = calls.lock().unwrap();
                    *n += 1;
                    if *n < 5 { Err(rate_limited()) } else { Ok(*n) }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn server_hint_only_lengthens_the_wait() {
        let invoker = RetryingInvoker::default();
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let _ = invoker
            .invoke("test", || {
                let stamps = stamps.clone();
                async move {
                    let mut stamps = stamps.lock().unwrap();
                    stamps.push(Instant::now());
                    if stamps.len() == 1 {
                        Err(LumenError::RateLimited {
                            retry_after: Some(Duration::from_secs(10)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps[1] - stamps[0], Duration::from_secs(10));
    }
}
