use super::DetectorError;
use crate::config::DetectorConfig;
use log::warn;
use std::future::Future;
use std::time::Duration;

/// How often and how patiently a detector request is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    /// Delay after a failed attempt (0-based). Timeouts back off exponentially,
    /// other transport failures wait the base delay.
    pub fn delay_for(&self, attempt: u32, error: &AttemptError) -> Duration {
        match error {
            AttemptError::Timeout(_) => self.base_delay * 2u32.saturating_pow(attempt),
            AttemptError::Transport(_) => self.base_delay,
        }
    }
}

/// Failure of a single attempt before any HTTP status was received
#[derive(Debug, Clone)]
pub enum AttemptError {
    Timeout(String),
    Transport(String),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Timeout(msg) => write!(f, "timed out: {}", msg),
            AttemptError::Transport(msg) => f.write_str(msg),
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AttemptError::Timeout(err.to_string())
        } else {
            AttemptError::Transport(err.to_string())
        }
    }
}

/// Run `op` until it succeeds or `policy.max_retries` attempts have failed.
/// `op` receives the 0-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, DetectorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    "Detector request failed (attempt {}/{}): {}",
                    attempt + 1,
                    attempts,
                    err
                );
                if attempt + 1 >= attempts {
                    return Err(DetectorError::RetriesExhausted {
                        attempts,
                        last_error: err.to_string(),
                    });
                }
                tokio::time::sleep(policy.delay_for(attempt, &err)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn performs_exactly_max_retries_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_retry(&fast_policy(3), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Transport("connection refused".into()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(DetectorError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = with_retry(&fast_policy(5), |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 1 {
                    Err(AttemptError::Timeout("slow".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn timeouts_back_off_exponentially() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let timeout = AttemptError::Timeout("t".into());
        let refused = AttemptError::Transport("r".into());

        assert_eq!(policy.delay_for(0, &timeout), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &timeout), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2, &refused), Duration::from_millis(100));
    }

    #[test]
    fn zero_retries_still_makes_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_retries, 1);
    }
}
