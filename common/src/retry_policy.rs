// Standard library imports
use std::future::Future;
use std::time::Duration;

// Third party imports
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

// Internal imports
use crate::error::SentinelError;

/// Cấu hình retry với exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Tổng số lần thử tối đa (lần đầu + retry)
    pub max_attempts: u32,
    /// Độ trễ cơ sở (milliseconds); lần thử n đợi base · 2^(n−1)
    pub base_delay_ms: u64,
    /// Độ trễ tối đa (milliseconds)
    pub max_delay_ms: u64,
    /// Hệ số jitter (0-1) để tránh thundering herd
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: 0.1,
        }
    }
}

/// Retry policy dùng chung cho mọi lời gọi chain RPC.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Độ trễ cho lần thử `attempt` (1-based), đã chặn tại max_delay,
    /// chưa cộng jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.config.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(raw.min(self.config.max_delay_ms))
    }

    /// Chạy một operation với retry. Chỉ retry khi lỗi là transient;
    /// lỗi vĩnh viễn (validation, revert) trả về ngay.
    pub async fn retry<T, F, Fut>(&self, op_name: &str, f: F) -> Result<T, SentinelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SentinelError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    let base = self.delay_for_attempt(attempt);
                    let jitter_factor = 1.0 + rand::thread_rng().gen::<f64>() * self.config.jitter;
                    let delay =
                        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64);
                    warn!(
                        op = op_name,
                        attempt,
                        max = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient error, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(op = op_name, attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter: 0.0,
        })
    }

    /// Test lịch backoff theo cấp số nhân với cận trên
    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: 0.0,
        });
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(8_000));
    }

    /// Test thành công sau lỗi transient
    #[tokio::test]
    async fn test_retry_transient_then_success() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = policy
            .retry("test_op", move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SentinelError::Rpc("connection reset".to_string()))
                    } else {
                        Ok(42u64)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Test hết ngân sách retry
    #[tokio::test]
    async fn test_retry_exhausted() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), _> = policy
            .retry("test_op", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SentinelError::Rpc("still down".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Test lỗi vĩnh viễn không retry
    #[tokio::test]
    async fn test_no_retry_on_permanent_error() {
        let policy = fast_policy();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<(), _> = policy
            .retry("test_op", move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SentinelError::InvalidAddress("0x0".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
