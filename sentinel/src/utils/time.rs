// Standard library imports
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Third party imports
use tracing::warn;

/// Unix timestamp hiện tại (giây)
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("system clock is before the unix epoch");
            Duration::from_secs(0)
        })
        .as_secs()
}

/// Unix timestamp hiện tại (milliseconds)
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("system clock is before the unix epoch");
            Duration::from_millis(0)
        })
        .as_millis() as u64
}

/// Đổi unix timestamp (giây) sang chuỗi đọc được cho log.
pub fn timestamp_to_readable(timestamp: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("@{}", timestamp))
}

/// Bọc một future với timeout; None khi quá hạn.
pub async fn with_timeout<F, T>(future: F, timeout: Duration, op_name: &str) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Some(result),
        Err(_) => {
            warn!(op = op_name, timeout_ms = timeout.as_millis() as u64, "operation timed out");
            None
        }
    }
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_consistent() {
        let secs = current_timestamp();
        let ms = current_timestamp_ms();
        assert!(ms / 1000 >= secs);
        assert!(ms / 1000 - secs <= 1);
    }

    #[test]
    fn test_timestamp_to_readable() {
        assert_eq!(timestamp_to_readable(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(
            timestamp_to_readable(1_700_000_000),
            "2023-11-14 22:13:20 UTC"
        );
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(async { 42 }, Duration::from_millis(100), "fast").await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            tokio::time::sleep(Duration::from_millis(200)),
            Duration::from_millis(10),
            "slow",
        )
        .await;
        assert!(result.is_none());
    }
}
