// Standard library imports
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Giới hạn mặc định cho một kết nối downstream
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_MESSAGES: u32 = 100;

/// Rate limiter theo cửa sổ trượt cho nhiều key (mỗi key một cửa sổ
/// `(thời điểm bắt đầu, số message)`; cửa sổ reset khi đã trôi qua đủ lâu).
#[derive(Debug)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, (Instant, u32)>>,
    window: Duration,
    max_per_window: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max_per_window,
        }
    }

    /// Ghi nhận một message cho `key`. Trả về true nếu được phép,
    /// false nếu message này vượt giới hạn cửa sổ hiện tại.
    pub fn check(&self, key: &str) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        match windows.get_mut(key) {
            Some((window_start, count)) => {
                if now.duration_since(*window_start) >= self.window {
                    *window_start = now;
                    *count = 1;
                    true
                } else if *count >= self.max_per_window {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                windows.insert(key.to_string(), (now, 1));
                true
            }
        }
    }

    /// Giải phóng trạng thái của một key (kết nối đã đóng)
    pub fn remove(&self, key: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.remove(key);
    }

    /// Dọn các cửa sổ đã hết hạn
    pub fn cleanup(&self) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        windows.retain(|_, (start, _)| now.duration_since(*start) < self.window);
    }

    pub fn tracked_keys(&self) -> usize {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_MESSAGES)
    }
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    /// Test biên giới hạn: message thứ 100 được nhận, thứ 101 bị từ chối
    #[test]
    fn test_rate_limit_edge() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 100);
        for i in 1..=100 {
            assert!(limiter.check("conn-1"), "message {} should be allowed", i);
        }
        assert!(!limiter.check("conn-1"), "message 101 should be rejected");
    }

    /// Test các key độc lập nhau
    #[test]
    fn test_independent_keys() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        // Key khác không bị ảnh hưởng
        assert!(limiter.check("b"));
    }

    /// Test cửa sổ reset sau khi hết hạn
    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("a"));
    }

    /// Test remove và cleanup
    #[test]
    fn test_remove_and_cleanup() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 5);
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.tracked_keys(), 2);

        limiter.remove("a");
        assert_eq!(limiter.tracked_keys(), 1);

        std::thread::sleep(Duration::from_millis(20));
        limiter.cleanup();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
