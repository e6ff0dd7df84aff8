// Standard library imports
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// Third party imports
use lru::LruCache;
use tokio::sync::RwLock;

/// Entry trong cache TTL
#[derive(Debug, Clone)]
struct TtlEntry<T> {
    value: T,
    expires_at: Instant,
}

/// Cache key-value trong bộ nhớ với TTL và giới hạn kích thước. Khi đầy,
/// lần insert tiếp theo dọn các entry hết hạn trước, sau đó từ chối ghi
/// đè ngoài giới hạn bằng cách bỏ entry cũ nhất.
#[derive(Debug)]
pub struct TtlCache<T> {
    entries: RwLock<HashMap<String, TtlEntry<T>>>,
    default_ttl: Duration,
    max_size: usize,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            max_size,
        }
    }

    /// Lấy giá trị còn hiệu lực
    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|entry| {
            if Instant::now() < entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Lưu giá trị với TTL mặc định
    pub async fn set(&self, key: impl Into<String>, value: T) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    /// Lưu giá trị với TTL riêng
    pub async fn set_with_ttl(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size {
            let now = Instant::now();
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_size {
                // Vẫn đầy sau khi dọn: bỏ entry gần hết hạn nhất
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key.into(),
            TtlEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Dọn các entry hết hạn, trả về số entry bị xóa
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Tập dedup bị chặn kích thước theo LRU, dùng cho cache hash giao dịch
/// của ingester: entry cũ nhất bị đẩy ra khi vượt giới hạn.
#[derive(Debug)]
pub struct DedupCache {
    seen: Mutex<LruCache<String, ()>>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Ghi nhận key; trả về true nếu key CHƯA từng thấy (caller nên xử lý),
    /// false nếu là bản sao.
    pub fn insert(&self, key: impl Into<String>) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.put(key.into(), ()).is_none()
    }

    pub fn contains(&self, key: &str) -> bool {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.contains(key)
    }

    pub fn len(&self) -> usize {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
