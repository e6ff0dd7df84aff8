// Third party imports
use serde::{Deserialize, Serialize};

// Internal imports
use super::score::ScoringResult;

/// Cấu hình ingestion cho một ví
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionConfig {
    pub include_native_transfers: bool,
    pub include_token_transfers: bool,
    pub include_internal: bool,
    /// Block bắt đầu quét lịch sử; None = từ block mới nhất
    pub start_block: Option<u64>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            include_native_transfers: true,
            include_token_transfers: true,
            include_internal: false,
            start_block: None,
        }
    }
}

/// Trạng thái của một ví đang được giám sát. Bất biến: khi `active = true`
/// có đúng một subscription upstream (push hoặc poll) cho ví này.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMonitor {
    /// Key canonical lowercase
    pub address: String,
    /// Dạng checksum để hiển thị
    pub checksummed: String,
    /// Unix ms lúc bắt đầu giám sát
    pub started_at: u64,
    /// Unix ms của hoạt động cuối
    pub last_activity: u64,
    pub event_count: u64,
    pub last_score: Option<ScoringResult>,
    pub active: bool,
    pub config: IngestionConfig,
}

impl WalletMonitor {
    pub fn new(address: String, checksummed: String, now_ms: u64, config: IngestionConfig) -> Self {
        Self {
            address,
            checksummed,
            started_at: now_ms,
            last_activity: now_ms,
            event_count: 0,
            last_score: None,
            active: true,
            config,
        }
    }
}
