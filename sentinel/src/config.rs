// External imports
use ethers::types::Address;

// Standard library imports
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Third party imports
use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};

/// Hằng số vận hành của pipeline giám sát
pub const LOOKBACK_BLOCKS: u64 = 20;
pub const BOOTSTRAP_MAX_BLOCKS: u64 = 10_000;
pub const BOOTSTRAP_MAX_EVENTS: usize = 20;
pub const WALLET_BUFFER_CAP: usize = 1_000;
pub const DEDUP_CACHE_PER_WALLET: usize = 1_000;
pub const BATCH_INTERVAL: Duration = Duration::from_secs(2);
pub const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(4);
pub const WALLET_SCAN_INTERVAL: Duration = Duration::from_secs(2);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(300);
pub const FLAG_CONFIRMATIONS: usize = 2;
pub const FLAG_FALLBACK_GAS: u64 = 500_000;
pub const MAX_SUBS_PER_CONN: usize = 50;
pub const SUB_BATCH_SIZE: usize = 10;
pub const SUB_BATCH_DELAY: Duration = Duration::from_secs(1);

/// Cấu hình dịch vụ, đọc từ biến môi trường (dotenv trước).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoint của chain Somnia (bắt buộc)
    pub rpc_url: String,
    /// Chain id, được đối chiếu với endpoint lúc khởi động (bắt buộc)
    pub chain_id: u64,
    /// Private key cho ghi on-chain; None = chế độ chỉ đọc
    pub private_key: Option<String>,
    /// Địa chỉ contract flag registry; None = registry tắt
    pub contract_address: Option<Address>,

    // Đường dẫn artifact của model chấm điểm
    pub model_path: Option<PathBuf>,
    pub scaler_path: Option<PathBuf>,
    pub features_path: Option<PathBuf>,
    pub blacklist_path: Option<PathBuf>,

    // Bề mặt server
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub rate_limit_max: u32,
    pub body_size_limit: usize,
    pub log_level: String,
    pub environment: String,
}

impl Config {
    /// Đọc cấu hình từ biến môi trường. Thiếu biến bắt buộc là lỗi khởi
    /// động fatal (exit code khác 0 ở main).
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let rpc_url = env::var("SOMNIA_RPC_URL")
            .map_err(|_| anyhow!("SOMNIA_RPC_URL is required"))?;
        let chain_id = env::var("SOMNIA_CHAIN_ID")
            .map_err(|_| anyhow!("SOMNIA_CHAIN_ID is required"))?
            .parse::<u64>()
            .context("SOMNIA_CHAIN_ID must be an integer")?;

        let private_key = env::var("PRIVATE_KEY").ok().filter(|s| !s.is_empty());
        let contract_address = match env::var("CONTRACT_ADDRESS").ok().filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                Address::from_str(raw.trim())
                    .map_err(|_| anyhow!("CONTRACT_ADDRESS is not a valid address: {}", raw))?,
            ),
            None => None,
        };

        Ok(Self {
            rpc_url,
            chain_id,
            private_key,
            contract_address,
            model_path: env_path("MODEL_PATH"),
            scaler_path: env_path("SCALER_PATH"),
            features_path: env_path("FEATURES_PATH"),
            blacklist_path: env_path("BLACKLIST_PATH"),
            port: env_parse("PORT", 8080)?,
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            rate_limit_max: env_parse("RATE_LIMIT_MAX", 100)?,
            body_size_limit: env_parse("BODY_SIZE_LIMIT", 1024 * 1024)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            environment: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
        })
    }

    /// Chế độ production (tắt màu log, v.v.)
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Registry chỉ khả dụng khi có địa chỉ contract
    pub fn registry_enabled(&self) -> bool {
        self.contract_address.is_some()
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key).ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("{} is invalid: {}", key, e)),
        Err(_) => Ok(default),
    }
}
