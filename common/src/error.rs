// Standard library imports
use std::time::Duration;

// Third party imports
use thiserror::Error;

/// Mã lỗi gửi cho client qua payload `error` (xem models::message).
pub mod codes {
    pub const INVALID_ADDRESS: &str = "INVALID_ADDRESS";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const INVALID_RISK_LEVEL: &str = "INVALID_RISK_LEVEL";
    pub const SCORE_OUT_OF_RANGE: &str = "SCORE_OUT_OF_RANGE";
    pub const BATCH_TOO_LARGE: &str = "BATCH_TOO_LARGE";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const SUBSCRIPTION_LIMIT: &str = "SUBSCRIPTION_LIMIT";
    pub const NOT_CONFIGURED: &str = "NOT_CONFIGURED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CHAIN_ERROR: &str = "CHAIN_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Lỗi nghiệp vụ của toàn hệ thống, phân loại theo chính sách lan truyền:
/// lỗi validation không bao giờ retry, lỗi chain I/O tạm thời được retry
/// trong chain client, lỗi contract được báo lên coordinator.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid risk level: {0}")]
    InvalidRiskLevel(String),

    #[error("Reputation score out of range: {0}")]
    ScoreOutOfRange(f64),

    #[error("Batch too large: {got} wallets (max {max})")]
    BatchTooLarge { got: usize, max: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0:?}: {1}")]
    Timeout(Duration, String),

    #[error("Rate limited by upstream: {0}")]
    UpstreamRateLimit(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Contract rejected call: {0}")]
    ContractRejected(String),

    #[error("Wallet already flagged: {0}")]
    AlreadyFlagged(String),

    #[error("Scoring failed: {0}")]
    ScoringFailed(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SentinelError {
    /// Lỗi chain I/O tạm thời: retry bên trong chain client trước khi
    /// báo lên trên.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SentinelError::Rpc(_)
                | SentinelError::Timeout(_, _)
                | SentinelError::UpstreamRateLimit(_)
        )
    }

    /// Mã lỗi tương ứng cho payload gửi client.
    pub fn code(&self) -> &'static str {
        match self {
            SentinelError::InvalidAddress(_) => codes::INVALID_ADDRESS,
            SentinelError::InvalidRiskLevel(_) => codes::INVALID_RISK_LEVEL,
            SentinelError::ScoreOutOfRange(_) => codes::SCORE_OUT_OF_RANGE,
            SentinelError::BatchTooLarge { .. } => codes::BATCH_TOO_LARGE,
            SentinelError::Validation(_) => codes::INVALID_MESSAGE,
            SentinelError::Rpc(_)
            | SentinelError::Timeout(_, _)
            | SentinelError::UpstreamRateLimit(_) => codes::CHAIN_ERROR,
            SentinelError::NotConfigured(_) => codes::NOT_CONFIGURED,
            SentinelError::NotFound(_) => codes::NOT_FOUND,
            _ => codes::INTERNAL_ERROR,
        }
    }
}

/// Phân loại thông báo lỗi từ provider theo chuỗi con, vì JSON-RPC không
/// trả về mã lỗi ổn định giữa các node.
pub fn classify_rpc_error(message: &str) -> SentinelError {
    let lower = message.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
        SentinelError::Timeout(Duration::from_secs(0), message.to_string())
    } else if lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        SentinelError::UpstreamRateLimit(message.to_string())
    } else if lower.contains("already flagged") || lower.contains("wallet is flagged") {
        SentinelError::AlreadyFlagged(message.to_string())
    } else if lower.contains("execution reverted") || lower.contains("revert") {
        SentinelError::ContractRejected(message.to_string())
    } else {
        SentinelError::Rpc(message.to_string())
    }
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    /// Test phân loại lỗi RPC
    #[test]
    fn test_classify_rpc_error() {
        assert!(matches!(
            classify_rpc_error("request timed out"),
            SentinelError::Timeout(_, _)
        ));
        assert!(matches!(
            classify_rpc_error("429 Too Many Requests"),
            SentinelError::UpstreamRateLimit(_)
        ));
        assert!(matches!(
            classify_rpc_error("execution reverted: wallet already flagged"),
            SentinelError::AlreadyFlagged(_)
        ));
        assert!(matches!(
            classify_rpc_error("execution reverted: invalid risk level"),
            SentinelError::ContractRejected(_)
        ));
        assert!(matches!(
            classify_rpc_error("connection refused"),
            SentinelError::Rpc(_)
        ));
    }

    /// Test phân loại transient
    #[test]
    fn test_is_transient() {
        assert!(SentinelError::Rpc("boom".into()).is_transient());
        assert!(SentinelError::Timeout(Duration::from_secs(5), "slow".into()).is_transient());
        assert!(!SentinelError::InvalidAddress("0x0".into()).is_transient());
        assert!(!SentinelError::ContractRejected("revert".into()).is_transient());
    }

    /// Test mã lỗi cho client
    #[test]
    fn test_error_codes() {
        assert_eq!(
            SentinelError::InvalidAddress("x".into()).code(),
            codes::INVALID_ADDRESS
        );
        assert_eq!(
            SentinelError::BatchTooLarge { got: 51, max: 50 }.code(),
            codes::BATCH_TOO_LARGE
        );
        assert_eq!(SentinelError::Rpc("x".into()).code(), codes::CHAIN_ERROR);
    }
}
