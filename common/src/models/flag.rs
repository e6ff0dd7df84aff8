// External imports
use ethers::types::{Address, H256};

// Third party imports
use serde::{Deserialize, Serialize};

// Internal imports
use super::score::RiskLevel;

/// Bản ghi on-chain về một phán quyết rủi ro nghiêm trọng. Đọc về từ
/// contract registry; hết hạn ngầm khi `now > expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletFlag {
    pub wallet: Address,
    pub is_flagged: bool,
    pub risk_level: RiskLevel,
    pub reputation_score: u64,
    /// Unix timestamp (giây) theo contract
    pub flagged_at: u64,
    pub expires_at: u64,
    pub flagged_by: Address,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
}

impl WalletFlag {
    /// Flag còn hiệu lực tại thời điểm `now_secs` không
    pub fn is_active(&self, now_secs: u64) -> bool {
        self.is_flagged && now_secs <= self.expires_at
    }
}

/// Kết quả của một lệnh ghi lên registry. "Already flagged" được coi là
/// thành công idempotent, không phải lỗi.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub already_flagged: bool,
}

impl FlagOutcome {
    pub fn success(tx_hash: H256) -> Self {
        Self {
            ok: true,
            tx_hash: Some(tx_hash),
            error: None,
            already_flagged: false,
        }
    }

    pub fn already_flagged() -> Self {
        Self {
            ok: true,
            tx_hash: None,
            error: None,
            already_flagged: true,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            tx_hash: None,
            error: Some(error.into()),
            already_flagged: false,
        }
    }
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    /// Test hiệu lực theo thời gian hết hạn
    #[test]
    fn test_flag_expiry() {
        let flag = WalletFlag {
            wallet: Address::zero(),
            is_flagged: true,
            risk_level: RiskLevel::Critical,
            reputation_score: 12,
            flagged_at: 1000,
            expires_at: 2000,
            flagged_by: Address::zero(),
            reason: "test".to_string(),
            tx_hash: None,
        };
        assert!(flag.is_active(1500));
        assert!(flag.is_active(2000));
        assert!(!flag.is_active(2001));

        let mut unflagged = flag.clone();
        unflagged.is_flagged = false;
        assert!(!unflagged.is_active(1500));
    }

    /// Test các constructor của FlagOutcome
    #[test]
    fn test_flag_outcome() {
        let ok = FlagOutcome::success(H256::from_low_u64_be(7));
        assert!(ok.ok);
        assert!(ok.tx_hash.is_some());
        assert!(!ok.already_flagged);

        let dup = FlagOutcome::already_flagged();
        assert!(dup.ok);
        assert!(dup.already_flagged);
        assert!(dup.tx_hash.is_none());

        let failed = FlagOutcome::failure("unauthorized");
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("unauthorized"));
    }
}
