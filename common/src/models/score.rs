// Standard library imports
use std::fmt;
use std::str::FromStr;

// Third party imports
use serde::{Deserialize, Serialize};

// Internal imports
use crate::error::SentinelError;

/// Ngưỡng điểm phân loại rủi ro
pub const LOW_THRESHOLD: f64 = 70.0;
pub const MEDIUM_THRESHOLD: f64 = 50.0;
pub const HIGH_THRESHOLD: f64 = 30.0;

/// Mức rủi ro suy ra từ điểm uy tín. Mã hóa on-chain là 0=LOW .. 3=CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Suy ra mức rủi ro từ điểm uy tín theo ngưỡng cố định:
    /// LOW ≥ 70, MEDIUM ≥ 50, HIGH ≥ 30, CRITICAL < 30.
    pub fn from_score(score: f64) -> Self {
        if score >= LOW_THRESHOLD {
            RiskLevel::Low
        } else if score >= MEDIUM_THRESHOLD {
            RiskLevel::Medium
        } else if score >= HIGH_THRESHOLD {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    /// Mã hóa on-chain (uint8)
    pub fn as_u8(&self) -> u8 {
        match self {
            RiskLevel::Low => 0,
            RiskLevel::Medium => 1,
            RiskLevel::High => 2,
            RiskLevel::Critical => 3,
        }
    }

    /// Giải mã từ uint8 on-chain
    pub fn from_u8(value: u8) -> Result<Self, SentinelError> {
        match value {
            0 => Ok(RiskLevel::Low),
            1 => Ok(RiskLevel::Medium),
            2 => Ok(RiskLevel::High),
            3 => Ok(RiskLevel::Critical),
            other => Err(SentinelError::InvalidRiskLevel(other.to_string())),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RiskLevel {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(SentinelError::InvalidRiskLevel(other.to_string())),
        }
    }
}

/// Vector đặc trưng cố định trích xuất từ lịch sử sự kiện của một ví.
/// Giá trị native tính theo đơn vị token (không phải wei). Các đặc trưng
/// đồ thị tùy chọn mặc định 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub transaction_count: f64,
    pub transactions_per_day: f64,
    pub avg_transaction_value: f64,
    pub min_transaction_value: f64,
    pub max_transaction_value: f64,
    pub account_age_days: f64,
    pub days_since_last_tx: f64,
    pub active_days: f64,
    pub unique_counterparties: f64,
    pub contract_interactions: f64,
    pub failed_transactions: f64,
    pub gas_usage_pattern: f64,
    pub total_volume: f64,
    pub balance: f64,
    pub avg_gas_price: f64,
    /// avg_value / max_value, thuộc [0,1]
    pub value_concentration: f64,
    /// Entropy chuẩn hóa của histogram theo giờ, thuộc [0,1]
    pub time_distribution: f64,
    /// 1 − var(Δt)/mean(Δt)², chặn dưới 0
    pub activity_consistency: f64,
    #[serde(default)]
    pub clustering_coefficient: f64,
    #[serde(default)]
    pub page_rank: f64,
}

impl FeatureVector {
    /// Tra cứu đặc trưng theo tên khai báo của model. Tên không biết
    /// trả về None (model sẽ dùng 0).
    pub fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "transaction_count" => self.transaction_count,
            "transactions_per_day" => self.transactions_per_day,
            "avg_transaction_value" => self.avg_transaction_value,
            "min_transaction_value" => self.min_transaction_value,
            "max_transaction_value" => self.max_transaction_value,
            "account_age_days" => self.account_age_days,
            "days_since_last_tx" => self.days_since_last_tx,
            "active_days" => self.active_days,
            "unique_counterparties" => self.unique_counterparties,
            "contract_interactions" => self.contract_interactions,
            "failed_transactions" => self.failed_transactions,
            "gas_usage_pattern" => self.gas_usage_pattern,
            "total_volume" => self.total_volume,
            "balance" => self.balance,
            "avg_gas_price" => self.avg_gas_price,
            "value_concentration" => self.value_concentration,
            "time_distribution" => self.time_distribution,
            "activity_consistency" => self.activity_consistency,
            "clustering_coefficient" => self.clustering_coefficient,
            "page_rank" => self.page_rank,
            _ => return None,
        };
        Some(value)
    }
}

/// Kết quả chấm điểm một ví tại một thời điểm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringResult {
    /// Địa chỉ canonical lowercase
    pub wallet: String,
    /// Điểm uy tín thuộc [0,100], cao hơn = an toàn hơn
    pub reputation_score: f64,
    pub risk_level: RiskLevel,
    /// Độ tin cậy thuộc [0,1]
    pub confidence: f64,
    pub features: FeatureVector,
    /// Unix timestamp (giây) lúc tính điểm
    pub computed_at: u64,
    /// Số sự kiện đã dùng để tính
    pub transaction_count: usize,
    pub flags: Vec<String>,
    pub explanation: String,
}

impl ScoringResult {
    /// Thay đổi đáng kể so với điểm trước: |Δ| ≥ 5 hoặc đổi mức rủi ro.
    pub fn is_significant_change(&self, previous: &ScoringResult) -> bool {
        (self.reputation_score - previous.reputation_score).abs() >= 5.0
            || self.risk_level != previous.risk_level
    }
}

/// Tên cờ chuẩn trong ScoringResult::flags
pub mod flag_names {
    pub const BLACKLISTED: &str = "blacklisted";
    pub const HIGH_FAILURE_RATE: &str = "high_failure_rate";
    pub const HIGH_FREQUENCY: &str = "high_frequency";
    pub const MANY_COUNTERPARTIES: &str = "many_counterparties";
    pub const NEW_ACCOUNT: &str = "new_account";
    pub const HIGH_CONTRACT_ACTIVITY: &str = "high_contract_activity";
    pub const CRITICAL_RISK: &str = "critical_risk";
    pub const HIGH_RISK: &str = "high_risk";
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;

    /// Test ngưỡng phân loại rủi ro, kể cả biên chính xác
    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(70.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(69.999), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(49.999), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(29.999), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Critical);
    }

    /// Test mã hóa on-chain vòng tròn
    #[test]
    fn test_risk_level_u8_roundtrip() {
        for level in [
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
            RiskLevel::Critical,
        ] {
            assert_eq!(RiskLevel::from_u8(level.as_u8()).unwrap(), level);
        }
        assert!(RiskLevel::from_u8(4).is_err());
    }

    /// Test parse từ chuỗi
    #[test]
    fn test_risk_level_from_str() {
        assert_eq!("critical".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
        assert_eq!("LOW".parse::<RiskLevel>().unwrap(), RiskLevel::Low);
        assert!("extreme".parse::<RiskLevel>().is_err());
    }

    /// Test phát hiện thay đổi đáng kể
    #[test]
    fn test_significant_change() {
        let base = ScoringResult {
            wallet: "0xabc".to_string(),
            reputation_score: 60.0,
            risk_level: RiskLevel::Medium,
            confidence: 0.5,
            features: FeatureVector::default(),
            computed_at: 0,
            transaction_count: 0,
            flags: vec![],
            explanation: String::new(),
        };

        let mut small = base.clone();
        small.reputation_score = 62.0;
        assert!(!small.is_significant_change(&base));

        let mut big = base.clone();
        big.reputation_score = 66.0;
        assert!(big.is_significant_change(&base));

        // Đổi mức rủi ro luôn đáng kể dù Δ nhỏ
        let mut at_edge = base.clone();
        at_edge.reputation_score = 50.1;
        let mut level_change = base.clone();
        level_change.reputation_score = 49.9;
        level_change.risk_level = RiskLevel::High;
        assert!(level_change.is_significant_change(&at_edge));
    }

    /// Test serde dùng tên UPPERCASE cho risk level
    #[test]
    fn test_risk_level_serde() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"CRITICAL\""
        );
        let parsed: RiskLevel = serde_json::from_str("\"MEDIUM\"").unwrap();
        assert_eq!(parsed, RiskLevel::Medium);
    }
}
