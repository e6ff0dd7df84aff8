//! Engine chấm điểm uy tín: model đã huấn luyện khi nạp được, fallback
//! luật tất định khi không, kể cả khi model lỗi lúc suy luận (NaN, lệch
//! shape) để luôn có đường thoát tất định.

// Module declarations
pub mod features;
pub mod model;

// External imports
use ethers::types::{Address, U256};

// Standard library imports
use std::collections::HashSet;
use std::fs;
use std::path::Path;

// Third party imports
use tracing::{info, warn};

// Internal imports
use crate::config::Config;
use common::codec;
use common::models::event::WalletEvent;
use common::models::score::{flag_names, FeatureVector, RiskLevel, ScoringResult};
use features::FeatureExtractor;
use model::ReputationModel;

/// Phạt điểm cho ví nằm trong blacklist
const BLACKLIST_PENALTY: f64 = 30.0;
/// Điểm gốc của fallback theo luật
const FALLBACK_BASE: f64 = 70.0;

/// Engine chấm điểm. Thuần CPU, không suspend; mọi phụ thuộc thời gian
/// được truyền qua `now_ms`.
pub struct ScoringEngine {
    model: Option<ReputationModel>,
    blacklist: HashSet<String>,
    extractor: FeatureExtractor,
}

impl ScoringEngine {
    pub fn new(model: Option<ReputationModel>, blacklist: HashSet<String>) -> Self {
        Self {
            model,
            blacklist,
            extractor: FeatureExtractor::new(),
        }
    }

    /// Dựng engine từ cấu hình: artifact nạp best-effort, lỗi nạp chỉ làm
    /// mất model (fallback vẫn hoạt động), không chặn khởi động.
    pub fn from_config(config: &Config) -> Self {
        let model = match &config.model_path {
            Some(path) => match ReputationModel::load(
                path,
                config.scaler_path.as_deref(),
                config.features_path.as_deref(),
            ) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(error = %e, "cannot load reputation model, rule-based fallback only");
                    None
                }
            },
            None => {
                info!("no MODEL_PATH configured, rule-based fallback only");
                None
            }
        };

        let blacklist = match &config.blacklist_path {
            Some(path) => load_blacklist(path),
            None => HashSet::new(),
        };

        Self::new(model, blacklist)
    }

    pub fn model_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn is_blacklisted(&self, wallet: &Address) -> bool {
        self.blacklist.contains(&codec::canonical(wallet))
    }

    /// Xóa lịch sử đặc trưng của ví khi ngừng giám sát
    pub fn forget_wallet(&self, wallet: &Address) {
        self.extractor.forget(&codec::canonical(wallet));
    }

    /// Chấm điểm một ví trên cửa sổ sự kiện cộng lịch sử đã tích lũy.
    pub fn score(
        &self,
        wallet: &Address,
        events: &[WalletEvent],
        balance: Option<U256>,
        now_ms: u64,
    ) -> ScoringResult {
        let fv = self.extractor.extract(wallet, events, balance, now_ms);
        let blacklisted = self.is_blacklisted(wallet);
        let event_count = fv.transaction_count as usize;

        let (mut raw, confidence, via_model) = match &self.model {
            Some(model) => match model.predict(&fv) {
                Ok(p) => (100.0 * p, p, true),
                Err(e) => {
                    warn!(wallet = %codec::short_address(wallet), error = %e,
                        "model inference failed, falling back to rules");
                    let (s, c) = fallback_score(&fv, blacklisted);
                    (s, c, false)
                }
            },
            None => {
                let (s, c) = fallback_score(&fv, blacklisted);
                (s, c, false)
            }
        };

        // Fallback đã tính phạt blacklist trong bảng luật của nó
        if via_model && blacklisted {
            raw -= BLACKLIST_PENALTY;
        }

        let reputation_score = raw.clamp(0.0, 100.0);
        let risk_level = RiskLevel::from_score(reputation_score);
        let flags = build_flags(&fv, blacklisted, risk_level);
        let explanation = build_explanation(reputation_score, risk_level, &fv, &flags, via_model);

        ScoringResult {
            wallet: codec::canonical(wallet),
            reputation_score,
            risk_level,
            confidence,
            features: fv,
            computed_at: now_ms / 1000,
            transaction_count: event_count,
            flags,
            explanation,
        }
    }
}

/// Fallback theo luật, tất định và đơn điệu theo "độ xấu".
/// Trả về (điểm chưa clamp, độ tin cậy).
fn fallback_score(fv: &FeatureVector, blacklisted: bool) -> (f64, f64) {
    let mut score = FALLBACK_BASE;

    // Thưởng hoạt động
    score += ((1.0 + fv.transaction_count).log10() * 2.0).min(8.0);

    // Phạt tần suất quá cao
    score -= ((fv.transactions_per_day - 50.0) * 0.3).max(0.0).min(25.0);

    // Thưởng nhịp độ vừa phải
    if fv.transactions_per_day > 0.0 && fv.transactions_per_day <= 10.0 {
        score += (fv.transactions_per_day * 0.3).min(5.0);
    }

    // Phạt giá trị trung bình lớn
    score -= (fv.avg_transaction_value.max(1.0).log10() * 2.0).min(15.0);

    // Phạt giao dịch thất bại
    score -= 4.0 * fv.failed_transactions;

    // Tuổi tài khoản
    if fv.account_age_days > 30.0 {
        score += (fv.account_age_days.max(1.0).log10() * 3.0).min(15.0);
    } else if fv.account_age_days < 1.0 {
        score -= 20.0;
    }

    if blacklisted {
        score -= BLACKLIST_PENALTY;
    }

    let confidence = (0.05 * fv.transaction_count).min(0.8).max(0.3);
    (score, confidence)
}

/// Cờ cảnh báo theo ngưỡng cố định. `new_account` chỉ phát khi đã quan sát
/// được ít nhất một sự kiện: ví chưa từng thấy không có bằng chứng về tuổi.
fn build_flags(fv: &FeatureVector, blacklisted: bool, risk_level: RiskLevel) -> Vec<String> {
    let mut flags = Vec::new();
    if blacklisted {
        flags.push(flag_names::BLACKLISTED.to_string());
    }
    if fv.failed_transactions > 10.0 {
        flags.push(flag_names::HIGH_FAILURE_RATE.to_string());
    }
    if fv.transactions_per_day > 50.0 {
        flags.push(flag_names::HIGH_FREQUENCY.to_string());
    }
    if fv.unique_counterparties > 500.0 {
        flags.push(flag_names::MANY_COUNTERPARTIES.to_string());
    }
    if fv.transaction_count > 0.0 && fv.account_age_days < 7.0 {
        flags.push(flag_names::NEW_ACCOUNT.to_string());
    }
    if fv.contract_interactions > 200.0 {
        flags.push(flag_names::HIGH_CONTRACT_ACTIVITY.to_string());
    }
    match risk_level {
        RiskLevel::Critical => flags.push(flag_names::CRITICAL_RISK.to_string()),
        RiskLevel::High => flags.push(flag_names::HIGH_RISK.to_string()),
        _ => {}
    }
    flags
}

fn build_explanation(
    score: f64,
    risk_level: RiskLevel,
    fv: &FeatureVector,
    flags: &[String],
    via_model: bool,
) -> String {
    let source = if via_model { "model" } else { "rules" };
    let factors = if flags.is_empty() {
        "no warning flags".to_string()
    } else {
        flags.join(", ")
    };
    format!(
        "Reputation {:.1} ({}) from {} events via {}; {}",
        score, risk_level, fv.transaction_count as u64, source, factors
    )
}

/// Nạp blacklist từ file JSON (mảng địa chỉ). Địa chỉ hỏng bị bỏ qua có
/// cảnh báo; file hỏng cho blacklist rỗng.
fn load_blacklist(path: &Path) -> HashSet<String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read blacklist file");
            return HashSet::new();
        }
    };
    let entries: Vec<String> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot parse blacklist file");
            return HashSet::new();
        }
    };

    let mut set = HashSet::new();
    for entry in entries {
        match codec::normalize_address(&entry) {
            Ok(normalized) => {
                set.insert(normalized.canonical);
            }
            Err(_) => warn!(address = %entry, "skipping invalid blacklist entry"),
        }
    }
    info!(count = set.len(), "blacklist loaded");
    set
}

/// Module tests
#[cfg(test)]
mod tests {
    use super::*;
    use common::models::event::{EventKind, EventStatus};
    use ethers::types::{Bytes, H256};
    use std::str::FromStr;

    const NOW_MS: u64 = 1_700_000_000_000;

    fn wallet() -> Address {
        Address::from_str("0xC188d7E186682502B0177bEbE427828e8F5daf50").unwrap()
    }

    fn engine() -> ScoringEngine {
        ScoringEngine::new(None, HashSet::new())
    }

    fn engine_with_blacklist(addr: &Address) -> ScoringEngine {
        let mut blacklist = HashSet::new();
        blacklist.insert(codec::canonical(addr));
        ScoringEngine::new(None, blacklist)
    }

    fn event(seed: u64, ts_ms: u64, value_wei: u128, success: bool) -> WalletEvent {
        WalletEvent {
            kind: EventKind::Transfer,
            tx_hash: H256::from_low_u64_be(seed),
            from: wallet(),
            to: Some(Address::from_low_u64_be(seed + 0x9000)),
            value: U256::from(value_wei),
            block_number: seed,
            timestamp: ts_ms,
            gas_price: U256::from(1_000_000_000u64),
            gas_used: U256::from(21_000u64),
            status: if success {
                EventStatus::Success
            } else {
                EventStatus::Failed
            },
            input: Bytes::default(),
            contract_address: None,
            token_symbol: None,
            token_value: None,
            method_selector: None,
            nonce: seed,
            log_index: 0,
            position: None,
        }
    }

    /// Test ví mới không có hoạt động: điểm trong [50,90], không có cờ
    /// (kịch bản subscribe-không-hoạt-động)
    #[test]
    fn test_fresh_wallet_no_activity() {
        let result = engine().score(&wallet(), &[], None, NOW_MS);
        assert!(result.reputation_score >= 50.0 && result.reputation_score <= 90.0);
        assert!(matches!(
            result.risk_level,
            RiskLevel::Low | RiskLevel::Medium
        ));
        assert_eq!(result.transaction_count, 0);
        assert!(result.flags.is_empty());
        assert!(result.confidence >= 0.0);
    }

    /// Test ví blacklist không hoạt động: điểm ≤ 70, cờ blacklisted,
    /// rủi ro HIGH hoặc CRITICAL
    #[test]
    fn test_blacklisted_wallet() {
        let target = wallet();
        let result = engine_with_blacklist(&target).score(&target, &[], None, NOW_MS);
        assert!(result.reputation_score <= 70.0);
        assert!(result.flags.iter().any(|f| f == flag_names::BLACKLISTED));
        assert!(matches!(
            result.risk_level,
            RiskLevel::High | RiskLevel::Critical
        ));
    }

    /// Test hồ sơ xấu rơi xuống CRITICAL: 20 thất bại, tần suất cao,
    /// tài khoản nửa ngày tuổi
    #[test]
    fn test_critical_profile() {
        let mut events = Vec::new();
        // 60 sự kiện trong 12 giờ → 120 tx/ngày; 20 thất bại
        for i in 0..60u64 {
            let success = i >= 20;
            events.push(event(
                i + 1,
                NOW_MS - (i * 12 * 60 * 60 * 1000) / 60,
                10u128.pow(18),
                success,
            ));
        }
        let result = engine().score(&wallet(), &events, None, NOW_MS);
        assert!(result.reputation_score < 30.0);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(result
            .flags
            .iter()
            .any(|f| f == flag_names::HIGH_FAILURE_RATE));
        assert!(result.flags.iter().any(|f| f == flag_names::HIGH_FREQUENCY));
        assert!(result.flags.iter().any(|f| f == flag_names::CRITICAL_RISK));
    }

    /// Test tính tất định: cùng đầu vào cho cùng kết quả
    #[test]
    fn test_score_stability() {
        let events: Vec<WalletEvent> = (0..10)
            .map(|i| event(i + 1, NOW_MS - (i + 1) * 3_600_000, 10u128.pow(18), true))
            .collect();
        let eng = engine();
        let first = eng.score(&wallet(), &events, None, NOW_MS);
        let second = eng.score(&wallet(), &events, None, NOW_MS);
        assert_eq!(first, second);
    }

    /// Test bất biến blacklist trên đường model: điểm sau phạt đúng bằng
    /// raw − 30 trước khi clamp
    #[test]
    fn test_model_blacklist_penalty() {
        // Model hằng: logit 0 → p = 0.5 → raw 50
        let model = {
            let dir =
                std::env::temp_dir().join(format!("sentinel-engine-{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            let model_path = dir.join("model.json");
            std::fs::write(
                &model_path,
                r#"{"feature_names":["transaction_count"],"weights":[0.0],"intercept":0.0}"#,
            )
            .unwrap();
            let model = ReputationModel::load(&model_path, None, None).unwrap();
            std::fs::remove_dir_all(&dir).ok();
            model
        };

        let target = wallet();
        let mut blacklist = HashSet::new();
        blacklist.insert(codec::canonical(&target));
        let eng = ScoringEngine::new(Some(model), blacklist);

        let result = eng.score(&target, &[], None, NOW_MS);
        assert!((result.reputation_score - 20.0).abs() < 1e-9);
        assert!(result.flags.iter().any(|f| f == flag_names::BLACKLISTED));
        // confidence là xác suất model
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }

    /// Test điểm luôn nằm trong [0,100] với hồ sơ cực đoan
    #[test]
    fn test_score_clamped() {
        let mut events = Vec::new();
        for i in 0..200u64 {
            events.push(event(i + 1, NOW_MS - i * 60_000, 10u128.pow(18), false));
        }
        let result = engine().score(&wallet(), &events, None, NOW_MS);
        assert!(result.reputation_score >= 0.0);
        assert!(result.reputation_score <= 100.0);
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    /// Test cờ new_account cần ít nhất một sự kiện
    #[test]
    fn test_new_account_requires_activity() {
        let eng = engine();
        let empty = eng.score(&wallet(), &[], None, NOW_MS);
        assert!(!empty.flags.iter().any(|f| f == flag_names::NEW_ACCOUNT));

        let one_event = vec![event(500, NOW_MS - 3_600_000, 10u128.pow(18), true)];
        let with_event = eng.score(&wallet(), &one_event, None, NOW_MS);
        assert!(with_event
            .flags
            .iter()
            .any(|f| f == flag_names::NEW_ACCOUNT));
    }
}
