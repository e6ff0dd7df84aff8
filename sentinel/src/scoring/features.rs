// External imports
use ethers::types::{Address, U256};

// Standard library imports
use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Mutex;

// Third party imports
use lru::LruCache;

// Internal imports
use common::models::event::WalletEvent;
use common::models::score::FeatureVector;

/// Số sự kiện lịch sử tối đa giữ lại cho mỗi ví
pub const MAX_HISTORY: usize = 1_000;
/// Số ví tối đa trong history LRU
const MAX_TRACKED_WALLETS: usize = 10_000;

/// Giá trị chặn trên của từng đặc trưng trước khi phát ra
mod clips {
    pub const ACCOUNT_AGE_DAYS: f64 = 5.0 * 365.0;
    pub const DAYS_SINCE_LAST_TX: f64 = 365.0;
    pub const TX_COUNT: f64 = 10_000.0;
    pub const TX_PER_DAY: f64 = 10_000.0;
    pub const COUNTERPARTIES: f64 = 10_000.0;
    pub const CONTRACT_INTERACTIONS: f64 = 10_000.0;
    pub const FAILED: f64 = 10_000.0;
    pub const VALUE: f64 = 1e12;
    pub const TOTAL_VOLUME: f64 = 1e15;
    pub const GAS_USED: f64 = 30_000_000.0;
    pub const GAS_PRICE_GWEI: f64 = 1_000_000.0;
    pub const BALANCE: f64 = 1e12;
}

/// Sentinel khi ví chưa có giao dịch nào
const NO_ACTIVITY_DAYS: f64 = 365.0;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Đổi wei sang đơn vị token để đặc trưng có thang đo người đọc được.
pub fn wei_to_native(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(0.0) / 1e18
}

fn wei_to_gwei(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(0.0) / 1e9
}

/// Trích xuất đặc trưng tất định từ lịch sử sự kiện của ví. Giữ một LRU
/// lịch sử theo ví, mỗi ví tối đa `MAX_HISTORY` sự kiện mới nhất; sự kiện
/// được dedup theo tx hash và sắp theo (block, log index).
pub struct FeatureExtractor {
    history: Mutex<LruCache<String, Vec<WalletEvent>>>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_TRACKED_WALLETS).unwrap(),
            )),
        }
    }

    /// Gộp sự kiện mới vào lịch sử của ví và trả về snapshot (tối đa
    /// MAX_HISTORY sự kiện mới nhất, thứ tự thời gian tăng dần).
    pub fn merge_history(&self, wallet_key: &str, events: &[WalletEvent]) -> Vec<WalletEvent> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let existing = history.get_or_insert_mut(wallet_key.to_string(), Vec::new);

        let mut seen: HashSet<_> = existing.iter().map(|e| e.tx_hash).collect();
        for event in events {
            if seen.insert(event.tx_hash) {
                existing.push(event.clone());
            }
        }
        existing.sort_by_key(|e| e.order_key());
        if existing.len() > MAX_HISTORY {
            let excess = existing.len() - MAX_HISTORY;
            existing.drain(..excess);
        }
        existing.clone()
    }

    /// Xóa lịch sử của ví (khi unsubscribe)
    pub fn forget(&self, wallet_key: &str) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.pop(wallet_key);
    }

    /// Trích xuất FeatureVector từ cửa sổ sự kiện cộng lịch sử đã lưu.
    /// `now_ms` được truyền vào để kết quả tất định trong test.
    pub fn extract(
        &self,
        wallet: &Address,
        events: &[WalletEvent],
        balance: Option<U256>,
        now_ms: u64,
    ) -> FeatureVector {
        let key = format!("{:#x}", wallet);
        let merged = self.merge_history(&key, events);
        compute_features(wallet, &merged, balance, now_ms)
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Tính đặc trưng thuần túy trên một danh sách sự kiện đã dedup.
pub fn compute_features(
    wallet: &Address,
    events: &[WalletEvent],
    balance: Option<U256>,
    now_ms: u64,
) -> FeatureVector {
    let mut fv = FeatureVector::default();
    fv.balance = clip(balance.map(wei_to_native).unwrap_or(0.0), clips::BALANCE);

    if events.is_empty() {
        fv.days_since_last_tx = NO_ACTIVITY_DAYS;
        return fv;
    }

    let successes: Vec<&WalletEvent> = events.iter().filter(|e| e.is_success()).collect();
    let failed_count = events.len() - successes.len();

    // Tuổi tài khoản và thời gian im ắng theo timestamp block
    let min_ts = events.iter().map(|e| e.timestamp).min().unwrap_or(now_ms);
    let max_ts = events.iter().map(|e| e.timestamp).max().unwrap_or(now_ms);
    let age_days = (now_ms.saturating_sub(min_ts)) as f64 / MS_PER_DAY;
    let idle_days = (now_ms.saturating_sub(max_ts)) as f64 / MS_PER_DAY;

    fv.transaction_count = clip(events.len() as f64, clips::TX_COUNT);
    fv.account_age_days = clip(age_days, clips::ACCOUNT_AGE_DAYS);
    fv.days_since_last_tx = clip(idle_days, clips::DAYS_SINCE_LAST_TX);
    // Mẫu số tối thiểu một giờ để ví mới không chia gần 0
    fv.transactions_per_day = clip(
        events.len() as f64 / age_days.max(1.0 / 24.0),
        clips::TX_PER_DAY,
    );

    // Các aggregate theo giá trị chỉ tính sự kiện thành công
    if !successes.is_empty() {
        let values: Vec<f64> = successes.iter().map(|e| wei_to_native(e.value)).collect();
        let total: f64 = values.iter().sum();
        let max_value = values.iter().cloned().fold(0.0f64, f64::max);
        let min_value = values.iter().cloned().fold(f64::MAX, f64::min);
        let avg_value = total / values.len() as f64;

        fv.total_volume = clip(total, clips::TOTAL_VOLUME);
        fv.avg_transaction_value = clip(avg_value, clips::VALUE);
        fv.min_transaction_value = clip(min_value, clips::VALUE);
        fv.max_transaction_value = clip(max_value, clips::VALUE);
        fv.value_concentration = if max_value > 0.0 {
            (avg_value / max_value).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let gas_used: f64 = successes
            .iter()
            .map(|e| e.gas_used.to_string().parse::<f64>().unwrap_or(0.0))
            .sum::<f64>()
            / successes.len() as f64;
        fv.gas_usage_pattern = clip(gas_used, clips::GAS_USED);

        let gas_price: f64 = successes.iter().map(|e| wei_to_gwei(e.gas_price)).sum::<f64>()
            / successes.len() as f64;
        fv.avg_gas_price = clip(gas_price, clips::GAS_PRICE_GWEI);
    }

    fv.failed_transactions = clip(failed_count as f64, clips::FAILED);

    // Đối tác duy nhất, loại chính ví đang xét
    let mut counterparties: HashSet<Address> = HashSet::new();
    for event in events {
        counterparties.insert(event.from);
        if let Some(to) = event.to {
            counterparties.insert(to);
        }
    }
    counterparties.remove(wallet);
    fv.unique_counterparties = clip(counterparties.len() as f64, clips::COUNTERPARTIES);

    fv.contract_interactions = clip(
        events.iter().filter(|e| e.is_contract_interaction()).count() as f64,
        clips::CONTRACT_INTERACTIONS,
    );

    // Số ngày có hoạt động
    let active_days: HashSet<u64> = events
        .iter()
        .map(|e| e.timestamp / MS_PER_DAY as u64)
        .collect();
    fv.active_days = active_days.len() as f64;

    fv.time_distribution = hour_entropy(events);
    fv.activity_consistency = interval_consistency(events);

    fv
}

/// Entropy chuẩn hóa của histogram theo giờ trong ngày, quy ước 0·log 0 = 0.
fn hour_entropy(events: &[WalletEvent]) -> f64 {
    let mut histogram: BTreeMap<u64, u64> = BTreeMap::new();
    for event in events {
        let hour = (event.timestamp / 3_600_000) % 24;
        *histogram.entry(hour).or_insert(0) += 1;
    }
    let total = events.len() as f64;
    let entropy: f64 = histogram
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            if p > 0.0 {
                -p * p.log2()
            } else {
                0.0
            }
        })
        .sum();
    (entropy / 24f64.log2()).clamp(0.0, 1.0)
}

/// Độ đều đặn của khoảng cách giữa các sự kiện theo thứ tự thời gian:
/// max(0, 1 − var(Δt)/mean(Δt)²). Dưới 2 sự kiện trả về 0.
fn interval_consistency(events: &[WalletEvent]) -> f64 {
    if events.len() < 2 {
        return 0.0;
    }
    let mut timestamps: Vec<u64> = events.iter().map(|e| e.timestamp).collect();
    timestamps.sort_unstable();

    let deltas: Vec<f64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 / 1000.0)
        .collect();
    let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance =
        deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64;
    (1.0 - variance / (mean * mean)).max(0.0)
}

fn clip(value: f64, max: f64) -> f64 {
    value.min(max).max(0.0)
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
        Address::from_str("0x1111111111111111111111111111111111111111").unwrap()
    }

    fn counterparty(seed: u64) -> Address {
        Address::from_low_u64_be(seed + 0x2000)
    }

    fn event(seed: u64, ts_ms: u64, value_wei: u128, success: bool) -> WalletEvent {
        WalletEvent {
            kind: EventKind::Transfer,
            tx_hash: H256::from_low_u64_be(seed),
            from: wallet(),
            to: Some(counterparty(seed)),
            value: U256::from(value_wei),
            block_number: seed,
            timestamp: ts_ms,
            gas_price: U256::from(2_000_000_000u64),
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

    /// Test danh sách rỗng: sentinel 365 ngày, mọi aggregate bằng 0
    #[test]
    fn test_empty_events() {
        let fv = compute_features(&wallet(), &[], None, NOW_MS);
        assert_eq!(fv.days_since_last_tx, 365.0);
        assert_eq!(fv.transaction_count, 0.0);
        assert_eq!(fv.account_age_days, 0.0);
        assert_eq!(fv.activity_consistency, 0.0);
        assert_eq!(fv.time_distribution, 0.0);
    }

    /// Test sự kiện failed không đóng góp vào aggregate giá trị
    #[test]
    fn test_failed_excluded_from_values() {
        let events = vec![
            event(1, NOW_MS - 3_600_000, 2 * 10u128.pow(18), true),
            event(2, NOW_MS - 7_200_000, 100 * 10u128.pow(18), false),
        ];
        let fv = compute_features(&wallet(), &events, None, NOW_MS);
        assert_eq!(fv.failed_transactions, 1.0);
        assert!((fv.avg_transaction_value - 2.0).abs() < 1e-9);
        assert!((fv.max_transaction_value - 2.0).abs() < 1e-9);
        assert_eq!(fv.transaction_count, 2.0);
    }

    /// Test đối tác duy nhất không tính chính ví
    #[test]
    fn test_unique_counterparties() {
        let mut e1 = event(1, NOW_MS - 1_000_000, 10u128.pow(18), true);
        let e2 = event(2, NOW_MS - 2_000_000, 10u128.pow(18), true);
        // Tự chuyển cho mình: không thêm đối tác
        e1.to = Some(wallet());
        let fv = compute_features(&wallet(), &[e1, e2], None, NOW_MS);
        assert_eq!(fv.unique_counterparties, 1.0);
    }

    /// Test value_concentration = avg / max
    #[test]
    fn test_value_concentration() {
        let events = vec![
            event(1, NOW_MS - 1_000_000, 1 * 10u128.pow(18), true),
            event(2, NOW_MS - 2_000_000, 3 * 10u128.pow(18), true),
        ];
        let fv = compute_features(&wallet(), &events, None, NOW_MS);
        // avg 2, max 3
        assert!((fv.value_concentration - 2.0 / 3.0).abs() < 1e-9);
    }

    /// Test độ đều đặn: khoảng cách đều → 1, lệch lớn → nhỏ
    #[test]
    fn test_activity_consistency() {
        let regular: Vec<WalletEvent> = (0..5)
            .map(|i| event(i + 1, NOW_MS - i * 3_600_000, 10u128.pow(18), true))
            .collect();
        let fv = compute_features(&wallet(), &regular, None, NOW_MS);
        assert!((fv.activity_consistency - 1.0).abs() < 1e-9);

        let irregular = vec![
            event(1, NOW_MS - 10_000_000, 10u128.pow(18), true),
            event(2, NOW_MS - 9_999_000, 10u128.pow(18), true),
            event(3, NOW_MS - 100_000, 10u128.pow(18), true),
        ];
        let fv = compute_features(&wallet(), &irregular, None, NOW_MS);
        assert!(fv.activity_consistency < 0.5);
    }

    /// Test entropy giờ: một giờ duy nhất → 0
    #[test]
    fn test_time_distribution_single_hour() {
        let events: Vec<WalletEvent> = (0..4)
            .map(|i| event(i + 1, NOW_MS - i * 60_000, 10u128.pow(18), true))
            .collect();
        let fv = compute_features(&wallet(), &events, None, NOW_MS);
        assert!(fv.time_distribution < 0.05);
    }

    /// Test buffer lịch sử đúng 1000 sự kiện mới nhất
    #[test]
    fn test_history_cap() {
        let extractor = FeatureExtractor::new();
        let key = format!("{:#x}", wallet());
        let events: Vec<WalletEvent> = (0..1_005)
            .map(|i| event(i + 1, NOW_MS - (1_005 - i) * 60_000, 10u128.pow(18), true))
            .collect();
        let snapshot = extractor.merge_history(&key, &events);
        assert_eq!(snapshot.len(), MAX_HISTORY);
        // 5 sự kiện cũ nhất (block 1..=5) bị loại
        assert!(snapshot.iter().all(|e| e.block_number > 5));

        // Thêm một sự kiện mới đẩy sự kiện cũ nhất ra
        let newest = event(2_000, NOW_MS, 10u128.pow(18), true);
        let snapshot = extractor.merge_history(&key, &[newest]);
        assert_eq!(snapshot.len(), MAX_HISTORY);
        assert!(snapshot.iter().any(|e| e.block_number == 2_000));
        assert!(snapshot.iter().all(|e| e.block_number != 6));
    }

    /// Test dedup theo tx hash khi gộp lịch sử
    #[test]
    fn test_history_dedup() {
        let extractor = FeatureExtractor::new();
        let key = format!("{:#x}", wallet());
        let e = event(1, NOW_MS, 10u128.pow(18), true);
        extractor.merge_history(&key, &[e.clone()]);
        let snapshot = extractor.merge_history(&key, &[e]);
        assert_eq!(snapshot.len(), 1);
    }

    /// Test forget xóa lịch sử
    #[test]
    fn test_forget() {
        let extractor = FeatureExtractor::new();
        let key = format!("{:#x}", wallet());
        extractor.merge_history(&key, &[event(1, NOW_MS, 10u128.pow(18), true)]);
        extractor.forget(&key);
        let snapshot = extractor.merge_history(&key, &[]);
        assert!(snapshot.is_empty());
    }

    /// Test tuổi tài khoản bị chặn tại 5 năm
    #[test]
    fn test_age_clip() {
        let ancient = event(1, NOW_MS - 10 * 365 * 86_400_000u64, 10u128.pow(18), true);
        let fv = compute_features(&wallet(), &[ancient], None, NOW_MS);
        assert_eq!(fv.account_age_days, 5.0 * 365.0);
        assert_eq!(fv.days_since_last_tx, 365.0);
    }
}
