//! Coordinator: lõi vận hành của pipeline. Sở hữu map monitor và ring
//! buffer sự kiện theo ví, nối ingester → buffer → scoring → hub →
//! flag registry. Mutation chỉ xảy ra trên task của coordinator; các
//! thành phần khác đi qua message.

// External imports
use ethers::types::Address;

// Standard library imports
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Third party imports
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

// Internal imports
use crate::chain::ChainRpc;
use crate::config::{BATCH_INTERVAL, SUB_BATCH_DELAY, SUB_BATCH_SIZE, WALLET_BUFFER_CAP};
use crate::hub::BroadcastHub;
use crate::ingester::{DataStream, EventIngester, IngesterHandle};
use crate::registry::FlagRegistry;
use crate::scoring::ScoringEngine;
use crate::utils::current_timestamp_ms;
use common::error::SentinelError;
use common::models::event::WalletEvent;
use common::models::monitor::{IngestionConfig, WalletMonitor};
use common::models::score::{RiskLevel, ScoringResult};
use common::validator;

/// Ngưỡng điểm kích hoạt ghi flag on-chain
const FLAG_SCORE_THRESHOLD: f64 = 40.0;
/// Dung lượng kênh intake của một ví
const INTAKE_QUEUE: usize = 256;

/// Kết quả của start_monitor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub created: bool,
    pub message: String,
    pub initial_score: Option<ScoringResult>,
}

/// Bộ đếm vận hành tích lũy
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub events_ingested: AtomicU64,
    pub scores_computed: AtomicU64,
    pub flags_written: AtomicU64,
}

/// Snapshot thống kê cho API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub active_wallets: usize,
    pub events_ingested: u64,
    pub scores_computed: u64,
    pub flags_written: u64,
}

/// Coordinator sở hữu vòng đời ví và toàn bộ orchestration.
pub struct MonitorCoordinator {
    chain: Arc<dyn ChainRpc>,
    scoring: Arc<ScoringEngine>,
    registry: Option<Arc<dyn FlagRegistry>>,
    hub: Arc<BroadcastHub>,
    stream: Option<Arc<dyn DataStream>>,
    ingester: EventIngester,
    monitors: RwLock<HashMap<String, WalletMonitor>>,
    buffers: RwLock<HashMap<String, VecDeque<WalletEvent>>>,
    handles: RwLock<HashMap<String, IngesterHandle>>,
    /// Ví có sự kiện mới kể từ batch tick trước
    pending: RwLock<HashSet<String>>,
    /// Flag đang trong chuyến bay, một ví một flag tại một thời điểm
    flags_in_flight: RwLock<HashSet<String>>,
    stats: CoordinatorStats,
    batch_interval: Duration,
}

impl MonitorCoordinator {
    pub fn new(
        chain: Arc<dyn ChainRpc>,
        scoring: Arc<ScoringEngine>,
        registry: Option<Arc<dyn FlagRegistry>>,
        hub: Arc<BroadcastHub>,
        stream: Option<Arc<dyn DataStream>>,
        ingester: EventIngester,
    ) -> Self {
        Self {
            chain,
            scoring,
            registry,
            hub,
            stream,
            ingester,
            monitors: RwLock::new(HashMap::new()),
            buffers: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashSet::new()),
            flags_in_flight: RwLock::new(HashSet::new()),
            stats: CoordinatorStats::default(),
            batch_interval: BATCH_INTERVAL,
        }
    }

    /// Đổi chu kỳ batch (test dùng chu kỳ ngắn)
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    /// Bắt đầu giám sát một ví. Idempotent: ví đang giám sát trả về điểm
    /// hiện có. Lỗi push subscription là non-fatal (ingester tự rơi về
    /// poll); chỉ lỗi validation chặn việc tạo monitor.
    pub async fn start_monitor(
        self: &Arc<Self>,
        wallet_input: &str,
        config: Option<IngestionConfig>,
    ) -> Result<StartOutcome, SentinelError> {
        let normalized = validator::validate_wallet(wallet_input)?;
        let key = normalized.canonical.clone();

        {
            let monitors = self.monitors.read().await;
            if let Some(monitor) = monitors.get(&key) {
                if monitor.active {
                    return Ok(StartOutcome {
                        created: false,
                        message: "Wallet is already monitored".to_string(),
                        initial_score: monitor.last_score.clone(),
                    });
                }
            }
        }

        let config = config.unwrap_or_default();
        let now = current_timestamp_ms();
        {
            let mut monitors = self.monitors.write().await;
            monitors.insert(
                key.clone(),
                WalletMonitor::new(
                    key.clone(),
                    normalized.checksummed.clone(),
                    now,
                    config.clone(),
                ),
            );
        }
        self.buffers
            .write()
            .await
            .insert(key.clone(), VecDeque::new());

        // Ingestion: bootstrap lịch sử rồi vòng lặp live
        let (intake_tx, mut intake_rx) = mpsc::channel::<WalletEvent>(INTAKE_QUEUE);
        let (handle, bootstrap) = self
            .ingester
            .start(normalized.address, config, intake_tx)
            .await;
        self.handles.write().await.insert(key.clone(), handle);

        if !bootstrap.is_empty() {
            let mut buffers = self.buffers.write().await;
            if let Some(buffer) = buffers.get_mut(&key) {
                for event in &bootstrap {
                    push_bounded(buffer, event.clone());
                }
            }
            let mut monitors = self.monitors.write().await;
            if let Some(monitor) = monitors.get_mut(&key) {
                monitor.event_count = bootstrap.len() as u64;
            }
        }

        // Điểm khởi đầu trên buffer bootstrap
        let balance = self.chain.balance(normalized.address).await.ok();
        let window = self.buffer_snapshot(&key).await;
        let score = self
            .scoring
            .score(&normalized.address, &window, balance, current_timestamp_ms());
        self.stats.scores_computed.fetch_add(1, Ordering::Relaxed);
        {
            let mut monitors = self.monitors.write().await;
            if let Some(monitor) = monitors.get_mut(&key) {
                monitor.last_score = Some(score.clone());
            }
        }
        self.hub
            .broadcast_score_update(&key, score.clone(), None)
            .await;

        // Task tiêu thụ intake, một ví một task
        let coordinator = Arc::clone(self);
        let task_key = key.clone();
        tokio::spawn(async move {
            while let Some(event) = intake_rx.recv().await {
                coordinator.on_event(&task_key, event).await;
            }
            debug!(wallet = %task_key, "intake channel closed");
        });

        info!(wallet = %key, bootstrap = score.transaction_count, "monitoring started");
        Ok(StartOutcome {
            created: true,
            message: "Monitoring started".to_string(),
            initial_score: Some(score),
        })
    }

    /// Dừng giám sát: báo ingestion task thoát, gỡ monitor + buffer +
    /// lịch sử đặc trưng. Trả về true nếu ví đang được giám sát.
    pub async fn stop_monitor(&self, wallet_input: &str) -> Result<bool, SentinelError> {
        let normalized = validator::validate_wallet(wallet_input)?;
        let key = normalized.canonical;

        let existed = self.monitors.write().await.remove(&key).is_some();
        self.buffers.write().await.remove(&key);
        self.pending.write().await.remove(&key);
        if let Some(handle) = self.handles.write().await.remove(&key) {
            handle.stop();
        }
        self.scoring.forget_wallet(&normalized.address);

        if existed {
            info!(wallet = %key, "monitoring stopped");
        }
        Ok(existed)
    }

    /// Chấm lại điểm ngay lập tức trên buffer hiện tại.
    pub async fn force_rescore(&self, wallet_input: &str) -> Result<ScoringResult, SentinelError> {
        let normalized = validator::validate_wallet(wallet_input)?;
        let key = normalized.canonical.clone();

        if !self.monitors.read().await.contains_key(&key) {
            return Err(SentinelError::NotFound(format!(
                "wallet {} is not monitored",
                key
            )));
        }

        let balance = self.chain.balance(normalized.address).await.ok();
        let window = self.buffer_snapshot(&key).await;
        let score = self
            .scoring
            .score(&normalized.address, &window, balance, current_timestamp_ms());
        self.stats.scores_computed.fetch_add(1, Ordering::Relaxed);

        let mut monitors = self.monitors.write().await;
        if let Some(monitor) = monitors.get_mut(&key) {
            monitor.last_score = Some(score.clone());
        }
        Ok(score)
    }

    /// Điểm cached hoặc chấm lại khi `refresh`.
    pub async fn get_score(
        &self,
        wallet_input: &str,
        refresh: bool,
    ) -> Result<ScoringResult, SentinelError> {
        let normalized = validator::validate_wallet(wallet_input)?;
        let key = normalized.canonical.clone();

        if !refresh {
            let monitors = self.monitors.read().await;
            if let Some(score) = monitors.get(&key).and_then(|m| m.last_score.clone()) {
                return Ok(score);
            }
        }
        self.force_rescore(wallet_input).await
    }

    /// Khởi động hàng loạt theo sub-batch 10 ví, nghỉ 1 giây giữa các
    /// sub-batch. Trả về (thành công, thất bại kèm lý do).
    pub async fn batch_start(
        self: &Arc<Self>,
        wallets: &[String],
        config: Option<IngestionConfig>,
    ) -> (Vec<String>, Vec<(String, String)>) {
        let mut successes = Vec::new();
        let mut failures = Vec::new();

        let chunks: Vec<&[String]> = wallets.chunks(SUB_BATCH_SIZE).collect();
        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            for wallet in chunk {
                match self.start_monitor(wallet, config.clone()).await {
                    Ok(_) => successes.push(wallet.clone()),
                    Err(e) => failures.push((wallet.clone(), e.to_string())),
                }
            }
            if index + 1 < total {
                sleep(SUB_BATCH_DELAY).await;
            }
        }
        (successes, failures)
    }

    /// Danh sách ví đang giám sát
    pub async fn active_wallets(&self) -> Vec<String> {
        let monitors = self.monitors.read().await;
        monitors
            .values()
            .filter(|m| m.active)
            .map(|m| m.address.clone())
            .collect()
    }

    /// Trạng thái monitor của một ví
    pub async fn status(&self, wallet_input: &str) -> Result<Option<WalletMonitor>, SentinelError> {
        let normalized = validator::validate_wallet(wallet_input)?;
        Ok(self.monitors.read().await.get(&normalized.canonical).cloned())
    }

    /// Snapshot thống kê
    pub async fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_wallets: self.active_wallets().await.len(),
            events_ingested: self.stats.events_ingested.load(Ordering::Relaxed),
            scores_computed: self.stats.scores_computed.load(Ordering::Relaxed),
            flags_written: self.stats.flags_written.load(Ordering::Relaxed),
        }
    }

    /// Intake một sự kiện từ ingester. Đường immediate: chấm điểm cửa sổ
    /// buffer + sự kiện, phát score update và tx alert. Đường buffered:
    /// nối vào ring buffer chờ batch tick.
    pub async fn on_event(&self, key: &str, event: WalletEvent) {
        let now = current_timestamp_ms();
        {
            let mut monitors = self.monitors.write().await;
            match monitors.get_mut(key) {
                Some(monitor) if monitor.active => {
                    monitor.last_activity = now;
                    monitor.event_count += 1;
                }
                // Monitor đã gỡ hoặc inactive: bỏ sự kiện
                _ => return,
            }
        }
        self.stats.events_ingested.fetch_add(1, Ordering::Relaxed);

        let address = match Address::from_str(key) {
            Ok(address) => address,
            Err(_) => return,
        };

        // Immediate path
        let mut window = self.buffer_snapshot(key).await;
        window.push(event.clone());
        let score = self.scoring.score(&address, &window, None, now);
        self.stats.scores_computed.fetch_add(1, Ordering::Relaxed);

        let previous = {
            let monitors = self.monitors.read().await;
            monitors
                .get(key)
                .and_then(|m| m.last_score.as_ref().map(|s| s.reputation_score))
        };
        let impact = previous
            .map(|p| score.reputation_score - p)
            .unwrap_or(0.0);

        self.hub
            .broadcast_score_update(key, score.clone(), previous)
            .await;
        self.hub
            .broadcast_tx_alert(key, event.clone(), score.risk_level, impact)
            .await;

        // Buffered path
        {
            let mut buffers = self.buffers.write().await;
            if let Some(buffer) = buffers.get_mut(key) {
                push_bounded(buffer, event);
            }
        }
        self.pending.write().await.insert(key.to_string());
    }

    /// Tiêu thụ control event từ hub: client subscribe qua WS cũng đưa
    /// ví vào tập giám sát.
    pub async fn run_control_loop(
        self: Arc<Self>,
        mut control_rx: mpsc::Receiver<crate::hub::ControlEvent>,
    ) {
        while let Some(event) = control_rx.recv().await {
            match event {
                crate::hub::ControlEvent::Subscribed { wallet, .. } => {
                    if let Err(e) = self.start_monitor(&wallet, None).await {
                        warn!(wallet = %wallet, error = %e, "ws-driven monitor start failed");
                    }
                }
            }
        }
    }

    /// Vòng lặp batch định kỳ
    pub async fn run_batch_loop(self: Arc<Self>) {
        let mut ticker = interval(self.batch_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.process_batches().await;
        }
    }

    /// Một lượt batch: cho mỗi ví có buffer mới: chấm điểm, quyết định
    /// flag, phát score update, publish off-band, xóa buffer.
    pub async fn process_batches(&self) {
        let pending: Vec<String> = {
            let mut pending = self.pending.write().await;
            pending.drain().collect()
        };

        for key in pending {
            let events: Vec<WalletEvent> = {
                let mut buffers = self.buffers.write().await;
                match buffers.get_mut(&key) {
                    Some(buffer) => buffer.drain(..).collect(),
                    None => continue,
                }
            };
            if events.is_empty() {
                continue;
            }

            let address = match Address::from_str(&key) {
                Ok(address) => address,
                Err(_) => continue,
            };

            let balance = self.chain.balance(address).await.ok();
            let score =
                self.scoring
                    .score(&address, &events, balance, current_timestamp_ms());
            self.stats.scores_computed.fetch_add(1, Ordering::Relaxed);

            self.maybe_flag(&key, address, &score).await;

            let previous = {
                let monitors = self.monitors.read().await;
                monitors
                    .get(&key)
                    .and_then(|m| m.last_score.as_ref().map(|s| s.reputation_score))
            };
            let significant = {
                let monitors = self.monitors.read().await;
                monitors
                    .get(&key)
                    .and_then(|m| m.last_score.as_ref())
                    .map(|last| score.is_significant_change(last))
                    .unwrap_or(true)
            };
            // Có sự kiện mới nên luôn phát; check significant giữ để log
            if significant || !events.is_empty() {
                self.hub
                    .broadcast_score_update(&key, score.clone(), previous)
                    .await;
            }

            if let Some(stream) = &self.stream {
                let record = json!({
                    "wallet": key,
                    "reputationScore": score.reputation_score,
                    "riskLevel": score.risk_level,
                    "computedAt": score.computed_at,
                });
                if let Err(e) = stream.publish(record).await {
                    debug!(wallet = %key, error = %e, "off-band score publish failed");
                }
            }

            let mut monitors = self.monitors.write().await;
            if let Some(monitor) = monitors.get_mut(&key) {
                monitor.last_score = Some(score);
            }
        }
    }

    /// Luật flag: điểm < 40 VÀ mức CRITICAL. Kiểm tra registry trước để
    /// tránh flag trùng; thất bại chỉ log, không retry trong cùng batch.
    async fn maybe_flag(&self, key: &str, address: Address, score: &ScoringResult) {
        if !(score.reputation_score < FLAG_SCORE_THRESHOLD
            && score.risk_level == RiskLevel::Critical)
        {
            return;
        }
        let registry = match &self.registry {
            Some(registry) if registry.can_write() => registry.clone(),
            _ => return,
        };

        // Một flag một ví tại một thời điểm
        {
            let mut in_flight = self.flags_in_flight.write().await;
            if !in_flight.insert(key.to_string()) {
                return;
            }
        }

        let flagged = match registry.is_flagged(address).await {
            Ok(true) => {
                debug!(wallet = %key, "wallet already flagged on-chain");
                None
            }
            Ok(false) => {
                match registry
                    .flag(
                        address,
                        score.risk_level,
                        score.reputation_score,
                        &score.explanation,
                    )
                    .await
                {
                    Ok(outcome) if outcome.ok && !outcome.already_flagged => Some(outcome),
                    Ok(outcome) if outcome.already_flagged => None,
                    Ok(outcome) => {
                        warn!(wallet = %key, error = ?outcome.error, "on-chain flag failed");
                        None
                    }
                    Err(e) => {
                        warn!(wallet = %key, error = %e, "on-chain flag failed");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(wallet = %key, error = %e, "cannot query flag state");
                None
            }
        };

        if let Some(outcome) = flagged {
            self.stats.flags_written.fetch_add(1, Ordering::Relaxed);
            info!(
                wallet = %key,
                tx = ?outcome.tx_hash,
                scored_at = %crate::utils::time::timestamp_to_readable(score.computed_at),
                "wallet flagged on-chain"
            );
            self.hub
                .broadcast_flagged(
                    key,
                    score.risk_level,
                    score.reputation_score,
                    outcome.tx_hash.map(|h| format!("{:#x}", h)),
                )
                .await;
        }

        self.flags_in_flight.write().await.remove(key);
    }

    /// Dừng toàn bộ ingestion khi shutdown
    pub async fn shutdown(&self) {
        let handles = {
            let mut handles = self.handles.write().await;
            handles.drain().collect::<Vec<_>>()
        };
        for (key, handle) in handles {
            debug!(wallet = %key, "stopping ingestion");
            handle.stop();
        }
        self.monitors.write().await.clear();
        self.buffers.write().await.clear();
    }

    async fn buffer_snapshot(&self, key: &str) -> Vec<WalletEvent> {
        let buffers = self.buffers.read().await;
        buffers
            .get(key)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Helper cho test: độ dài buffer của một ví
    #[cfg(test)]
    pub async fn buffer_len(&self, key: &str) -> usize {
        let buffers = self.buffers.read().await;
        buffers.get(key).map(|b| b.len()).unwrap_or(0)
    }
}

/// Nối sự kiện vào ring buffer, đẩy sự kiện cũ nhất khi vượt giới hạn.
fn push_bounded(buffer: &mut VecDeque<WalletEvent>, event: WalletEvent) {
    if buffer.len() >= WALLET_BUFFER_CAP {
        buffer.pop_front();
    }
    buffer.push_back(event);
}
