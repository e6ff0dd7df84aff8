//! Ingester sự kiện: mỗi ví một task, ưu tiên push subscription qua
//! data-stream collaborator, luôn có pull fallback poll chain. Dedup theo
//! tx hash, phát sự kiện theo thứ tự (block, log index), at-least-once.

// External imports
use ethers::types::{Address, Block, Transaction, TransactionReceipt, H256};

// Standard library imports
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// Third party imports
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

// Internal imports
use crate::chain::ChainRpc;
use crate::config::{
    BOOTSTRAP_MAX_BLOCKS, BOOTSTRAP_MAX_EVENTS, DEDUP_CACHE_PER_WALLET, LOOKBACK_BLOCKS,
    WALLET_SCAN_INTERVAL,
};
use common::cache::DedupCache;
use common::codec;
use common::error::SentinelError;
use common::models::event::{EventKind, EventStatus, WalletEvent};
use common::models::monitor::IngestionConfig;

/// topic0 của ERC-20 Transfer(address,address,uint256)
static TRANSFER_TOPIC: Lazy<H256> = Lazy::new(|| {
    H256::from_str("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        .expect("static transfer topic")
});

/// Collaborator push tùy chọn. Bản ghi được đẩy qua channel dưới dạng JSON
/// thô; decoder chịu lỗi ở phía ingester vì định dạng không được đảm bảo.
#[async_trait]
pub trait DataStream: Send + Sync {
    /// Đăng ký nhận bản ghi cho một địa chỉ. Bản ghi đến qua `sender`.
    async fn subscribe(
        &self,
        wallet: Address,
        sender: mpsc::Sender<Value>,
    ) -> Result<StreamSubscription, SentinelError>;

    /// Ghi một bản ghi ra sink off-band (điểm số đã tính). Best-effort.
    async fn publish(&self, record: Value) -> Result<(), SentinelError>;
}

/// Subscription đang hoạt động trên data stream
pub struct StreamSubscription {
    pub subscription_id: String,
    cancel: Option<oneshot::Sender<()>>,
}

impl StreamSubscription {
    pub fn new(subscription_id: String, cancel: oneshot::Sender<()>) -> Self {
        Self {
            subscription_id,
            cancel: Some(cancel),
        }
    }

    /// Hủy subscription phía upstream
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Giải mã một bản ghi push về danh sách tx hash. Thử lần lượt các dạng:
/// mảng bản ghi, object có `logs`, object có `transactionHash`, object có
/// `hash`; dạng khác cho kết quả rỗng.
pub fn decode_stream_record(value: &Value) -> Vec<H256> {
    fn parse_hash(value: &Value) -> Option<H256> {
        value.as_str().and_then(|s| codec::parse_tx_hash(s).ok())
    }

    match value {
        Value::Array(items) => items.iter().flat_map(decode_stream_record).collect(),
        Value::Object(map) => {
            if let Some(Value::Array(logs)) = map.get("logs") {
                return logs
                    .iter()
                    .filter_map(|log| log.get("transactionHash").and_then(parse_hash))
                    .collect();
            }
            if let Some(hash) = map.get("transactionHash").and_then(parse_hash) {
                return vec![hash];
            }
            if let Some(hash) = map.get("hash").and_then(parse_hash) {
                return vec![hash];
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Handle của task ingestion cho một ví. `stop` báo task thoát trước lần
/// poll kế tiếp; task xác nhận bằng cách đóng channel sự kiện của nó.
pub struct IngesterHandle {
    pub wallet: String,
    shutdown: watch::Sender<bool>,
    pub task: JoinHandle<()>,
}

impl IngesterHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Nhà máy task ingestion. Giữ chain + data stream dùng chung; mỗi ví
/// được cấp dedup cache và vòng lặp riêng.
pub struct EventIngester {
    chain: Arc<dyn ChainRpc>,
    stream: Option<Arc<dyn DataStream>>,
    scan_interval: Duration,
}

impl EventIngester {
    pub fn new(chain: Arc<dyn ChainRpc>, stream: Option<Arc<dyn DataStream>>) -> Self {
        Self {
            chain,
            stream,
            scan_interval: WALLET_SCAN_INTERVAL,
        }
    }

    /// Đổi chu kỳ quét (test dùng chu kỳ ngắn)
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Khởi động ingestion cho một ví: quét lịch sử bounded trước, rồi
    /// spawn vòng lặp live dùng chung dedup cache. Trả về handle và các
    /// sự kiện bootstrap (thứ tự thời gian tăng dần).
    pub async fn start(
        &self,
        wallet: Address,
        config: IngestionConfig,
        intake: mpsc::Sender<WalletEvent>,
    ) -> (IngesterHandle, Vec<WalletEvent>) {
        let dedup = Arc::new(DedupCache::new(DEDUP_CACHE_PER_WALLET));
        let bootstrap = self.bootstrap_scan(wallet, &config, &dedup).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = IngestWorker {
            chain: self.chain.clone(),
            stream: self.stream.clone(),
            wallet,
            config,
            dedup,
            intake,
            scan_interval: self.scan_interval,
            shutdown: shutdown_rx,
        };
        let wallet_key = codec::canonical(&wallet);
        let task = tokio::spawn(worker.run());

        (
            IngesterHandle {
                wallet: wallet_key,
                shutdown: shutdown_tx,
                task,
            },
            bootstrap,
        )
    }

    /// Quét lịch sử best-effort: lùi từ block mới nhất, tối đa
    /// BOOTSTRAP_MAX_BLOCKS block hoặc BOOTSTRAP_MAX_EVENTS sự kiện.
    async fn bootstrap_scan(
        &self,
        wallet: Address,
        config: &IngestionConfig,
        dedup: &DedupCache,
    ) -> Vec<WalletEvent> {
        let latest = match self.chain.block_number().await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(wallet = %codec::short_address(&wallet), error = %e,
                    "bootstrap scan skipped, chain unavailable");
                return Vec::new();
            }
        };

        let floor = config
            .start_block
            .unwrap_or_else(|| latest.saturating_sub(BOOTSTRAP_MAX_BLOCKS))
            .max(1);

        let mut events = Vec::new();
        let mut number = latest;
        while number >= floor && events.len() < BOOTSTRAP_MAX_EVENTS {
            match self.collect_block(wallet, config, number, dedup).await {
                Ok(mut found) => events.append(&mut found),
                Err(e) => {
                    debug!(block = number, error = %e, "bootstrap block fetch failed");
                    break;
                }
            }
            if number == 0 {
                break;
            }
            number -= 1;
        }

        events.truncate(BOOTSTRAP_MAX_EVENTS);
        events.sort_by_key(|e| e.order_key());
        info!(
            wallet = %codec::short_address(&wallet),
            events = events.len(),
            "historical bootstrap complete"
        );
        events
    }

    async fn collect_block(
        &self,
        wallet: Address,
        config: &IngestionConfig,
        number: u64,
        dedup: &DedupCache,
    ) -> Result<Vec<WalletEvent>, SentinelError> {
        let block = match self.chain.block_with_txs(number).await? {
            Some(block) => block,
            None => return Ok(Vec::new()),
        };
        collect_wallet_events(self.chain.as_ref(), wallet, config, &block, dedup).await
    }
}

/// Trích các sự kiện chạm ví từ một block đã fetch đầy đủ transaction.
async fn collect_wallet_events(
    chain: &dyn ChainRpc,
    wallet: Address,
    config: &IngestionConfig,
    block: &Block<Transaction>,
    dedup: &DedupCache,
) -> Result<Vec<WalletEvent>, SentinelError> {
    let block_number = block.number.map(|n| n.as_u64()).unwrap_or_default();
    let timestamp_ms = block.timestamp.as_u64().saturating_mul(1000);

    let mut events = Vec::new();
    for tx in &block.transactions {
        let touches = tx.from == wallet || tx.to.map(|t| t == wallet).unwrap_or(false);
        if !touches {
            continue;
        }
        let hash_key = format!("{:#x}", tx.hash);
        if dedup.contains(&hash_key) {
            continue;
        }

        let receipt = chain.receipt(tx.hash).await?;
        let receipt = match receipt {
            Some(receipt) => receipt,
            // Receipt chưa có: giao dịch còn pending, tick sau xử lý
            None => continue,
        };

        if let Some(event) =
            synthesize_event(wallet, tx, &receipt, block_number, timestamp_ms, config)
        {
            dedup.insert(hash_key);
            events.push(event);
        }
    }
    Ok(events)
}

/// Dựng WalletEvent chuẩn hóa từ transaction + receipt. Trả về None khi
/// cấu hình ingestion loại sự kiện này.
pub fn synthesize_event(
    wallet: Address,
    tx: &Transaction,
    receipt: &TransactionReceipt,
    block_number: u64,
    timestamp_ms: u64,
    config: &IngestionConfig,
) -> Option<WalletEvent> {
    let status = match receipt.status.map(|s| s.as_u64()) {
        Some(0) => EventStatus::Failed,
        _ => EventStatus::Success,
    };

    // Tìm log ERC-20 Transfer chạm ví để phân loại token transfer
    let token_log = receipt.logs.iter().find(|log| {
        log.topics.first() == Some(&TRANSFER_TOPIC)
            && log.topics.len() >= 3
            && (topic_address(&log.topics[1]) == Some(wallet)
                || topic_address(&log.topics[2]) == Some(wallet))
    });

    let method_selector = if tx.input.len() >= 4 {
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&tx.input[0..4]);
        Some(selector)
    } else {
        None
    };

    let (kind, contract_address, token_value, log_index) = if let Some(log) = token_log {
        let data = if log.data.len() > 32 {
            &log.data[log.data.len() - 32..]
        } else {
            &log.data[..]
        };
        let value = ethers::types::U256::from_big_endian(data);
        (
            EventKind::TokenTransfer,
            Some(log.address),
            Some(value),
            log.log_index.map(|i| i.as_u64()).unwrap_or_default(),
        )
    } else if tx.to.is_none() {
        // Triển khai contract
        (
            EventKind::ContractCall,
            receipt.contract_address,
            None,
            0,
        )
    } else if tx.input.len() > 4 {
        (EventKind::ContractCall, tx.to, None, 0)
    } else {
        (EventKind::Transfer, None, None, 0)
    };

    match kind {
        EventKind::Transfer if !config.include_native_transfers => return None,
        EventKind::TokenTransfer if !config.include_token_transfers => return None,
        _ => {}
    }

    Some(WalletEvent {
        kind,
        tx_hash: tx.hash,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        block_number,
        timestamp: timestamp_ms,
        gas_price: tx.gas_price.unwrap_or_default(),
        gas_used: receipt.gas_used.unwrap_or_default(),
        status,
        input: tx.input.clone(),
        contract_address,
        token_symbol: None,
        token_value,
        method_selector,
        nonce: tx.nonce.as_u64(),
        log_index,
        position: Some(receipt.transaction_index.as_u64()),
    })
}

fn topic_address(topic: &H256) -> Option<Address> {
    Some(Address::from_slice(&topic.as_bytes()[12..]))
}

/// Trạng thái vòng lặp của một ví
struct IngestWorker {
    chain: Arc<dyn ChainRpc>,
    stream: Option<Arc<dyn DataStream>>,
    wallet: Address,
    config: IngestionConfig,
    dedup: Arc<DedupCache>,
    intake: mpsc::Sender<WalletEvent>,
    scan_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl IngestWorker {
    async fn run(mut self) {
        let short = codec::short_address(&self.wallet);

        // Ưu tiên push; thất bại là non-fatal, rơi về poll
        if let Some(stream) = self.stream.clone() {
            match self.run_push(stream).await {
                PushOutcome::Shutdown => {
                    info!(wallet = %short, "ingestion stopped");
                    return;
                }
                PushOutcome::FallbackToPoll => {
                    warn!(wallet = %short, "push subscription unavailable, polling chain");
                }
            }
        }

        self.run_poll().await;
        info!(wallet = %short, "ingestion stopped");
    }

    /// Tiêu thụ bản ghi push cho tới khi shutdown hoặc stream kết thúc.
    async fn run_push(&mut self, stream: Arc<dyn DataStream>) -> PushOutcome {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Value>(256);
        let subscription = match stream.subscribe(self.wallet, raw_tx).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "push subscribe rejected");
                return PushOutcome::FallbackToPoll;
            }
        };
        debug!(id = %subscription.subscription_id, "push subscription active");

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        subscription.unsubscribe();
                        return PushOutcome::Shutdown;
                    }
                }
                record = raw_rx.recv() => {
                    match record {
                        Some(value) => {
                            if !self.handle_push_record(value).await {
                                subscription.unsubscribe();
                                return PushOutcome::Shutdown;
                            }
                        }
                        None => return PushOutcome::FallbackToPoll,
                    }
                }
            }
        }
    }

    /// Trả về false khi kênh intake đã đóng (coordinator dừng ví này)
    async fn handle_push_record(&self, value: Value) -> bool {
        for hash in decode_stream_record(&value) {
            let hash_key = format!("{:#x}", hash);
            if self.dedup.contains(&hash_key) {
                continue;
            }
            match self.resolve_hash(hash).await {
                Ok(Some(event)) => {
                    self.dedup.insert(hash_key);
                    if self.intake.send(event).await.is_err() {
                        return false;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(hash = %codec::short_hash(&hash), error = %e,
                        "cannot resolve pushed transaction");
                }
            }
        }
        true
    }

    /// Phân giải một tx hash push thành WalletEvent đầy đủ.
    async fn resolve_hash(&self, hash: H256) -> Result<Option<WalletEvent>, SentinelError> {
        let tx = match self.chain.transaction(hash).await? {
            Some(tx) => tx,
            None => return Ok(None),
        };
        if !(tx.from == self.wallet || tx.to.map(|t| t == self.wallet).unwrap_or(false)) {
            return Ok(None);
        }
        let receipt = match self.chain.receipt(hash).await? {
            Some(receipt) => receipt,
            None => return Ok(None),
        };
        let block_number = tx.block_number.map(|n| n.as_u64()).unwrap_or_default();
        let timestamp_ms = match self.chain.block_with_txs(block_number).await? {
            Some(block) => block.timestamp.as_u64().saturating_mul(1000),
            None => 0,
        };
        Ok(synthesize_event(
            self.wallet,
            &tx,
            &receipt,
            block_number,
            timestamp_ms,
            &self.config,
        ))
    }

    /// Pull fallback: mỗi tick quét [latest − LOOKBACK, latest]. Lỗi
    /// transient bỏ qua tick, tick sau tiếp tục.
    async fn run_poll(&mut self) {
        let mut last_scanned: u64 = 0;

        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        return;
                    }
                }
                _ = sleep(self.scan_interval) => {}
            }
            if *self.shutdown.borrow() {
                return;
            }

            let latest = match self.chain.block_number().await {
                Ok(latest) => latest,
                Err(e) => {
                    debug!(error = %e, "poll tick skipped");
                    continue;
                }
            };

            let window_start = latest.saturating_sub(LOOKBACK_BLOCKS).max(1);
            let from = window_start.max(last_scanned + 1);
            if from > latest {
                continue;
            }

            let mut collected = Vec::new();
            let mut tick_failed = false;
            for number in from..=latest {
                let block = match self.chain.block_with_txs(number).await {
                    Ok(Some(block)) => block,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(block = number, error = %e, "poll tick aborted");
                        tick_failed = true;
                        break;
                    }
                };
                match collect_wallet_events(
                    self.chain.as_ref(),
                    self.wallet,
                    &self.config,
                    &block,
                    &self.dedup,
                )
                .await
                {
                    Ok(mut events) => collected.append(&mut events),
                    Err(e) => {
                        debug!(block = number, error = %e, "poll tick aborted");
                        tick_failed = true;
                        break;
                    }
                }
            }

            // Giao theo thứ tự block rồi log index
            collected.sort_by_key(|e| e.order_key());
            for event in collected {
                if self.intake.send(event).await.is_err() {
                    // Coordinator đã bỏ ví này
                    return;
                }
            }

            if !tick_failed {
                last_scanned = latest;
            }
        }
    }
}

enum PushOutcome {
    Shutdown,
    FallbackToPoll,
}
