//! Broadcast hub: bảng kết nối downstream, subscription theo kết nối,
//! fanout có định tuyến, rate limit, heartbeat và reaper kết nối chết.
//! Hub độc lập với transport: mỗi kết nối là một mpsc sender; lớp WS
//! của api.rs bắc cầu sender sang socket thật.

// Standard library imports
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// Third party imports
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

// Internal imports
use crate::config::{CONNECTION_TIMEOUT, HEARTBEAT_INTERVAL, MAX_SUBS_PER_CONN, REAPER_INTERVAL};
use crate::utils::{current_timestamp_ms, memory_usage_mb};
use common::codec;
use common::error::codes;
use common::models::event::WalletEvent;
use common::models::message::{
    ErrorData, HeartbeatData, MessageType, ScoreUpdateData, SubscribeAck, SubscribeRequest,
    TransactionAlertData, UnsubscribeAck, WalletFlaggedData, WsEnvelope,
};
use common::models::score::{RiskLevel, ScoringResult};
use common::rate_limit::RateLimiter;

/// Dung lượng hàng đợi gửi cho một kết nối
const CONNECTION_QUEUE: usize = 100;
/// Timestamp nhỏ hơn mốc này coi như tính bằng giây và được đổi sang ms
const SECONDS_EPOCH_CUTOFF: u64 = 1_000_000_000_000;

/// Frame gửi ra một kết nối. `Text` cho pong thô; `Close` yêu cầu lớp
/// transport đóng socket với lý do kèm theo.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Json(WsEnvelope),
    Text(String),
    Close(String),
}

/// Sự kiện điều khiển từ client WS làm thay đổi tập ví của coordinator.
/// Hub phát qua channel; coordinator tiêu thụ ở run_control_loop.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    Subscribed {
        wallet: String,
        session_id: Option<String>,
    },
}

/// Dung lượng hàng đợi control
const CONTROL_QUEUE: usize = 256;

/// Trạng thái một kết nối downstream
struct ConnectionState {
    sender: mpsc::Sender<OutboundFrame>,
    /// Địa chỉ canonical đã đăng ký
    subscriptions: HashSet<String>,
    connected_at: u64,
    last_activity: u64,
    session_id: Option<String>,
}

/// Hub quản lý kết nối và phát tán message
pub struct BroadcastHub {
    connections: RwLock<HashMap<String, ConnectionState>>,
    limiter: RateLimiter,
    max_subs: usize,
    control_tx: mpsc::Sender<ControlEvent>,
    control_rx: std::sync::Mutex<Option<mpsc::Receiver<ControlEvent>>>,
}

impl BroadcastHub {
    pub fn new(rate_limit_max: u32) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        Self {
            connections: RwLock::new(HashMap::new()),
            limiter: RateLimiter::new(Duration::from_secs(60), rate_limit_max),
            max_subs: MAX_SUBS_PER_CONN,
            control_tx,
            control_rx: std::sync::Mutex::new(Some(control_rx)),
        }
    }

    /// Lấy receiver control một lần duy nhất (coordinator tiêu thụ)
    pub fn take_control_receiver(&self) -> Option<mpsc::Receiver<ControlEvent>> {
        self.control_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Kích thước hàng đợi gửi của một kết nối
    pub fn queue_capacity() -> usize {
        CONNECTION_QUEUE
    }

    /// Đăng ký kết nối mới: cấp id, ghi nhận thời điểm, gửi heartbeat
    /// chào mừng.
    pub async fn register(&self, sender: mpsc::Sender<OutboundFrame>) -> String {
        let id = Uuid::new_v4().to_string();
        let now = current_timestamp_ms();
        {
            let mut connections = self.connections.write().await;
            connections.insert(
                id.clone(),
                ConnectionState {
                    sender: sender.clone(),
                    subscriptions: HashSet::new(),
                    connected_at: now,
                    last_activity: now,
                    session_id: None,
                },
            );
        }
        info!(connection = %id, "client connected");

        let welcome = WsEnvelope::new(
            MessageType::Heartbeat,
            json!(self.heartbeat_data().await),
        );
        let _ = sender.send(OutboundFrame::Json(welcome)).await;
        id
    }

    /// Gỡ kết nối và giải phóng subscription + rate limit của nó
    pub async fn unregister(&self, connection_id: &str) {
        let removed = self.connections.write().await.remove(connection_id);
        self.limiter.remove(connection_id);
        if let Some(state) = removed {
            info!(
                connection = %connection_id,
                subscriptions = state.subscriptions.len(),
                "client disconnected"
            );
        }
    }

    /// Xử lý một text frame từ client: rate limit, ping, rồi envelope
    /// subscribe/unsubscribe.
    pub async fn handle_text(&self, connection_id: &str, text: &str) {
        self.touch(connection_id).await;

        if !self.limiter.check(connection_id) {
            debug!(connection = %connection_id, "rate limit exceeded, dropping message");
            self.send_error(
                connection_id,
                codes::RATE_LIMIT_EXCEEDED,
                "Message rate limit exceeded, retry after backoff",
                true,
            )
            .await;
            return;
        }

        if text.trim() == "ping" {
            self.send_frame(connection_id, OutboundFrame::Text("pong".to_string()))
                .await;
            return;
        }

        let envelope: WsEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.send_error(
                    connection_id,
                    codes::INVALID_MESSAGE,
                    &format!("Malformed frame: {}", e),
                    false,
                )
                .await;
                return;
            }
        };

        match envelope.kind {
            MessageType::Subscribe => match serde_json::from_value(envelope.data) {
                Ok(request) => self.subscribe(connection_id, request).await,
                Err(e) => {
                    self.send_error(
                        connection_id,
                        codes::INVALID_MESSAGE,
                        &format!("Malformed subscribe payload: {}", e),
                        false,
                    )
                    .await
                }
            },
            MessageType::Unsubscribe => match serde_json::from_value(envelope.data) {
                Ok(request) => self.unsubscribe(connection_id, request).await,
                Err(e) => {
                    self.send_error(
                        connection_id,
                        codes::INVALID_MESSAGE,
                        &format!("Malformed unsubscribe payload: {}", e),
                        false,
                    )
                    .await
                }
            },
            other => {
                self.send_error(
                    connection_id,
                    codes::INVALID_MESSAGE,
                    &format!("Unexpected inbound message type {:?}", other),
                    false,
                )
                .await;
            }
        }
    }

    /// Đăng ký một ví cho kết nối. Địa chỉ được chuẩn hóa lowercase;
    /// subscribe trùng là idempotent; vượt MAX_SUBS_PER_CONN bị từ chối.
    async fn subscribe(&self, connection_id: &str, request: SubscribeRequest) {
        let normalized = match codec::normalize_address(&request.wallet) {
            Ok(normalized) => normalized,
            Err(e) => {
                self.send_error(connection_id, codes::INVALID_ADDRESS, &e.to_string(), false)
                    .await;
                return;
            }
        };

        let (ack, newly_subscribed) = {
            let mut connections = self.connections.write().await;
            let state = match connections.get_mut(connection_id) {
                Some(state) => state,
                None => return,
            };
            if let Some(session) = &request.session_id {
                state.session_id = Some(session.clone());
            }

            if state.subscriptions.contains(&normalized.canonical) {
                (
                    SubscribeAck {
                        wallet: normalized.canonical.clone(),
                        session_id: request.session_id.clone(),
                        subscribed: true,
                        message: "Already subscribed".to_string(),
                    },
                    false,
                )
            } else if state.subscriptions.len() >= self.max_subs {
                (
                    SubscribeAck {
                        wallet: normalized.canonical.clone(),
                        session_id: request.session_id.clone(),
                        subscribed: false,
                        message: format!("Subscription limit of {} reached", self.max_subs),
                    },
                    false,
                )
            } else {
                state.subscriptions.insert(normalized.canonical.clone());
                (
                    SubscribeAck {
                        wallet: normalized.canonical.clone(),
                        session_id: request.session_id.clone(),
                        subscribed: true,
                        message: "Subscribed to wallet updates".to_string(),
                    },
                    true,
                )
            }
        };

        // Subscribe qua WS cũng đưa ví vào tập giám sát của coordinator
        if newly_subscribed {
            let event = ControlEvent::Subscribed {
                wallet: normalized.canonical.clone(),
                session_id: request.session_id.clone(),
            };
            if self.control_tx.try_send(event).is_err() {
                debug!(wallet = %normalized.canonical, "control queue full or unclaimed");
            }
        }

        debug!(connection = %connection_id, wallet = %ack.wallet, subscribed = ack.subscribed,
            "subscribe handled");
        self.send_frame(
            connection_id,
            OutboundFrame::Json(WsEnvelope::new(MessageType::Subscribe, json!(ack))),
        )
        .await;
    }

    /// Hủy đăng ký; ack cho biết trước đó có đăng ký thật không.
    async fn unsubscribe(&self, connection_id: &str, request: SubscribeRequest) {
        let normalized = match codec::normalize_address(&request.wallet) {
            Ok(normalized) => normalized,
            Err(e) => {
                self.send_error(connection_id, codes::INVALID_ADDRESS, &e.to_string(), false)
                    .await;
                return;
            }
        };

        let was_subscribed = {
            let mut connections = self.connections.write().await;
            match connections.get_mut(connection_id) {
                Some(state) => state.subscriptions.remove(&normalized.canonical),
                None => return,
            }
        };

        let ack = UnsubscribeAck {
            wallet: normalized.canonical,
            session_id: request.session_id,
            unsubscribed: was_subscribed,
            message: if was_subscribed {
                "Unsubscribed".to_string()
            } else {
                "Was not subscribed".to_string()
            },
        };
        self.send_frame(
            connection_id,
            OutboundFrame::Json(WsEnvelope::new(MessageType::Unsubscribe, json!(ack))),
        )
        .await;
    }

    /// Gửi score update tới các kết nối đã đăng ký ví này
    pub async fn broadcast_score_update(
        &self,
        wallet_key: &str,
        score: ScoringResult,
        previous_score: Option<f64>,
    ) {
        let data = ScoreUpdateData {
            wallet: wallet_key.to_string(),
            score,
            previous_score,
        };
        self.route(
            wallet_key,
            WsEnvelope::new(MessageType::ScoreUpdate, json!(data)),
        )
        .await;
    }

    /// Gửi cảnh báo giao dịch; timestamp dạng giây được đổi sang ms
    pub async fn broadcast_tx_alert(
        &self,
        wallet_key: &str,
        mut event: WalletEvent,
        risk_level: RiskLevel,
        score_impact: f64,
    ) {
        if event.timestamp > 0 && event.timestamp < SECONDS_EPOCH_CUTOFF {
            event.timestamp *= 1000;
        }
        let data = TransactionAlertData {
            wallet: wallet_key.to_string(),
            transaction: event,
            risk_level,
            score_impact,
        };
        self.route(
            wallet_key,
            WsEnvelope::new(MessageType::TransactionAlert, json!(data)),
        )
        .await;
    }

    /// Thông báo ví vừa bị flag on-chain
    pub async fn broadcast_flagged(
        &self,
        wallet_key: &str,
        risk_level: RiskLevel,
        score: f64,
        contract_tx_hash: Option<String>,
    ) {
        let data = WalletFlaggedData {
            wallet: wallet_key.to_string(),
            risk_level,
            score,
            contract_tx_hash,
            flagged_at: current_timestamp_ms(),
        };
        self.route(
            wallet_key,
            WsEnvelope::new(MessageType::WalletFlagged, json!(data)),
        )
        .await;
    }

    /// Phát heartbeat cho mọi kết nối
    pub async fn broadcast_heartbeat(&self) {
        let envelope = WsEnvelope::new(
            MessageType::Heartbeat,
            json!(self.heartbeat_data().await),
        );
        let targets: Vec<(String, mpsc::Sender<OutboundFrame>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(id, state)| (id.clone(), state.sender.clone()))
                .collect()
        };
        for (id, sender) in targets {
            if sender
                .try_send(OutboundFrame::Json(envelope.clone()))
                .is_err()
            {
                debug!(connection = %id, "heartbeat delivery failed");
            }
        }
    }

    /// Vòng lặp heartbeat định kỳ
    pub async fn run_heartbeat(self: Arc<Self>) {
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.broadcast_heartbeat().await;
        }
    }

    /// Vòng lặp reaper: đóng kết nối im ắng quá CONNECTION_TIMEOUT
    pub async fn run_reaper(self: Arc<Self>) {
        let mut ticker = interval(REAPER_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.reap_idle(current_timestamp_ms()).await;
            self.limiter.cleanup();
        }
    }

    /// Một lượt quét reaper tại thời điểm `now_ms`. Kết nối quá hạn nhận
    /// frame Close rồi bị gỡ cùng toàn bộ subscription.
    pub async fn reap_idle(&self, now_ms: u64) -> usize {
        let timeout_ms = CONNECTION_TIMEOUT.as_millis() as u64;
        let expired: Vec<String> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, state)| now_ms.saturating_sub(state.last_activity) > timeout_ms)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in &expired {
            warn!(connection = %id, "closing idle connection");
            self.send_frame(id, OutboundFrame::Close("idle timeout".to_string()))
                .await;
            self.unregister(id).await;
        }
        expired.len()
    }

    /// Số kết nối đang mở và tổng số subscription
    pub async fn stats(&self) -> (usize, usize) {
        let connections = self.connections.read().await;
        let subs = connections.values().map(|s| s.subscriptions.len()).sum();
        (connections.len(), subs)
    }

    /// Số kết nối đăng ký một ví
    pub async fn subscriber_count(&self, wallet_key: &str) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|state| state.subscriptions.contains(wallet_key))
            .count()
    }

    async fn heartbeat_data(&self) -> HeartbeatData {
        let (active_connections, _) = self.stats().await;
        HeartbeatData {
            server_time: current_timestamp_ms(),
            active_connections,
            memory_usage: memory_usage_mb(),
        }
    }

    /// Gửi một envelope tới mọi kết nối đã đăng ký ví. Best-effort: lỗi
    /// trên một kết nối không ảnh hưởng kết nối khác.
    async fn route(&self, wallet_key: &str, envelope: WsEnvelope) {
        let targets: Vec<(String, mpsc::Sender<OutboundFrame>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, state)| state.subscriptions.contains(wallet_key))
                .map(|(id, state)| (id.clone(), state.sender.clone()))
                .collect()
        };

        for (id, sender) in targets {
            if sender
                .try_send(OutboundFrame::Json(envelope.clone()))
                .is_err()
            {
                warn!(connection = %id, wallet = %wallet_key, "message delivery failed");
            }
        }
    }

    async fn touch(&self, connection_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(state) = connections.get_mut(connection_id) {
            state.last_activity = current_timestamp_ms();
        }
    }

    async fn send_error(&self, connection_id: &str, code: &str, message: &str, recoverable: bool) {
        let data = ErrorData {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
            recoverable,
        };
        self.send_frame(
            connection_id,
            OutboundFrame::Json(WsEnvelope::new(MessageType::Error, json!(data))),
        )
        .await;
    }

    async fn send_frame(&self, connection_id: &str, frame: OutboundFrame) {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(connection_id).map(|s| s.sender.clone())
        };
        if let Some(sender) = sender {
            if sender.send(frame).await.is_err() {
                debug!(connection = %connection_id, "send channel closed");
            }
        }
    }

    /// Helper cho test: lùi last_activity của một kết nối
    #[cfg(test)]
    pub async fn age_connection(&self, connection_id: &str, last_activity_ms: u64) {
        let mut connections = self.connections.write().await;
        if let Some(state) = connections.get_mut(connection_id) {
            state.last_activity = last_activity_ms;
        }
    }

    /// Helper cho test: connected_at của một kết nối
    #[cfg(test)]
    pub async fn connected_at(&self, connection_id: &str) -> Option<u64> {
        let connections = self.connections.read().await;
        connections.get(connection_id).map(|s| s.connected_at)
    }
}
