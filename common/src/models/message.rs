// Standard library imports
use std::time::{SystemTime, UNIX_EPOCH};

// Third party imports
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// Internal imports
use super::event::WalletEvent;
use super::score::{RiskLevel, ScoringResult};

/// Phiên bản giao thức frame
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Bảy loại message của giao thức downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    Heartbeat,
    ScoreUpdate,
    TransactionAlert,
    WalletFlagged,
    Error,
}

/// Envelope chung cho mọi frame:
/// `{ type, id, timestamp (ms), version, data }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Client có thể bỏ trống các trường envelope phụ; chỉ `type` và
    /// `data` là bắt buộc khi nhận vào
    #[serde(default)]
    pub id: String,
    /// Unix ms
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub data: Value,
}

impl WsEnvelope {
    /// Tạo frame mới với id duy nhất và timestamp hiện tại
    pub fn new(kind: MessageType, data: Value) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            kind,
            id: Uuid::new_v4().to_string(),
            timestamp,
            version: PROTOCOL_VERSION.to_string(),
            data,
        }
    }
}

/// `subscribe` từ client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub wallet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Ack cho `subscribe`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    pub wallet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub subscribed: bool,
    pub message: String,
}

/// Ack cho `unsubscribe`, kèm việc trước đó có đăng ký thật không
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAck {
    pub wallet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub unsubscribed: bool,
    pub message: String,
}

/// `heartbeat` phát định kỳ
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatData {
    /// Unix ms phía server
    pub server_time: u64,
    pub active_connections: usize,
    /// RSS thô tính bằng MB
    pub memory_usage: f64,
}

/// `score_update` cho các client đã đăng ký ví
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdateData {
    pub wallet: String,
    pub score: ScoringResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_score: Option<f64>,
}

/// `transaction_alert` cho một sự kiện mới
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAlertData {
    pub wallet: String,
    pub transaction: WalletEvent,
    pub risk_level: RiskLevel,
    pub score_impact: f64,
}

/// `wallet_flagged` sau khi ghi flag on-chain thành công
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletFlaggedData {
    pub wallet: String,
    pub risk_level: RiskLevel,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_tx_hash: Option<String>,
    /// Unix ms
    pub flagged_at: u64,
}

/// `error` gửi cho một client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub recoverable: bool,
}
