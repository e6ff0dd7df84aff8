//! DTO cho bề mặt HTTP của façade. Mọi key trên wire là camelCase.

// Standard library imports
use std::collections::HashMap;

// Third party imports
use serde::{Deserialize, Serialize};

// Internal imports
use common::models::flag::WalletFlag;
use common::models::score::ScoringResult;

/// POST /wallets/subscribe
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    pub wallet: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub include_transactions: Option<bool>,
}

/// DELETE /wallets/unsubscribe
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeBody {
    pub wallet: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Query của GET /wallets/{addr}/score
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreQuery {
    #[serde(default)]
    pub refresh: Option<bool>,
}

/// POST /wallets/batch-score
#[derive(Debug, Clone, Deserialize)]
pub struct BatchScoreBody {
    pub wallets: Vec<String>,
}

/// POST /wallets/{addr}/flag
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagBody {
    pub risk_level: String,
    pub reputation_score: f64,
    pub reason: String,
}

/// Payload trả về của subscribe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionData {
    pub wallet: String,
    pub monitoring: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_score: Option<ScoringResult>,
}

/// Payload trả về của unsubscribe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeData {
    pub wallet: String,
    pub unsubscribed: bool,
    pub message: String,
}

/// Một ví lỗi trong batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub wallet: String,
    pub error: String,
}

/// Payload trả về của batch-score
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScoreData {
    pub scores: HashMap<String, ScoringResult>,
    pub failed: Vec<BatchFailure>,
}

/// Payload trả về của flag-status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagStatusData {
    pub wallet: String,
    pub is_flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_details: Option<WalletFlag>,
}

/// Payload trả về của /wallets/active
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveData {
    pub wallets: Vec<String>,
    pub count: usize,
    pub stats: crate::coordinator::StatsSnapshot,
}

/// Payload trả về của /system/health
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub status: String,
    pub chain_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_block: Option<u64>,
    pub model_loaded: bool,
    pub registry_enabled: bool,
    pub registry_writable: bool,
    pub active_connections: usize,
    pub total_subscriptions: usize,
    pub uptime_seconds: u64,
    pub environment: String,
}
