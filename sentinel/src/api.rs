//! Façade HTTP + WebSocket mỏng trên coordinator và registry. Mọi đầu
//! vào đi qua codec/validator; lỗi trả envelope
//! `{success:false, error, data:{code,message}, requestId, timestamp}`.

// External imports
use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

// Standard library imports
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

// Third party imports
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// Internal imports
use crate::chain::ChainRpc;
use crate::config::Config;
use crate::coordinator::MonitorCoordinator;
use crate::hub::{BroadcastHub, OutboundFrame};
use crate::registry::FlagRegistry;
use crate::scoring::ScoringEngine;
use crate::types::*;
use crate::utils::current_timestamp_ms;
use common::error::SentinelError;
use common::models::monitor::IngestionConfig;
use common::validator;

/// Trạng thái chia sẻ cho mọi handler
pub struct AppState {
    pub config: Config,
    pub chain: Arc<dyn ChainRpc>,
    pub coordinator: Arc<MonitorCoordinator>,
    pub hub: Arc<BroadcastHub>,
    pub registry: Option<Arc<dyn FlagRegistry>>,
    pub scoring: Arc<ScoringEngine>,
    pub started_at: Instant,
}

/// Envelope thành công
fn ok_response<T: Serialize>(data: T) -> Response {
    Json(json!({
        "success": true,
        "data": data,
        "requestId": Uuid::new_v4().to_string(),
        "timestamp": current_timestamp_ms(),
    }))
    .into_response()
}

/// Envelope lỗi với mã HTTP theo loại lỗi
fn error_response(err: &SentinelError) -> Response {
    let status = match err {
        SentinelError::InvalidAddress(_)
        | SentinelError::InvalidRiskLevel(_)
        | SentinelError::ScoreOutOfRange(_)
        | SentinelError::BatchTooLarge { .. }
        | SentinelError::Validation(_) => StatusCode::BAD_REQUEST,
        SentinelError::NotFound(_) => StatusCode::NOT_FOUND,
        SentinelError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = Json(json!({
        "success": false,
        "error": err.to_string(),
        "data": {
            "code": err.code(),
            "message": err.to_string(),
        },
        "requestId": Uuid::new_v4().to_string(),
        "timestamp": current_timestamp_ms(),
    }));
    (status, body).into_response()
}

/// Dựng router với CORS và giới hạn body theo cấu hình
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };
    let body_limit = state.config.body_size_limit;

    Router::new()
        .route("/wallets/subscribe", post(subscribe_wallet))
        .route("/wallets/unsubscribe", delete(unsubscribe_wallet))
        .route("/wallets/batch-score", post(batch_score))
        .route("/wallets/active", get(active_wallets))
        .route("/wallets/:address/score", get(wallet_score))
        .route("/wallets/:address/flag-status", get(flag_status))
        .route("/wallets/:address/flag", post(flag_wallet))
        .route("/system/health", get(health))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Chạy server HTTP tới khi tiến trình dừng
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let router = build_router(state);
    info!(%addr, "api server listening");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await
        .context("api server terminated")
}

/// POST /wallets/subscribe
async fn subscribe_wallet(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubscribeBody>,
) -> Response {
    let config = IngestionConfig {
        include_native_transfers: body.include_transactions.unwrap_or(true),
        ..IngestionConfig::default()
    };
    match state
        .coordinator
        .start_monitor(&body.wallet, Some(config))
        .await
    {
        Ok(outcome) => ok_response(SubscriptionData {
            wallet: outcome
                .initial_score
                .as_ref()
                .map(|s| s.wallet.clone())
                .unwrap_or_else(|| body.wallet.to_lowercase()),
            monitoring: true,
            message: outcome.message,
            session_id: body.session_id,
            existing_score: outcome.initial_score,
        }),
        Err(e) => error_response(&e),
    }
}

/// DELETE /wallets/unsubscribe
async fn unsubscribe_wallet(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UnsubscribeBody>,
) -> Response {
    match state.coordinator.stop_monitor(&body.wallet).await {
        Ok(existed) => ok_response(UnsubscribeData {
            wallet: body.wallet.to_lowercase(),
            unsubscribed: existed,
            message: if existed {
                "Monitoring stopped".to_string()
            } else {
                "Wallet was not monitored".to_string()
            },
        }),
        Err(e) => error_response(&e),
    }
}

/// GET /wallets/{addr}/score?refresh=bool
async fn wallet_score(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<ScoreQuery>,
) -> Response {
    match state
        .coordinator
        .get_score(&address, query.refresh.unwrap_or(false))
        .await
    {
        Ok(score) => ok_response(score),
        Err(e) => error_response(&e),
    }
}

/// POST /wallets/batch-score, tối đa 50 ví một lần
async fn batch_score(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchScoreBody>,
) -> Response {
    if let Err(e) = validator::validate_batch(&body.wallets) {
        return error_response(&e);
    }

    let (successes, failures) = state.coordinator.batch_start(&body.wallets, None).await;

    let mut scores = HashMap::new();
    for wallet in successes {
        match state.coordinator.get_score(&wallet, false).await {
            Ok(score) => {
                scores.insert(wallet, score);
            }
            Err(e) => debug!(wallet = %wallet, error = %e, "score unavailable after batch start"),
        }
    }

    ok_response(BatchScoreData {
        scores,
        failed: failures
            .into_iter()
            .map(|(wallet, error)| BatchFailure { wallet, error })
            .collect(),
    })
}

/// GET /wallets/{addr}/flag-status
async fn flag_status(State(state): State<Arc<AppState>>, Path(address): Path<String>) -> Response {
    let normalized = match validator::validate_wallet(&address) {
        Ok(normalized) => normalized,
        Err(e) => return error_response(&e),
    };
    let registry = match &state.registry {
        Some(registry) => registry,
        None => {
            return error_response(&SentinelError::NotConfigured(
                "flag registry is not configured".to_string(),
            ))
        }
    };

    let is_flagged = match registry.is_flagged(normalized.address).await {
        Ok(is_flagged) => is_flagged,
        Err(e) => return error_response(&e),
    };
    let flag_details = match registry.get_flag(normalized.address).await {
        Ok(details) => details,
        Err(e) => {
            warn!(wallet = %normalized.canonical, error = %e, "flag details unavailable");
            None
        }
    };

    ok_response(FlagStatusData {
        wallet: normalized.canonical,
        is_flagged,
        flag_details,
    })
}

/// POST /wallets/{addr}/flag: flag thủ công qua façade
async fn flag_wallet(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(body): Json<FlagBody>,
) -> Response {
    let normalized = match validator::validate_wallet(&address) {
        Ok(normalized) => normalized,
        Err(e) => return error_response(&e),
    };
    let level = match validator::validate_risk_level(&body.risk_level) {
        Ok(level) => level,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = validator::validate_score(body.reputation_score) {
        return error_response(&e);
    }
    if let Err(e) = validator::validate_reason(&body.reason) {
        return error_response(&e);
    }

    let registry = match &state.registry {
        Some(registry) if registry.can_write() => registry,
        Some(_) => {
            return error_response(&SentinelError::NotConfigured(
                "flag registry has no signer".to_string(),
            ))
        }
        None => {
            return error_response(&SentinelError::NotConfigured(
                "flag registry is not configured".to_string(),
            ))
        }
    };

    match registry
        .flag(normalized.address, level, body.reputation_score, &body.reason)
        .await
    {
        Ok(outcome) => ok_response(outcome),
        Err(e) => error_response(&e),
    }
}

/// GET /wallets/active
async fn active_wallets(State(state): State<Arc<AppState>>) -> Response {
    let wallets = state.coordinator.active_wallets().await;
    let stats = state.coordinator.stats_snapshot().await;
    ok_response(ActiveData {
        count: wallets.len(),
        wallets,
        stats,
    })
}

/// GET /system/health
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let latest_block = state.chain.block_number().await.ok();
    let (active_connections, total_subscriptions) = state.hub.stats().await;
    let chain_connected = latest_block.is_some();

    ok_response(HealthData {
        status: if chain_connected { "ok" } else { "degraded" }.to_string(),
        chain_connected,
        latest_block,
        model_loaded: state.scoring.model_loaded(),
        registry_enabled: state.registry.is_some(),
        registry_writable: state
            .registry
            .as_ref()
            .map(|r| r.can_write())
            .unwrap_or(false),
        active_connections,
        total_subscriptions,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        environment: state.config.environment.clone(),
    })
}

/// GET /ws: nâng cấp WebSocket và bắc cầu socket vào hub
async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Bắc cầu một socket: task gửi chuyển OutboundFrame thành frame WS,
/// task nhận đẩy text vào hub. Kết thúc bên nào thì đóng bên kia.
async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(BroadcastHub::queue_capacity());
    let connection_id = state.hub.register(frame_tx).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            let result = match frame {
                OutboundFrame::Json(envelope) => match serde_json::to_string(&envelope) {
                    Ok(text) => ws_sender.send(Message::Text(text)).await,
                    Err(e) => {
                        error!(error = %e, "cannot serialize outbound frame");
                        continue;
                    }
                },
                OutboundFrame::Text(text) => ws_sender.send(Message::Text(text)).await,
                OutboundFrame::Close(reason) => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: Cow::Owned(reason),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let hub = state.hub.clone();
    let receive_id = connection_id.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            match message {
                Message::Text(text) => hub.handle_text(&receive_id, &text).await,
                Message::Close(_) => break,
                // Ping/Pong do tầng tungstenite trả lời
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }
    state.hub.unregister(&connection_id).await;
    debug!(connection = %connection_id, "socket bridge closed");
}
