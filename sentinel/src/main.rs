// Module declarations
mod api;
mod chain;
mod config;
mod coordinator;
mod hub;
mod ingester;
mod registry;
mod scoring;
mod types;
mod utils;

// Standard library imports
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Instant;

// Third party imports
use tokio::signal;
use tracing::{error, info};

// Internal imports
use crate::api::AppState;
use crate::chain::{ChainClient, ChainRpc};
use crate::config::Config;
use crate::coordinator::MonitorCoordinator;
use crate::hub::BroadcastHub;
use crate::ingester::EventIngester;
use crate::registry::{ContractFlagRegistry, FlagRegistry};
use crate::scoring::ScoringEngine;

#[tokio::main]
async fn main() {
    // Cấu hình đọc trước để lấy LOG_LEVEL; lỗi env bắt buộc là fatal
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {:#}", e);
            process::exit(1);
        }
    };

    let _log_guard = match common::logger::init(
        &config.log_level,
        Path::new("logs"),
        "sentinel.log",
        !config.is_production(),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("logging setup failed: {:#}", e);
            process::exit(1);
        }
    };

    info!(
        chain_id = config.chain_id,
        environment = %config.environment,
        "starting wallet sentinel"
    );

    // Chain client: endpoint không phản hồi hoặc chain id lệch là fatal
    let chain_client = match ChainClient::connect(&config.rpc_url, config.chain_id).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "cannot initialize chain client");
            process::exit(1);
        }
    };
    let provider = chain_client.provider();
    let chain: Arc<dyn ChainRpc> = Arc::new(chain_client);

    // Scoring: model best-effort, fallback luật luôn sẵn sàng
    let scoring = Arc::new(ScoringEngine::from_config(&config));

    // Flag registry: tắt khi không có CONTRACT_ADDRESS
    let registry: Option<Arc<dyn FlagRegistry>> = match config.contract_address {
        Some(address) => {
            match ContractFlagRegistry::new(
                address,
                provider,
                config.private_key.as_deref(),
                config.chain_id,
                chain.clone(),
            ) {
                Ok(registry) => Some(Arc::new(registry)),
                Err(e) => {
                    error!(error = %e, "cannot initialize flag registry");
                    process::exit(1);
                }
            }
        }
        None => {
            info!("CONTRACT_ADDRESS not set, flag registry disabled");
            None
        }
    };

    let hub = Arc::new(BroadcastHub::new(config.rate_limit_max));
    let ingester = EventIngester::new(chain.clone(), None);
    let coordinator = Arc::new(MonitorCoordinator::new(
        chain.clone(),
        scoring.clone(),
        registry.clone(),
        hub.clone(),
        None,
        ingester,
    ));

    // Các task nền dài hạn
    tokio::spawn(coordinator.clone().run_batch_loop());
    tokio::spawn(hub.clone().run_heartbeat());
    tokio::spawn(hub.clone().run_reaper());
    if let Some(control_rx) = hub.take_control_receiver() {
        tokio::spawn(coordinator.clone().run_control_loop(control_rx));
    }

    let state = Arc::new(AppState {
        config,
        chain,
        coordinator: coordinator.clone(),
        hub,
        registry,
        scoring,
        started_at: Instant::now(),
    });

    let api_task = tokio::spawn(api::serve(state));

    tokio::select! {
        result = api_task => {
            match result {
                Ok(Ok(())) => info!("api server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "api server failed");
                    coordinator.shutdown().await;
                    process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "api task panicked");
                    coordinator.shutdown().await;
                    process::exit(1);
                }
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, stopping monitors");
        }
    }

    coordinator.shutdown().await;
    info!("wallet sentinel stopped");
}
