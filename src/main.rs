use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tileledger::config::Config;
use tileledger::services::{
    self, GameLedger, GameStateReconciler, LedgerCache, MoveStagingStore, PipelineRegistry,
    StarknetLedger, TurnSubmissionPipeline,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tileledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;
    let game_id: u64 = std::env::var("GAME_ID")
        .map_err(|_| anyhow::anyhow!("GAME_ID must be set"))?
        .trim()
        .parse()?;
    let lobby_game_ids = parse_id_list(&std::env::var("LOBBY_GAME_IDS").unwrap_or_default())?;

    tracing::info!("Starting tileledger watcher for game {}", game_id);
    tracing::info!(
        "Network: {} ({})",
        config.starknet_chain_id,
        if config.is_testnet() { "testnet" } else { "mainnet" }
    );
    tracing::info!(
        "Rules: {:?} on {:?} board, islands {}",
        config.rule_set,
        config.board_variant,
        if config.allow_islands { "allowed" } else { "off" }
    );

    let starknet = StarknetLedger::from_config(&config)?;
    tracing::info!(
        "Write path: {}",
        if starknet.can_write() { "enabled" } else { "disabled" }
    );
    let ledger: Arc<dyn GameLedger> = Arc::new(starknet);
    let cache = Arc::new(LedgerCache::from_config(Arc::clone(&ledger), &config));
    let staging = Arc::new(RwLock::new(MoveStagingStore::new(config.game_rules())));
    let reconciler = Arc::new(GameStateReconciler::new(
        game_id,
        &config.player_address,
        &config,
        Arc::clone(&cache),
        staging,
    ));
    let registry = PipelineRegistry::new(Arc::clone(&ledger), &config);
    let pipeline = registry.pipeline(&reconciler).await;

    if let Ok(action) = std::env::var("GAME_ACTION") {
        run_action(&pipeline, action.trim()).await;
    }

    let pollers = services::start_background_services(
        &config,
        Arc::clone(&reconciler),
        Arc::clone(&cache),
        lobby_game_ids,
    );

    let mut report = tokio::time::interval(config.poll_interval());
    let mut last_turn = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                let view = reconciler.merged_view().await;
                if last_turn != Some(view.turn) {
                    last_turn = Some(view.turn);
                    match serde_json::to_string(&view) {
                        Ok(json) => tracing::info!("Board: {}", json),
                        Err(e) => tracing::error!("Failed to encode board view: {}", e),
                    }
                    if let Some(recap) = reconciler.last_recap().await {
                        tracing::info!(
                            "Last opponent move (best effort): {} tile(s), score {:+}",
                            recap.tiles.len(),
                            recap.score_delta
                        );
                    }
                }
            }
        }
    }

    tracing::info!("Shutting down");
    for poller in pollers {
        poller.shutdown().await;
    }
    Ok(())
}

// One-shot write requested through GAME_ACTION (join:<name>, start, skip).
async fn run_action(pipeline: &TurnSubmissionPipeline, action: &str) {
    let result = match action.split_once(':') {
        Some(("join", name)) => pipeline.join_game(name.trim()).await,
        None if action == "start" => pipeline.start_game().await,
        None if action == "skip" => pipeline.skip_turn().await,
        _ => {
            tracing::warn!("Unknown GAME_ACTION '{}'", action);
            return;
        }
    };
    match result {
        Ok(tx) => tracing::info!("{} confirmed in {}", action, tx),
        Err(e) => tracing::error!("{} failed ({}): {}", action, e.code(), e),
    }
}

// Internal helper that parses values for `parse_id_list`.
fn parse_id_list(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u64>().map_err(anyhow::Error::from))
        .collect()
}
