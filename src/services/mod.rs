// Game core services
pub mod move_staging;
pub mod onchain;
pub mod placement_validator;
pub mod poller;
pub mod reconciler;
pub mod request_cache;
pub mod turn_submission;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export for convenience
pub use move_staging::MoveStagingStore;
pub use onchain::{GameLedger, StarknetLedger};
pub use poller::{PollHandle, PollScheduler};
pub use reconciler::{GameStateReconciler, MergedView, OpponentRecap};
pub use request_cache::{LedgerCache, RequestCache};
pub use turn_submission::{PipelineRegistry, SubmissionState, TurnSubmissionPipeline};

use crate::config::Config;
use std::sync::Arc;

/// Start the pollers for one watched game and, optionally, lobby previews.
pub fn start_background_services(
    config: &Config,
    reconciler: Arc<GameStateReconciler>,
    cache: Arc<LedgerCache>,
    lobby_game_ids: Vec<u64>,
) -> Vec<PollHandle> {
    tracing::info!("Starting background services...");
    let mut handles = vec![poller::watch_game(reconciler, config.poll_interval())];

    if lobby_game_ids.is_empty() {
        tracing::debug!("No lobby games configured; preview watcher disabled");
    } else {
        handles.push(poller::watch_previews(
            cache,
            lobby_game_ids,
            config.preview_cache_ttl(),
        ));
    }

    tracing::info!("All background services started successfully");
    handles
}
