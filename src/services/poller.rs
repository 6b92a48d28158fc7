use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    error::Result,
    services::{reconciler::GameStateReconciler, request_cache::LedgerCache},
};

/// A running poll loop. Stopping or dropping the handle cancels it; a task
/// already in flight sees the cancelled token and must not apply its result.
pub struct PollHandle {
    name: &'static str,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Stopping {} poller", self.name);
            self.token.cancel();
        }
    }

    /// Stops the loop and waits for its task to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!("{} poller task ended abnormally: {}", self.name, err);
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct PollScheduler;

impl PollScheduler {
    /// Runs `task` every `period`, starting immediately. Failures are logged
    /// and the loop keeps going.
    pub fn start<F, Fut>(name: &'static str, period: Duration, task: F) -> PollHandle
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        tracing::info!("Starting {} poller every {:?}", name, period);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = task(loop_token.clone()).await {
                    tracing::error!("{} poll error: {}", name, e);
                }
            }
            tracing::debug!("{} poller exited", name);
        });

        PollHandle {
            name,
            token,
            task: Some(handle),
        }
    }
}

/// Keeps one game's reconciled state fresh.
pub fn watch_game(reconciler: Arc<GameStateReconciler>, period: Duration) -> PollHandle {
    PollScheduler::start("game", period, move |token| {
        let reconciler = Arc::clone(&reconciler);
        async move {
            let Some(outcome) = reconciler.refresh_if_alive(&token).await? else {
                return Ok(());
            };
            let expired = reconciler.expire_highlights(Instant::now()).await;
            if !outcome.new_tiles.is_empty() || !expired.is_empty() {
                tracing::debug!(
                    "Game {}: {} new tile(s), {} highlight(s) expired",
                    reconciler.game_id(),
                    outcome.new_tiles.len(),
                    expired.len()
                );
            }
            Ok(())
        }
    })
}

/// Refreshes lobby previews in cooldown-separated batches.
pub fn watch_previews(cache: Arc<LedgerCache>, game_ids: Vec<u64>, period: Duration) -> PollHandle {
    PollScheduler::start("previews", period, move |token| {
        let cache = Arc::clone(&cache);
        let game_ids = game_ids.clone();
        async move {
            if token.is_cancelled() {
                return Ok(());
            }
            let report = cache.refresh_previews(game_ids).await;
            if report.failed > 0 {
                tracing::warn!(
                    "Preview refresh: {} ok, {} failed in {} batch(es)",
                    report.succeeded,
                    report.failed,
                    report.batches
                );
            }
            Ok(())
        }
    })
}
