use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{PendingPlacement, Placement, ReceiptStatus, TxHandle},
    services::{
        onchain::{parse_felt, GameLedger},
        reconciler::GameStateReconciler,
    },
};

// ==================== STATE MACHINE ====================
/// Where the current turn's write stands. Terminal states accept a new submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionState {
    Idle,
    Submitting,
    AwaitingConfirmation { tx: TxHandle },
    Confirmed { tx: TxHandle },
    Failed { reason: String },
    TimedOut { tx: TxHandle },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionEvent {
    Submit,
    Accepted(TxHandle),
    Rejected(String),
    ReceiptSucceeded,
    ReceiptReverted(String),
    TimedOut,
}

impl SubmissionState {
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            SubmissionState::Submitting | SubmissionState::AwaitingConfirmation { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Confirmed { .. }
                | SubmissionState::Failed { .. }
                | SubmissionState::TimedOut { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Idle => "idle",
            SubmissionState::Submitting => "submitting",
            SubmissionState::AwaitingConfirmation { .. } => "awaiting_confirmation",
            SubmissionState::Confirmed { .. } => "confirmed",
            SubmissionState::Failed { .. } => "failed",
            SubmissionState::TimedOut { .. } => "timed_out",
        }
    }

    /// Pure transition function.
    pub fn apply(&self, event: SubmissionEvent) -> Result<SubmissionState> {
        use SubmissionEvent as E;
        use SubmissionState as S;

        match (self, event) {
            (state, E::Submit) if state.is_in_progress() => Err(AppError::SubmissionInProgress),
            (_, E::Submit) => Ok(S::Submitting),
            (S::Submitting, E::Accepted(tx)) => Ok(S::AwaitingConfirmation { tx }),
            (S::Submitting, E::Rejected(reason)) => Ok(S::Failed { reason }),
            (S::AwaitingConfirmation { tx }, E::ReceiptSucceeded) => {
                Ok(S::Confirmed { tx: tx.clone() })
            }
            (S::AwaitingConfirmation { .. }, E::ReceiptReverted(reason)) => {
                Ok(S::Failed { reason })
            }
            (S::AwaitingConfirmation { tx }, E::TimedOut) => Ok(S::TimedOut { tx: tx.clone() }),
            (state, event) => Err(AppError::Internal(format!(
                "Invalid submission transition {:?} from {}",
                event,
                state.as_str()
            ))),
        }
    }
}

// ==================== PIPELINE ====================
/// Outcome of waiting on a handle, after the matching transition was applied.
enum Settled {
    Confirmed,
    Reverted(String),
    Unresolved,
}

/// Drives one player's writes for one game through `SubmissionState`.
pub struct TurnSubmissionPipeline {
    game_id: u64,
    ledger: Arc<dyn GameLedger>,
    reconciler: Arc<GameStateReconciler>,
    confirmation_timeout: Duration,
    state: watch::Sender<SubmissionState>,
}

impl TurnSubmissionPipeline {
    pub fn new(
        ledger: Arc<dyn GameLedger>,
        reconciler: Arc<GameStateReconciler>,
        confirmation_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Self {
            game_id: reconciler.game_id(),
            ledger,
            reconciler,
            confirmation_timeout,
            state,
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.state.subscribe()
    }

    fn transition(&self, event: SubmissionEvent) -> Result<SubmissionState> {
        let mut outcome = Ok(SubmissionState::Idle);
        self.state.send_if_modified(|state| match state.apply(event) {
            Ok(next) => {
                tracing::info!(
                    "Game {} submission {} -> {}",
                    self.game_id,
                    state.as_str(),
                    next.as_str()
                );
                *state = next.clone();
                outcome = Ok(next);
                true
            }
            Err(err) => {
                outcome = Err(err);
                false
            }
        });
        outcome
    }

    /// Sends the staged placements as one `play_turn` and waits for the result.
    ///
    /// Staging is cleared only on a confirmed receipt. A rejection or revert
    /// leaves the staged tiles in place and drops the optimistic overlay. A
    /// timeout keeps both and returns `ConfirmationTimeout` with the handle.
    pub async fn submit(&self) -> Result<TxHandle> {
        if self.state.borrow().is_in_progress() {
            return Err(AppError::SubmissionInProgress);
        }
        let submitted = self
            .reconciler
            .staging()
            .read()
            .await
            .take_for_submission()?;
        self.transition(SubmissionEvent::Submit)?;
        self.reconciler.set_pending(submitted.clone()).await;

        let placements: Vec<Placement> = submitted
            .iter()
            .map(PendingPlacement::to_placement)
            .collect();
        let tx = match self.ledger.play_turn(self.game_id, &placements).await {
            Ok(tx) => tx,
            Err(err) => {
                self.reconciler.clear_pending().await;
                self.transition(SubmissionEvent::Rejected(err.to_string()))?;
                tracing::warn!("play_turn for game {} rejected: {}", self.game_id, err);
                return Err(err);
            }
        };
        self.transition(SubmissionEvent::Accepted(tx.clone()))?;

        match self.settle(&tx).await? {
            Settled::Confirmed => {
                self.reconciler
                    .staging()
                    .write()
                    .await
                    .commit_confirmed(&submitted);
                self.refresh_after_confirm().await;
                self.reconciler.clear_pending().await;
                Ok(tx)
            }
            Settled::Reverted(reason) => {
                self.reconciler.clear_pending().await;
                Err(AppError::TransactionFailed(reason))
            }
            Settled::Unresolved => Err(AppError::ConfirmationTimeout { tx_hash: tx.0 }),
        }
    }

    pub async fn skip_turn(&self) -> Result<TxHandle> {
        self.run_action("skip_turn", || self.ledger.skip_turn(self.game_id))
            .await
    }

    pub async fn join_game(&self, name: &str) -> Result<TxHandle> {
        self.run_action("join_game", || self.ledger.join_game(self.game_id, name))
            .await
    }

    pub async fn start_game(&self) -> Result<TxHandle> {
        self.run_action("start_game", || self.ledger.start_game(self.game_id))
            .await
    }

    // Writes without staged tiles: same guard and states, nothing to roll back.
    async fn run_action<F, Fut>(&self, action: &'static str, send: F) -> Result<TxHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TxHandle>>,
    {
        self.transition(SubmissionEvent::Submit)?;
        let tx = match send().await {
            Ok(tx) => tx,
            Err(err) => {
                self.transition(SubmissionEvent::Rejected(err.to_string()))?;
                tracing::warn!("{} for game {} rejected: {}", action, self.game_id, err);
                return Err(err);
            }
        };
        self.transition(SubmissionEvent::Accepted(tx.clone()))?;

        match self.settle(&tx).await? {
            Settled::Confirmed => {
                self.refresh_after_confirm().await;
                Ok(tx)
            }
            Settled::Reverted(reason) => Err(AppError::TransactionFailed(reason)),
            Settled::Unresolved => Err(AppError::ConfirmationTimeout { tx_hash: tx.0 }),
        }
    }

    async fn settle(&self, tx: &TxHandle) -> Result<Settled> {
        match self
            .ledger
            .wait_for_receipt(tx, self.confirmation_timeout)
            .await
        {
            Ok(ReceiptStatus::Succeeded) => {
                self.transition(SubmissionEvent::ReceiptSucceeded)?;
                Ok(Settled::Confirmed)
            }
            Ok(ReceiptStatus::Reverted { reason }) => {
                tracing::warn!("Transaction {} reverted: {}", tx, reason);
                self.transition(SubmissionEvent::ReceiptReverted(reason.clone()))?;
                Ok(Settled::Reverted(reason))
            }
            Err(err) => {
                // The transaction may still land; its outcome is unknown.
                tracing::warn!("No final receipt for {}: {}", tx, err);
                self.transition(SubmissionEvent::TimedOut)?;
                Ok(Settled::Unresolved)
            }
        }
    }

    async fn refresh_after_confirm(&self) {
        if let Err(err) = self.reconciler.refresh().await {
            tracing::warn!(
                "Refresh after confirmed write failed for game {}: {}",
                self.game_id,
                err
            );
        }
    }
}

// ==================== REGISTRY ====================
/// Hands out exactly one pipeline per (game, player).
pub struct PipelineRegistry {
    ledger: Arc<dyn GameLedger>,
    confirmation_timeout: Duration,
    pipelines: Mutex<HashMap<(u64, String), Arc<TurnSubmissionPipeline>>>,
}

impl PipelineRegistry {
    pub fn new(ledger: Arc<dyn GameLedger>, config: &Config) -> Self {
        Self {
            ledger,
            confirmation_timeout: config.confirmation_timeout(),
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub async fn pipeline(
        &self,
        reconciler: &Arc<GameStateReconciler>,
    ) -> Arc<TurnSubmissionPipeline> {
        let key = (reconciler.game_id(), address_key(reconciler.player()));
        let mut pipelines = self.pipelines.lock().await;
        Arc::clone(pipelines.entry(key).or_insert_with(|| {
            Arc::new(TurnSubmissionPipeline::new(
                Arc::clone(&self.ledger),
                Arc::clone(reconciler),
                self.confirmation_timeout,
            ))
        }))
    }

    pub async fn len(&self) -> usize {
        self.pipelines.lock().await.len()
    }
}

// Internal helper that normalizes addresses for `address_key` lookups.
fn address_key(address: &str) -> String {
    parse_felt(address)
        .map(|felt| format!("{:#x}", felt))
        .unwrap_or_else(|_| address.trim().to_ascii_lowercase())
}
