use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::Result,
    models::{
        Board, GameRules, GameSnapshot, GameState, PendingPlacement, PlacedTile, PlayerInfo,
        Position, TileLifecycle, TileState,
    },
    services::{move_staging::MoveStagingStore, request_cache::LedgerCache},
};

/// Guess at what the opponent did on their last turn.
///
/// The ledger exposes no per-move history, so this is built from the newest
/// tiles on the board and the mover's score change. It can be wrong when more
/// than one player moved between polls or when tiles have burned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpponentRecap {
    pub player: Option<String>,
    pub tiles: Vec<PlacedTile>,
    pub score_delta: i64,
    pub observed_at: DateTime<Utc>,
    pub best_effort: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedCell {
    pub position: Position,
    pub value: u8,
    pub state: TileState,
    pub optimistic: bool,
    pub recently_placed: bool,
}

/// Confirmed board with in-flight placements layered on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedView {
    pub game_id: u64,
    pub turn: u64,
    pub state: Option<GameState>,
    pub can_act: bool,
    pub scores: Vec<u64>,
    pub cells: Vec<MergedCell>,
}

impl MergedView {
    pub fn cell(&self, position: Position) -> Option<&MergedCell> {
        self.cells.iter().find(|c| c.position == position)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub turn_changed: bool,
    pub new_tiles: Vec<Position>,
    pub dropped_staged: Vec<PendingPlacement>,
    pub recap: Option<OpponentRecap>,
}

struct ReconcilerState {
    snapshot: Option<Arc<GameSnapshot>>,
    board: Board,
    highlights: HashMap<Position, Instant>,
    pending: Vec<PendingPlacement>,
    could_act: bool,
    last_recap: Option<OpponentRecap>,
    // newest read folded in so far; older reads that finish late are dropped
    applied_read: u64,
}

pub struct GameStateReconciler {
    game_id: u64,
    player: String,
    rules: GameRules,
    lifecycle: TileLifecycle,
    highlight_window: Duration,
    recap_tile_count: usize,
    cache: Arc<LedgerCache>,
    staging: Arc<RwLock<MoveStagingStore>>,
    state: RwLock<ReconcilerState>,
    next_read: AtomicU64,
}

impl GameStateReconciler {
    pub fn new(
        game_id: u64,
        player: &str,
        config: &Config,
        cache: Arc<LedgerCache>,
        staging: Arc<RwLock<MoveStagingStore>>,
    ) -> Self {
        let rules = config.game_rules();
        Self {
            game_id,
            player: player.to_string(),
            lifecycle: config.tile_lifecycle(),
            highlight_window: config.highlight_window(),
            recap_tile_count: config.recap_tile_count,
            cache,
            staging,
            state: RwLock::new(ReconcilerState {
                snapshot: None,
                board: Board::new(rules.board_size()),
                highlights: HashMap::new(),
                pending: Vec::new(),
                could_act: false,
                last_recap: None,
                applied_read: 0,
            }),
            next_read: AtomicU64::new(1),
            rules,
        }
    }

    pub fn game_id(&self) -> u64 {
        self.game_id
    }

    pub fn player(&self) -> &str {
        &self.player
    }

    pub fn staging(&self) -> &Arc<RwLock<MoveStagingStore>> {
        &self.staging
    }

    pub async fn snapshot(&self) -> Option<Arc<GameSnapshot>> {
        self.state.read().await.snapshot.clone()
    }

    pub async fn last_recap(&self) -> Option<OpponentRecap> {
        self.state.read().await.last_recap.clone()
    }

    /// Re-reads the game from the ledger, bypassing cached values. A read
    /// that finishes after a newer one has been applied is discarded.
    pub async fn refresh(&self) -> Result<ReconcileOutcome> {
        let read = self.begin_read().await;
        let (snapshot, tiles, player) = self.fetch().await?;
        Ok(self
            .apply_read(Some(read), &snapshot, &tiles, &player, Instant::now())
            .await)
    }

    /// Like `refresh`, but nothing is applied once `token` is cancelled.
    pub async fn refresh_if_alive(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<ReconcileOutcome>> {
        let read = self.begin_read().await;
        let fetched = tokio::select! {
            _ = token.cancelled() => None,
            fetched = self.fetch() => Some(fetched),
        };
        let Some(fetched) = fetched else {
            tracing::debug!("Poll for game {} cancelled mid-fetch", self.game_id);
            return Ok(None);
        };
        let (snapshot, tiles, player) = fetched?;
        if token.is_cancelled() {
            tracing::debug!("Dropping poll result for cancelled game {}", self.game_id);
            return Ok(None);
        }
        Ok(Some(
            self.apply_read(Some(read), &snapshot, &tiles, &player, Instant::now())
                .await,
        ))
    }

    // Numbers the read before invalidating so it can only be newer than every
    // read that may already be in flight.
    async fn begin_read(&self) -> u64 {
        let read = self.next_read.fetch_add(1, Ordering::Relaxed);
        self.cache.invalidate_game(self.game_id, &self.player).await;
        read
    }

    async fn fetch(&self) -> Result<(Arc<GameSnapshot>, Arc<Vec<PlacedTile>>, Arc<PlayerInfo>)> {
        tokio::try_join!(
            self.cache.game_state(self.game_id),
            self.cache.placed_tiles(self.game_id),
            self.cache.player_info(self.game_id, &self.player),
        )
    }

    /// Folds a confirmed read into local state and syncs the staging store.
    pub async fn apply(
        &self,
        snapshot: &GameSnapshot,
        tiles: &[PlacedTile],
        player: &PlayerInfo,
        now: Instant,
    ) -> ReconcileOutcome {
        self.apply_read(None, snapshot, tiles, player, now).await
    }

    async fn apply_read(
        &self,
        read: Option<u64>,
        snapshot: &GameSnapshot,
        tiles: &[PlacedTile],
        player: &PlayerInfo,
        now: Instant,
    ) -> ReconcileOutcome {
        let board = Board::from_placed(
            self.rules.board_size(),
            tiles,
            snapshot.turn,
            snapshot.players.len(),
            &self.lifecycle,
        );
        let can_act = snapshot.can_act(&self.player);

        let mut state = self.state.write().await;
        if let Some(read) = read {
            if read < state.applied_read {
                tracing::debug!(
                    "Discarding stale read {} for game {} (applied {})",
                    read,
                    self.game_id,
                    state.applied_read
                );
                return ReconcileOutcome::default();
            }
            state.applied_read = read;
        }
        let previous = state.snapshot.clone();

        // Tiles we staged ourselves are already known locally.
        let new_tiles: Vec<Position> = match &previous {
            None => Vec::new(),
            Some(_) => board
                .tiles()
                .map(|(position, _)| *position)
                .filter(|position| !state.board.is_occupied(*position))
                .filter(|position| !state.pending.iter().any(|p| p.position == *position))
                .collect(),
        };
        let expires_at = now + self.highlight_window;
        for position in &new_tiles {
            state.highlights.insert(*position, expires_at);
        }
        state.highlights.retain(|position, _| board.is_occupied(*position));

        let turn_changed = previous
            .as_ref()
            .map(|prev| prev.turn != snapshot.turn)
            .unwrap_or(false);
        if turn_changed {
            tracing::info!(
                "Game {} advanced to turn {} (player {} to move)",
                self.game_id,
                snapshot.turn,
                snapshot.current_player
            );
        }

        let recap = match previous.as_deref() {
            Some(prev) if !state.could_act && can_act => {
                Some(self.build_recap(prev, snapshot, tiles))
            }
            _ => None,
        };
        if let Some(recap) = &recap {
            tracing::info!(
                "Opponent recap (best effort): {} tile(s), score {:+}",
                recap.tiles.len(),
                recap.score_delta
            );
            state.last_recap = Some(recap.clone());
        }

        state.snapshot = Some(Arc::new(snapshot.clone()));
        state.board = board.clone();
        state.could_act = can_act;

        // Staging is synced under the state lock so reads land in order.
        let dropped_staged = {
            let mut staging = self.staging.write().await;
            let dropped = staging.sync_board(board, snapshot.turn);
            staging.sync_hand(&player.hand);
            dropped
        };
        drop(state);

        ReconcileOutcome {
            turn_changed,
            new_tiles,
            dropped_staged,
            recap,
        }
    }

    fn build_recap(
        &self,
        previous: &GameSnapshot,
        current: &GameSnapshot,
        tiles: &[PlacedTile],
    ) -> OpponentRecap {
        let mover = previous.current_player;
        let mut recent: Vec<PlacedTile> = tiles
            .iter()
            .filter(|t| t.turn_placed > 0 && t.turn_placed >= previous.turn)
            .copied()
            .collect();
        recent.sort_by(|a, b| b.turn_placed.cmp(&a.turn_placed));
        recent.truncate(self.recap_tile_count);

        OpponentRecap {
            player: previous.players.get(mover).cloned(),
            tiles: recent,
            score_delta: current.score_of(mover) as i64 - previous.score_of(mover) as i64,
            observed_at: Utc::now(),
            best_effort: true,
        }
    }

    /// Unflags tiles whose highlight window has passed.
    pub async fn expire_highlights(&self, now: Instant) -> Vec<Position> {
        let mut state = self.state.write().await;
        let expired: Vec<Position> = state
            .highlights
            .iter()
            .filter(|(_, expires_at)| **expires_at <= now)
            .map(|(position, _)| *position)
            .collect();
        for position in &expired {
            state.highlights.remove(position);
        }
        expired
    }

    pub async fn set_pending(&self, placements: Vec<PendingPlacement>) {
        self.state.write().await.pending = placements;
    }

    pub async fn clear_pending(&self) {
        self.state.write().await.pending.clear();
    }

    pub async fn pending(&self) -> Vec<PendingPlacement> {
        self.state.read().await.pending.clone()
    }

    pub async fn merged_view(&self) -> MergedView {
        let now = Instant::now();
        let state = self.state.read().await;
        let mut cells: Vec<MergedCell> = state
            .board
            .tiles()
            .map(|(position, tile)| MergedCell {
                position: *position,
                value: tile.value,
                state: tile.state,
                optimistic: false,
                recently_placed: state
                    .highlights
                    .get(position)
                    .map(|expires_at| *expires_at > now)
                    .unwrap_or(false),
            })
            .collect();
        for pending in &state.pending {
            if state.board.is_occupied(pending.position) {
                continue;
            }
            cells.push(MergedCell {
                position: pending.position,
                value: pending.value,
                state: TileState::Unplayed,
                optimistic: true,
                recently_placed: false,
            });
        }

        let snapshot = state.snapshot.as_deref();
        MergedView {
            game_id: self.game_id,
            turn: snapshot.map(|s| s.turn).unwrap_or(0),
            state: snapshot.map(|s| s.state),
            can_act: state.could_act,
            scores: snapshot.map(|s| s.scores.clone()).unwrap_or_default(),
            cells,
        }
    }
}
