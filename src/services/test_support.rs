//! In-memory `GameLedger` shared by the service tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock};
use tokio::time::{sleep, Duration};

use crate::{
    config::{test_config, Config},
    error::{AppError, Result},
    models::{
        GameSnapshot, GameState, PlacedTile, Placement, PlayerInfo, ReceiptStatus, TxHandle,
    },
    services::{
        move_staging::MoveStagingStore, onchain::GameLedger, reconciler::GameStateReconciler,
        request_cache::LedgerCache,
    },
};

pub(crate) const LOCAL: &str = "0xa11";
pub(crate) const OPPONENT: &str = "0xb0b";
pub(crate) const GAME_ID: u64 = 1;

#[derive(Debug, Clone)]
pub(crate) enum MockReceipt {
    Succeeded,
    Reverted(String),
    /// Never finalizes; the wait runs into its timeout.
    Pending,
}

pub(crate) struct MockLedger {
    pub snapshot: Mutex<GameSnapshot>,
    pub tiles: Mutex<Vec<PlacedTile>>,
    pub player: Mutex<PlayerInfo>,
    pub write_error: Mutex<Option<AppError>>,
    pub receipt: Mutex<MockReceipt>,
    pub write_gate: Mutex<Option<Arc<Notify>>>,
    pub last_placements: Mutex<Vec<Placement>>,
    // placements sent but not yet confirmed by a receipt
    unconfirmed: Mutex<Option<Vec<Placement>>>,
    read_delay: Mutex<Option<Duration>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl MockLedger {
    /// Two-player game on turn 1 with only the centre seed tile placed.
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(GameSnapshot {
                game_id: GAME_ID,
                turn: 1,
                current_player: 0,
                players: vec![LOCAL.to_string(), OPPONENT.to_string()],
                scores: vec![0, 0],
                state: GameState::Playing,
                tiles_remaining: 60,
            }),
            tiles: Mutex::new(vec![PlacedTile {
                x: 7,
                y: 7,
                number: 0,
                turn_placed: 0,
            }]),
            player: Mutex::new(PlayerInfo {
                hand: vec![2, 3, 5, 9],
                score: 0,
                has_joined: true,
            }),
            write_error: Mutex::new(None),
            receipt: Mutex::new(MockReceipt::Succeeded),
            write_gate: Mutex::new(None),
            last_placements: Mutex::new(Vec::new()),
            unconfirmed: Mutex::new(None),
            read_delay: Mutex::new(None),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_turn(&self, turn: u64, current_player: usize, scores: Vec<u64>) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.turn = turn;
        snapshot.current_player = current_player;
        snapshot.scores = scores;
    }

    pub fn push_tile(&self, x: u8, y: u8, number: u8, turn_placed: u64) {
        self.tiles.lock().unwrap().push(PlacedTile {
            x,
            y,
            number,
            turn_placed,
        });
    }

    pub fn fail_writes_with(&self, error: AppError) {
        *self.write_error.lock().unwrap() = Some(error);
    }

    pub fn set_receipt(&self, receipt: MockReceipt) {
        *self.receipt.lock().unwrap() = receipt;
    }

    /// Reads capture state immediately and return after `delay`.
    pub fn slow_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    async fn read_pause(&self) {
        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
    }

    // A confirmed play_turn lands on the board, spends the hand tiles and
    // passes the turn.
    fn land_turn(&self, placements: &[Placement]) {
        let mut snapshot = self.snapshot.lock().unwrap();
        let mut tiles = self.tiles.lock().unwrap();
        let mut player = self.player.lock().unwrap();
        for placement in placements {
            tiles.push(PlacedTile {
                x: placement.x,
                y: placement.y,
                number: placement.number,
                turn_placed: snapshot.turn,
            });
            if let Some(slot) = player.hand.iter().position(|v| *v == placement.number) {
                player.hand.remove(slot);
            }
        }
        snapshot.turn += 1;
        snapshot.current_player = (snapshot.current_player + 1) % snapshot.players.len();
    }

    /// Holds every write until the returned notify is signalled.
    pub fn gate_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.write_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    async fn write(&self, name: &str) -> Result<TxHandle> {
        let gate = self.write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let count = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.write_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(TxHandle(format!("0x{}{:02}", name.len(), count)))
    }
}

#[async_trait]
impl GameLedger for MockLedger {
    async fn get_game_state(&self, _game_id: u64) -> Result<GameSnapshot> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.snapshot.lock().unwrap().clone();
        self.read_pause().await;
        Ok(snapshot)
    }

    async fn get_player_info(&self, _game_id: u64, _address: &str) -> Result<PlayerInfo> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let player = self.player.lock().unwrap().clone();
        self.read_pause().await;
        Ok(player)
    }

    async fn get_placed_tiles(&self, _game_id: u64) -> Result<Vec<PlacedTile>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let tiles = self.tiles.lock().unwrap().clone();
        self.read_pause().await;
        Ok(tiles)
    }

    async fn play_turn(&self, _game_id: u64, placements: &[Placement]) -> Result<TxHandle> {
        *self.last_placements.lock().unwrap() = placements.to_vec();
        let tx = self.write("play_turn").await?;
        *self.unconfirmed.lock().unwrap() = Some(placements.to_vec());
        Ok(tx)
    }

    async fn skip_turn(&self, _game_id: u64) -> Result<TxHandle> {
        self.write("skip_turn").await
    }

    async fn join_game(&self, _game_id: u64, _name: &str) -> Result<TxHandle> {
        self.write("join_game").await
    }

    async fn start_game(&self, _game_id: u64) -> Result<TxHandle> {
        self.write("start_game").await
    }

    async fn wait_for_receipt(
        &self,
        handle: &TxHandle,
        timeout: Duration,
    ) -> Result<ReceiptStatus> {
        let receipt = self.receipt.lock().unwrap().clone();
        match receipt {
            MockReceipt::Succeeded => {
                let landed = self.unconfirmed.lock().unwrap().take();
                if let Some(placements) = landed {
                    self.land_turn(&placements);
                }
                Ok(ReceiptStatus::Succeeded)
            }
            MockReceipt::Reverted(reason) => {
                self.unconfirmed.lock().unwrap().take();
                Ok(ReceiptStatus::Reverted { reason })
            }
            MockReceipt::Pending => {
                sleep(timeout).await;
                Err(AppError::ConfirmationTimeout {
                    tx_hash: handle.0.clone(),
                })
            }
        }
    }
}

/// Mock ledger wired through the real cache, staging store, and reconciler.
pub(crate) struct Harness {
    pub config: Config,
    pub ledger: Arc<MockLedger>,
    pub cache: Arc<LedgerCache>,
    pub staging: Arc<RwLock<MoveStagingStore>>,
    pub reconciler: Arc<GameStateReconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let ledger = Arc::new(MockLedger::new());
        let cache = Arc::new(LedgerCache::from_config(
            Arc::clone(&ledger) as Arc<dyn GameLedger>,
            &config,
        ));
        let staging = Arc::new(RwLock::new(MoveStagingStore::new(config.game_rules())));
        let reconciler = Arc::new(GameStateReconciler::new(
            GAME_ID,
            LOCAL,
            &config,
            Arc::clone(&cache),
            Arc::clone(&staging),
        ));
        Self {
            config,
            ledger,
            cache,
            staging,
            reconciler,
        }
    }
}
