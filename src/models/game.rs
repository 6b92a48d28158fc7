use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::board::Position;
use crate::services::onchain::addr_eq;

const STATE_SETUP: u64 = 0;
const STATE_PLAYING: u64 = 1;
const STATE_COMPLETED: u64 = 2;
const STATE_CANCELLED: u64 = 3;

// ==================== GAME SNAPSHOT ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GameState {
    Setup,
    Playing,
    Completed,
    Cancelled,
}

impl GameState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Playing => "PLAYING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            STATE_SETUP => Some(Self::Setup),
            STATE_PLAYING => Some(Self::Playing),
            STATE_COMPLETED => Some(Self::Completed),
            STATE_CANCELLED => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Confirmed game state as last read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub game_id: u64,
    pub turn: u64,
    pub current_player: usize,
    pub players: Vec<String>,
    pub scores: Vec<u64>,
    pub state: GameState,
    pub tiles_remaining: u32,
}

impl GameSnapshot {
    pub fn player_index(&self, address: &str) -> Option<usize> {
        self.players.iter().position(|p| addr_eq(p, address))
    }

    /// True when `address` is seated and it is their move in a running game.
    pub fn can_act(&self, address: &str) -> bool {
        self.state == GameState::Playing && self.player_index(address) == Some(self.current_player)
    }

    pub fn score_of(&self, index: usize) -> u64 {
        self.scores.get(index).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub hand: Vec<u8>,
    pub score: u64,
    pub has_joined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedTile {
    pub x: u8,
    pub y: u8,
    pub number: u8,
    pub turn_placed: u64,
}

impl PlacedTile {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

// ==================== TRANSACTIONS ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub x: u8,
    pub y: u8,
    pub number: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle(pub String);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Succeeded,
    Reverted { reason: String },
}

// ==================== HAND & STAGING ====================
/// Index of a tile instance within the hand it was dealt in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileRef(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandTile {
    pub tile: TileRef,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPlacement {
    pub tile: TileRef,
    pub value: u8,
    pub position: Position,
    pub turn: u64,
}

impl PendingPlacement {
    pub fn to_placement(&self) -> Placement {
        Placement {
            x: self.position.x,
            y: self.position.y,
            number: self.value,
        }
    }
}
