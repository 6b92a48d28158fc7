use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::{BOARD_SIZE_COMPACT, BOARD_SIZE_STANDARD, MAX_TILE_VALUE};
use crate::error::AppError;
use crate::models::game::PlacedTile;

// ==================== GEOMETRY ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: u8,
    pub y: u8,
}

impl Position {
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Four-directional neighbours that lie inside a `size`×`size` board.
    pub fn neighbors(self, size: u8) -> impl Iterator<Item = Position> {
        let Position { x, y } = self;
        [
            x.checked_sub(1).map(|nx| Position::new(nx, y)),
            x.checked_add(1)
                .filter(|nx| *nx < size)
                .map(|nx| Position::new(nx, y)),
            y.checked_sub(1).map(|ny| Position::new(x, ny)),
            y.checked_add(1)
                .filter(|ny| *ny < size)
                .map(|ny| Position::new(x, ny)),
        ]
        .into_iter()
        .flatten()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardVariant {
    Standard,
    Compact,
}

impl BoardVariant {
    pub fn size(self) -> u8 {
        match self {
            Self::Standard => BOARD_SIZE_STANDARD,
            Self::Compact => BOARD_SIZE_COMPACT,
        }
    }

    pub fn center(self) -> Position {
        let mid = self.size() / 2;
        Position::new(mid, mid)
    }
}

impl FromStr for BoardVariant {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "15" | "15x15" => Ok(Self::Standard),
            "compact" | "7" | "7x7" => Ok(Self::Compact),
            other => Err(AppError::BadRequest(format!("Unknown board variant: {}", other))),
        }
    }
}

// ==================== RULES ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSet {
    /// Every touching neighbour must sum with the candidate to 5.
    AdjacencySum,
    /// Row and column runs must sum to a positive multiple of 5.
    Sequence,
}

impl FromStr for RuleSet {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adjacency" | "adjacency_sum" | "adjacency-sum" => Ok(Self::AdjacencySum),
            "sequence" | "sequences" => Ok(Self::Sequence),
            other => Err(AppError::BadRequest(format!("Unknown rule set: {}", other))),
        }
    }
}

/// Rule configuration fixed for the lifetime of one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRules {
    pub rule_set: RuleSet,
    pub variant: BoardVariant,
    pub allow_islands: bool,
}

impl GameRules {
    pub fn board_size(&self) -> u8 {
        self.variant.size()
    }
}

// ==================== TILES ====================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TileState {
    Unplayed,
    Played,
    Burning { turns_left: u64 },
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub value: u8,
    /// `None` for the centre seed tile.
    pub owner: Option<usize>,
    pub turn_placed: u64,
    pub state: TileState,
}

/// Turn-based burn-out of placed tiles. Disabled when `burn_after_turns` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TileLifecycle {
    pub burn_after_turns: Option<u64>,
    pub burn_duration_turns: u64,
}

impl TileLifecycle {
    pub fn state_at(&self, turn_placed: u64, current_turn: u64) -> TileState {
        let Some(burn_after) = self.burn_after_turns else {
            return TileState::Played;
        };
        let age = current_turn.saturating_sub(turn_placed);
        if age < burn_after {
            return TileState::Played;
        }
        let burned_for = age - burn_after;
        if burned_for >= self.burn_duration_turns {
            TileState::Empty
        } else {
            TileState::Burning {
                turns_left: self.burn_duration_turns - burned_for,
            }
        }
    }
}

// ==================== BOARD ====================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    size: u8,
    tiles: BTreeMap<Position, Tile>,
}

impl Board {
    pub fn new(size: u8) -> Self {
        Self {
            size,
            tiles: BTreeMap::new(),
        }
    }

    /// Builds the confirmed board from the ledger's placed-tile list.
    ///
    /// Out-of-range cells, out-of-range values and duplicate entries are
    /// dropped with a warning so the one-tile-per-cell invariant always holds
    /// locally.
    pub fn from_placed(
        size: u8,
        placed: &[PlacedTile],
        current_turn: u64,
        player_count: usize,
        lifecycle: &TileLifecycle,
    ) -> Self {
        let mut board = Self::new(size);
        for entry in placed {
            let position = Position::new(entry.x, entry.y);
            if !board.in_bounds(position) {
                tracing::warn!("Ignoring out-of-bounds tile at {}", position);
                continue;
            }
            if entry.number > MAX_TILE_VALUE {
                tracing::warn!("Ignoring tile at {} with value {}", position, entry.number);
                continue;
            }
            if board.is_occupied(position) {
                tracing::warn!("Ignoring duplicate tile at {}", position);
                continue;
            }
            let owner = (entry.turn_placed > 0 && player_count > 0)
                .then(|| (entry.turn_placed - 1) as usize % player_count);
            board.tiles.insert(
                position,
                Tile {
                    value: entry.number,
                    owner,
                    turn_placed: entry.turn_placed,
                    state: TileState::Played,
                },
            );
        }
        board.apply_lifecycle(current_turn, lifecycle);
        board
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn in_bounds(&self, position: Position) -> bool {
        position.x < self.size && position.y < self.size
    }

    pub fn get(&self, position: Position) -> Option<&Tile> {
        self.tiles.get(&position)
    }

    pub fn value_at(&self, position: Position) -> Option<u8> {
        self.tiles.get(&position).map(|tile| tile.value)
    }

    pub fn is_occupied(&self, position: Position) -> bool {
        self.tiles.contains_key(&position)
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn tiles(&self) -> impl Iterator<Item = (&Position, &Tile)> {
        self.tiles.iter()
    }

    /// Inserts a tile; refuses occupied or out-of-range cells.
    pub fn place(&mut self, position: Position, tile: Tile) -> Result<(), AppError> {
        if !self.in_bounds(position) {
            return Err(AppError::BadRequest(format!("{} is outside the board", position)));
        }
        if self.is_occupied(position) {
            return Err(AppError::BadRequest(format!("{} is already occupied", position)));
        }
        self.tiles.insert(position, tile);
        Ok(())
    }

    /// Moves tiles through played → burning → empty for `current_turn`.
    /// Empty tiles are removed; their positions are returned.
    pub fn apply_lifecycle(&mut self, current_turn: u64, lifecycle: &TileLifecycle) -> Vec<Position> {
        let mut removed = Vec::new();
        for (position, tile) in self.tiles.iter_mut() {
            // seed tile never burns
            if tile.owner.is_none() {
                continue;
            }
            tile.state = lifecycle.state_at(tile.turn_placed, current_turn);
            if tile.state == TileState::Empty {
                removed.push(*position);
            }
        }
        for position in &removed {
            self.tiles.remove(position);
        }
        removed
    }
}
