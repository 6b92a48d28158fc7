// src/models/mod.rs
pub mod board;
pub mod game;

// Re-export commonly used types so other modules can use `crate::models::X`
pub use board::{
    Board, BoardVariant, GameRules, Position, RuleSet, Tile, TileLifecycle, TileState,
};
pub use game::{
    GameSnapshot, GameState, HandTile, PendingPlacement, PlacedTile, Placement, PlayerInfo,
    ReceiptStatus, TileRef, TxHandle,
};
