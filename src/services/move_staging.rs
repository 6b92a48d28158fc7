use crate::{
    error::{AppError, Result},
    models::{Board, GameRules, HandTile, PendingPlacement, Placement, Position, TileRef},
    services::placement_validator::{self, PlacementError},
};

/// Uncommitted placements for the local player's active turn.
///
/// Staged tiles are hidden from `visible_hand()` rather than removed from
/// `hand`, so restoring them always keeps the original hand order.
#[derive(Debug, Clone)]
pub struct MoveStagingStore {
    rules: GameRules,
    board: Board,
    turn: u64,
    hand: Vec<HandTile>,
    staged: Vec<PendingPlacement>,
    selected: Option<TileRef>,
    preview_score: u32,
}

impl MoveStagingStore {
    pub fn new(rules: GameRules) -> Self {
        Self {
            board: Board::new(rules.board_size()),
            rules,
            turn: 0,
            hand: Vec::new(),
            staged: Vec::new(),
            selected: None,
            preview_score: 0,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn staged(&self) -> &[PendingPlacement] {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    fn is_staged(&self, tile: TileRef) -> bool {
        self.staged.iter().any(|s| s.tile == tile)
    }

    /// Hand tiles not currently staged, in hand order.
    pub fn visible_hand(&self) -> Vec<HandTile> {
        self.hand
            .iter()
            .filter(|h| !self.is_staged(h.tile))
            .copied()
            .collect()
    }

    pub fn selected(&self) -> Option<TileRef> {
        self.selected
    }

    pub fn select(&mut self, tile: TileRef) -> Result<()> {
        if !self.visible_hand().iter().any(|h| h.tile == tile) {
            return Err(AppError::BadRequest(format!(
                "Tile {} is not in hand",
                tile.0
            )));
        }
        self.selected = Some(tile);
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Live feedback for the selected tile over one cell.
    pub fn check_selected(&self, position: Position) -> std::result::Result<(), PlacementError> {
        let Some(value) = self
            .selected
            .and_then(|tile| self.hand.iter().find(|h| h.tile == tile))
            .map(|h| h.value)
        else {
            return Ok(());
        };
        placement_validator::validate(&self.board, &self.staged, position, value, &self.rules)
    }

    pub fn add(&mut self, tile: TileRef, position: Position) -> Result<()> {
        let hand_tile = self
            .hand
            .iter()
            .find(|h| h.tile == tile)
            .copied()
            .ok_or_else(|| AppError::BadRequest(format!("Tile {} is not in hand", tile.0)))?;
        if self.is_staged(tile) {
            return Err(AppError::BadRequest(format!(
                "Tile {} is already staged",
                tile.0
            )));
        }

        placement_validator::validate(
            &self.board,
            &self.staged,
            position,
            hand_tile.value,
            &self.rules,
        )?;

        self.staged.push(PendingPlacement {
            tile,
            value: hand_tile.value,
            position,
            turn: self.turn,
        });
        if self.selected == Some(tile) {
            self.selected = None;
        }
        self.recompute_preview();
        tracing::debug!(
            "Staged tile {} ({}) at {}, preview score {}",
            tile.0,
            hand_tile.value,
            position,
            self.preview_score
        );
        Ok(())
    }

    /// Unstages the tile at `position`. Tiles left disconnected stay staged.
    pub fn remove(&mut self, position: Position) -> Option<PendingPlacement> {
        let index = self.staged.iter().position(|s| s.position == position)?;
        let removed = self.staged.remove(index);
        self.recompute_preview();
        Some(removed)
    }

    pub fn clear(&mut self) -> Vec<PendingPlacement> {
        let removed = std::mem::take(&mut self.staged);
        self.recompute_preview();
        removed
    }

    pub fn preview_score(&self) -> u32 {
        self.preview_score
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.staged.iter().map(PendingPlacement::to_placement).collect()
    }

    pub fn verify_all(&self) -> std::result::Result<(), PlacementError> {
        placement_validator::validate_all(&self.board, &self.staged, &self.rules)
    }

    /// Verified copy of the staged placements for one submission. Staging is
    /// left untouched until the outcome is known.
    pub fn take_for_submission(&self) -> Result<Vec<PendingPlacement>> {
        if self.staged.is_empty() {
            return Err(AppError::NoStagedMoves);
        }
        self.verify_all()?;
        Ok(self.staged.clone())
    }

    /// The ledger consumed `submitted`: drop those tiles from hand and staging.
    pub fn commit_confirmed(&mut self, submitted: &[PendingPlacement]) -> Vec<PendingPlacement> {
        let (committed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.staged)
            .into_iter()
            .partition(|s| submitted.iter().any(|c| c.tile == s.tile));
        self.staged = kept;
        self.hand
            .retain(|h| !submitted.iter().any(|c| c.tile == h.tile));
        self.recompute_preview();
        committed
    }

    /// Adopts a newer confirmed board. Staged cells that the ledger has since
    /// filled are dropped and returned.
    pub fn sync_board(&mut self, board: Board, turn: u64) -> Vec<PendingPlacement> {
        self.board = board;
        self.turn = turn;
        let (conflicting, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.staged)
            .into_iter()
            .partition(|s| self.board.is_occupied(s.position));
        self.staged = kept;
        if !conflicting.is_empty() {
            tracing::warn!(
                "Dropped {} staged placement(s) now occupied on-chain",
                conflicting.len()
            );
        }
        self.recompute_preview();
        conflicting
    }

    /// Adopts the hand reported by the ledger. Staged placements survive only
    /// when their slot still holds the same value.
    pub fn sync_hand(&mut self, values: &[u8]) {
        let hand: Vec<HandTile> = values
            .iter()
            .enumerate()
            .map(|(i, value)| HandTile {
                tile: TileRef(i),
                value: *value,
            })
            .collect();
        if hand == self.hand {
            return;
        }
        let before = self.staged.len();
        self.staged
            .retain(|s| hand.iter().any(|h| h.tile == s.tile && h.value == s.value));
        if self.staged.len() != before {
            tracing::warn!(
                "Dropped {} staged placement(s) after hand changed",
                before - self.staged.len()
            );
        }
        if let Some(selected) = self.selected {
            if !hand.iter().any(|h| h.tile == selected) {
                self.selected = None;
            }
        }
        self.hand = hand;
        self.recompute_preview();
    }

    fn recompute_preview(&mut self) {
        self.preview_score = placement_validator::score_placements(&self.board, &self.staged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoardVariant, PlacedTile, RuleSet, TileLifecycle};

    fn store(rule_set: RuleSet, allow_islands: bool) -> MoveStagingStore {
        let rules = GameRules {
            rule_set,
            variant: BoardVariant::Standard,
            allow_islands,
        };
        let mut store = MoveStagingStore::new(rules);
        let seed = [PlacedTile {
            x: 7,
            y: 7,
            number: 0,
            turn_placed: 0,
        }];
        store.sync_board(
            Board::from_placed(15, &seed, 1, 2, &TileLifecycle::default()),
            1,
        );
        store.sync_hand(&[2, 3, 5, 9]);
        store
    }

    #[test]
    fn add_then_remove_restores_previous_state() {
        let mut store = store(RuleSet::AdjacencySum, false);
        let hand_before = store.visible_hand();

        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.visible_hand().len(), hand_before.len() - 1);

        let removed = store.remove(Position::new(8, 7)).unwrap();
        assert_eq!(removed.tile, TileRef(2));
        assert!(store.is_empty());
        assert_eq!(store.visible_hand(), hand_before);
    }

    #[test]
    fn rejected_add_leaves_store_untouched() {
        let mut store = store(RuleSet::AdjacencySum, false);
        let err = store.add(TileRef(0), Position::new(8, 7)).unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(PlacementError::AdjacencySum { .. })
        ));
        assert!(store.is_empty());
        assert_eq!(store.visible_hand().len(), 4);
    }

    #[test]
    fn unknown_or_already_staged_tiles_are_rejected() {
        let mut store = store(RuleSet::AdjacencySum, false);
        assert!(matches!(
            store.add(TileRef(9), Position::new(8, 7)),
            Err(AppError::BadRequest(_))
        ));
        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        assert!(matches!(
            store.add(TileRef(2), Position::new(6, 7)),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn clear_restores_hand_in_original_order() {
        let mut store = store(RuleSet::AdjacencySum, true);
        store.add(TileRef(3), Position::new(1, 1)).unwrap();
        store.add(TileRef(0), Position::new(1, 3)).unwrap();
        assert_eq!(store.visible_hand().len(), 2);

        let removed = store.clear();
        assert_eq!(removed.len(), 2);
        let values: Vec<u8> = store.visible_hand().iter().map(|h| h.value).collect();
        assert_eq!(values, vec![2, 3, 5, 9]);
        assert_eq!(store.preview_score(), 0);
    }

    #[test]
    fn sequence_is_staged_tile_by_tile_and_scored_once() {
        let mut store = store(RuleSet::Sequence, false);
        store.add(TileRef(0), Position::new(8, 7)).unwrap();
        assert_eq!(store.preview_score(), 0);
        store.add(TileRef(1), Position::new(9, 7)).unwrap();
        assert_eq!(store.preview_score(), 50);
        assert_eq!(store.take_for_submission().unwrap().len(), 2);

        store.remove(Position::new(9, 7));
        assert_eq!(store.preview_score(), 0);
        assert!(matches!(
            store.take_for_submission(),
            Err(AppError::Validation(PlacementError::SequenceSum { sum: 2, .. }))
        ));
    }

    #[test]
    fn selection_is_cleared_once_tile_is_staged() {
        let mut store = store(RuleSet::AdjacencySum, false);
        store.select(TileRef(2)).unwrap();
        assert!(store.check_selected(Position::new(8, 7)).is_ok());
        assert!(store.check_selected(Position::new(0, 0)).is_err());
        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        assert_eq!(store.selected(), None);
        assert!(store.select(TileRef(2)).is_err());

        store.select(TileRef(0)).unwrap();
        store.deselect();
        assert_eq!(store.selected(), None);
        // nothing selected, nothing to reject
        assert!(store.check_selected(Position::new(0, 0)).is_ok());
    }

    #[test]
    fn commit_confirmed_consumes_tiles() {
        let mut store = store(RuleSet::AdjacencySum, false);
        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        let submitted = store.take_for_submission().unwrap();
        let committed = store.commit_confirmed(&submitted);
        assert_eq!(committed.len(), 1);
        assert!(store.is_empty());
        let values: Vec<u8> = store.visible_hand().iter().map(|h| h.value).collect();
        assert_eq!(values, vec![2, 3, 9]);
    }

    #[test]
    fn sync_hand_keeps_matching_staged_tiles() {
        let mut store = store(RuleSet::AdjacencySum, false);
        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        store.sync_hand(&[2, 3, 5, 1]);
        assert_eq!(store.len(), 1);
        store.sync_hand(&[2, 3, 4]);
        assert!(store.is_empty());
    }

    #[test]
    fn sync_board_drops_staged_cells_taken_on_chain() {
        let mut store = store(RuleSet::AdjacencySum, false);
        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        let tiles = [
            PlacedTile {
                x: 7,
                y: 7,
                number: 0,
                turn_placed: 0,
            },
            PlacedTile {
                x: 8,
                y: 7,
                number: 5,
                turn_placed: 2,
            },
        ];
        let dropped = store.sync_board(
            Board::from_placed(15, &tiles, 3, 2, &TileLifecycle::default()),
            3,
        );
        assert_eq!(dropped.len(), 1);
        assert!(store.is_empty());
        assert_eq!(store.turn(), 3);
    }

    #[test]
    fn placements_use_wire_form() {
        let mut store = store(RuleSet::AdjacencySum, false);
        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        assert_eq!(
            store.placements(),
            vec![Placement {
                x: 8,
                y: 7,
                number: 5
            }]
        );
        assert!(store.verify_all().is_ok());
    }

    #[test]
    fn take_for_submission_requires_staged_moves() {
        let mut store = store(RuleSet::AdjacencySum, false);
        assert_eq!(store.take_for_submission(), Err(AppError::NoStagedMoves));

        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        let submitted = store.take_for_submission().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn commit_confirmed_keeps_tiles_staged_after_submission() {
        let mut store = store(RuleSet::AdjacencySum, true);
        store.add(TileRef(2), Position::new(8, 7)).unwrap();
        let submitted = store.take_for_submission().unwrap();
        store.add(TileRef(3), Position::new(11, 7)).unwrap();

        store.commit_confirmed(&submitted);
        assert_eq!(store.len(), 1);
        assert_eq!(store.staged()[0].tile, TileRef(3));
    }
}
