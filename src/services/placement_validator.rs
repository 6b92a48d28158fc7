//! Local mirror of the ledger's placement acceptance rules.
//!
//! Everything here is pure: the same functions back live per-cell feedback,
//! bulk re-verification right before a turn is submitted, and score previews.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::{
    constants::{
        ADJACENT_TARGET_SUM, MAX_TILE_VALUE, POINTS_PER_SEQUENCE_UNIT, SEQUENCE_MULTIPLE,
    },
    models::{Board, GameRules, PendingPlacement, Position, RuleSet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Row,
    Column,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => f.write_str("row"),
            Axis::Column => f.write_str("column"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("tile value {0} is outside 0-9")]
    InvalidValue(u8),

    #[error("{0} is outside the board")]
    OutOfBounds(Position),

    #[error("{0} is already occupied")]
    Occupied(Position),

    #[error("{0} is not in line with this turn's placements")]
    NotInLine(Position),

    #[error("{0} does not touch any tile")]
    Disconnected(Position),

    #[error("{value} next to {neighbor} at {at} does not sum to 5")]
    AdjacencySum { value: u8, neighbor: u8, at: Position },

    #[error("{axis} run through {position} sums to {sum}, not a positive multiple of 5")]
    SequenceSum {
        axis: Axis,
        position: Position,
        sum: u32,
    },
}

/// Maximal contiguous run of occupied cells along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub axis: Axis,
    /// Row index for `Axis::Row`, column index for `Axis::Column`.
    pub line: u8,
    pub start: u8,
    pub len: u8,
    pub sum: u32,
}

impl Run {
    pub fn is_scoring(&self) -> bool {
        self.len > 1 && self.sum > 0 && self.sum % SEQUENCE_MULTIPLE == 0
    }
}

/// Confirmed board overlaid with this turn's staged placements.
pub struct CellView<'a> {
    board: &'a Board,
    staged: &'a [PendingPlacement],
}

impl<'a> CellView<'a> {
    pub fn new(board: &'a Board, staged: &'a [PendingPlacement]) -> Self {
        Self { board, staged }
    }

    pub fn size(&self) -> u8 {
        self.board.size()
    }

    pub fn value_at(&self, position: Position) -> Option<u8> {
        self.board.value_at(position).or_else(|| {
            self.staged
                .iter()
                .find(|s| s.position == position)
                .map(|s| s.value)
        })
    }

    pub fn is_occupied(&self, position: Position) -> bool {
        self.value_at(position).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.board.is_empty() && self.staged.is_empty()
    }

    /// Run through `position` along `axis`. `candidate` fills the cell when
    /// it is not yet placed.
    pub fn run_through(&self, position: Position, axis: Axis, candidate: Option<u8>) -> Run {
        let at = |i: u8| match axis {
            Axis::Row => Position::new(i, position.y),
            Axis::Column => Position::new(position.x, i),
        };
        let (line, origin) = match axis {
            Axis::Row => (position.y, position.x),
            Axis::Column => (position.x, position.y),
        };
        let value_of = |i: u8| {
            if i == origin {
                candidate.or_else(|| self.value_at(at(i)))
            } else {
                self.value_at(at(i))
            }
        };

        let mut sum = value_of(origin).map(u32::from).unwrap_or(0);
        let mut start = origin;
        while start > 0 {
            match value_of(start - 1) {
                Some(v) => {
                    sum += u32::from(v);
                    start -= 1;
                }
                None => break,
            }
        }
        let mut end = origin;
        while end + 1 < self.size() {
            match value_of(end + 1) {
                Some(v) => {
                    sum += u32::from(v);
                    end += 1;
                }
                None => break,
            }
        }

        Run {
            axis,
            line,
            start,
            len: end - start + 1,
            sum,
        }
    }
}

/// One rule variant. A game picks exactly one via `RuleSet::strategy`.
pub trait PlacementRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checked as each tile is staged.
    fn check(&self, view: &CellView<'_>, position: Position, value: u8)
        -> Result<(), PlacementError>;

    /// Checked once over the complete turn layout before it is submitted.
    fn check_turn(
        &self,
        _view: &CellView<'_>,
        _staged: &[PendingPlacement],
    ) -> Result<(), PlacementError> {
        Ok(())
    }
}

pub struct AdjacencySumRule;

impl PlacementRule for AdjacencySumRule {
    fn name(&self) -> &'static str {
        "adjacency_sum"
    }

    fn check(
        &self,
        view: &CellView<'_>,
        position: Position,
        value: u8,
    ) -> Result<(), PlacementError> {
        for neighbor_pos in position.neighbors(view.size()) {
            if let Some(neighbor) = view.value_at(neighbor_pos) {
                if u16::from(neighbor) + u16::from(value) != u16::from(ADJACENT_TARGET_SUM) {
                    return Err(PlacementError::AdjacencySum {
                        value,
                        neighbor,
                        at: neighbor_pos,
                    });
                }
            }
        }
        Ok(())
    }
}

pub struct SequenceRule;

impl PlacementRule for SequenceRule {
    fn name(&self) -> &'static str {
        "sequence"
    }

    // A run may pass through incomplete sums while the turn is being built;
    // only the finished layout has to add up.
    fn check(
        &self,
        _view: &CellView<'_>,
        _position: Position,
        _value: u8,
    ) -> Result<(), PlacementError> {
        Ok(())
    }

    fn check_turn(
        &self,
        view: &CellView<'_>,
        staged: &[PendingPlacement],
    ) -> Result<(), PlacementError> {
        for placement in staged {
            for axis in [Axis::Row, Axis::Column] {
                let run = view.run_through(placement.position, axis, None);
                if run.len > 1 && !run.is_scoring() {
                    return Err(PlacementError::SequenceSum {
                        axis,
                        position: placement.position,
                        sum: run.sum,
                    });
                }
            }
        }
        Ok(())
    }
}

impl RuleSet {
    pub fn strategy(self) -> &'static dyn PlacementRule {
        match self {
            RuleSet::AdjacencySum => &AdjacencySumRule,
            RuleSet::Sequence => &SequenceRule,
        }
    }
}

// Internal helper that checks the row/column lock for this turn.
fn check_direction_lock(
    staged: &[PendingPlacement],
    position: Position,
) -> Result<(), PlacementError> {
    match staged {
        [] => Ok(()),
        [first] => {
            if first.position.x == position.x || first.position.y == position.y {
                Ok(())
            } else {
                Err(PlacementError::NotInLine(position))
            }
        }
        [first, second, ..] => {
            let in_line = if first.position.y == second.position.y {
                position.y == first.position.y
            } else {
                position.x == first.position.x
            };
            if in_line {
                Ok(())
            } else {
                Err(PlacementError::NotInLine(position))
            }
        }
    }
}

/// Checks whether `value` may be placed at `position` given the confirmed
/// board and the placements already staged this turn.
pub fn validate(
    board: &Board,
    staged: &[PendingPlacement],
    position: Position,
    value: u8,
    rules: &GameRules,
) -> Result<(), PlacementError> {
    if value > MAX_TILE_VALUE {
        return Err(PlacementError::InvalidValue(value));
    }
    if !board.in_bounds(position) {
        return Err(PlacementError::OutOfBounds(position));
    }

    let view = CellView::new(board, staged);
    if view.is_occupied(position) {
        return Err(PlacementError::Occupied(position));
    }

    check_direction_lock(staged, position)?;

    if !rules.allow_islands
        && !view.is_empty()
        && !position
            .neighbors(board.size())
            .any(|n| view.is_occupied(n))
    {
        return Err(PlacementError::Disconnected(position));
    }

    rules.rule_set.strategy().check(&view, position, value)
}

/// Replays every staged placement in order, as the ledger will, then checks
/// the finished layout against the rule set.
pub fn validate_all(
    board: &Board,
    staged: &[PendingPlacement],
    rules: &GameRules,
) -> Result<(), PlacementError> {
    for (i, placement) in staged.iter().enumerate() {
        validate(board, &staged[..i], placement.position, placement.value, rules)?;
    }
    rules
        .rule_set
        .strategy()
        .check_turn(&CellView::new(board, staged), staged)
}

/// Points for the sequences completed by `staged`. Each row or column
/// contributes at most one sequence, even when reached from both axes or
/// several staged tiles.
pub fn score_placements(board: &Board, staged: &[PendingPlacement]) -> u32 {
    let view = CellView::new(board, staged);
    let mut counted = HashSet::new();
    let mut total = 0;

    for placement in staged {
        for axis in [Axis::Row, Axis::Column] {
            let run = view.run_through(placement.position, axis, None);
            if run.is_scoring() && counted.insert((run.axis, run.line)) {
                total += run.sum * POINTS_PER_SEQUENCE_UNIT;
            }
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoardVariant, PlacedTile, Tile, TileLifecycle, TileRef, TileState};

    fn rules(rule_set: RuleSet, allow_islands: bool) -> GameRules {
        GameRules {
            rule_set,
            variant: BoardVariant::Standard,
            allow_islands,
        }
    }

    fn board_with(tiles: &[(u8, u8, u8)]) -> Board {
        let placed: Vec<PlacedTile> = tiles
            .iter()
            .map(|&(x, y, number)| PlacedTile {
                x,
                y,
                number,
                turn_placed: 0,
            })
            .collect();
        Board::from_placed(15, &placed, 1, 2, &TileLifecycle::default())
    }

    fn staged(entries: &[(u8, u8, u8)]) -> Vec<PendingPlacement> {
        entries
            .iter()
            .enumerate()
            .map(|(i, &(x, y, value))| PendingPlacement {
                tile: TileRef(i),
                value,
                position: Position::new(x, y),
                turn: 1,
            })
            .collect()
    }

    #[test]
    fn empty_board_accepts_anything_in_bounds_under_both_rule_sets() {
        for variant in [BoardVariant::Standard, BoardVariant::Compact] {
            let board = Board::new(variant.size());
            for rule_set in [RuleSet::AdjacencySum, RuleSet::Sequence] {
                let rules = GameRules {
                    rule_set,
                    variant,
                    allow_islands: false,
                };
                for x in 0..variant.size() {
                    for y in 0..variant.size() {
                        for value in 0..=9 {
                            assert!(
                                validate(&board, &[], Position::new(x, y), value, &rules).is_ok()
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_out_of_bounds_and_bad_values() {
        let board = Board::new(15);
        let r = rules(RuleSet::AdjacencySum, false);
        assert_eq!(
            validate(&board, &[], Position::new(15, 0), 1, &r),
            Err(PlacementError::OutOfBounds(Position::new(15, 0)))
        );
        assert_eq!(
            validate(&board, &[], Position::new(1, 1), 10, &r),
            Err(PlacementError::InvalidValue(10))
        );
    }

    #[test]
    fn rejects_cells_taken_by_confirmed_or_staged_tiles() {
        let board = board_with(&[(7, 7, 2)]);
        let s = staged(&[(8, 7, 3)]);
        let r = rules(RuleSet::AdjacencySum, true);
        assert_eq!(
            validate(&board, &s, Position::new(7, 7), 3, &r),
            Err(PlacementError::Occupied(Position::new(7, 7)))
        );
        assert_eq!(
            validate(&board, &s, Position::new(8, 7), 3, &r),
            Err(PlacementError::Occupied(Position::new(8, 7)))
        );
    }

    #[test]
    fn adjacency_requires_every_neighbour_to_sum_to_five() {
        let board = board_with(&[(7, 7, 2), (9, 7, 1)]);
        let r = rules(RuleSet::AdjacencySum, false);
        assert!(validate(&board, &[], Position::new(7, 8), 3, &r).is_ok());
        // (8,7) touches both 2 and 1
        assert_eq!(
            validate(&board, &[], Position::new(8, 7), 3, &r),
            Err(PlacementError::AdjacencySum {
                value: 3,
                neighbor: 1,
                at: Position::new(9, 7)
            })
        );
    }

    #[test]
    fn disconnected_placement_needs_islands() {
        let board = board_with(&[(7, 7, 2)]);
        let strict = rules(RuleSet::AdjacencySum, false);
        let islands = rules(RuleSet::AdjacencySum, true);
        assert_eq!(
            validate(&board, &[], Position::new(1, 1), 4, &strict),
            Err(PlacementError::Disconnected(Position::new(1, 1)))
        );
        assert!(validate(&board, &[], Position::new(1, 1), 4, &islands).is_ok());
    }

    #[test]
    fn second_placement_must_share_row_or_column() {
        let board = Board::new(15);
        let r = rules(RuleSet::AdjacencySum, true);
        let s = staged(&[(3, 3, 1)]);
        assert!(validate(&board, &s, Position::new(3, 9), 1, &r).is_ok());
        assert!(validate(&board, &s, Position::new(9, 3), 1, &r).is_ok());
        assert_eq!(
            validate(&board, &s, Position::new(4, 4), 1, &r),
            Err(PlacementError::NotInLine(Position::new(4, 4)))
        );
    }

    #[test]
    fn lock_holds_for_later_placements_even_with_islands() {
        let board = Board::new(15);
        let r = rules(RuleSet::AdjacencySum, true);
        let s = staged(&[(3, 3, 1), (6, 3, 1)]);
        assert!(validate(&board, &s, Position::new(10, 3), 1, &r).is_ok());
        // same column as the first tile, but the lock is the row
        assert_eq!(
            validate(&board, &s, Position::new(3, 9), 1, &r),
            Err(PlacementError::NotInLine(Position::new(3, 9)))
        );
    }

    #[test]
    fn sequence_rule_checks_row_and_column_runs_of_the_finished_turn() {
        let board = board_with(&[(7, 7, 0), (8, 7, 2)]);
        let r = rules(RuleSet::Sequence, false);
        assert!(validate_all(&board, &staged(&[(9, 7, 3)]), &r).is_ok());
        assert_eq!(
            validate_all(&board, &staged(&[(9, 7, 4)]), &r),
            Err(PlacementError::SequenceSum {
                axis: Axis::Row,
                position: Position::new(9, 7),
                sum: 6
            })
        );
        // a zero sum is not a positive multiple
        let zeros = board_with(&[(7, 7, 0)]);
        assert!(matches!(
            validate_all(&zeros, &staged(&[(7, 8, 0)]), &r),
            Err(PlacementError::SequenceSum {
                axis: Axis::Column,
                ..
            })
        ));
    }

    #[test]
    fn sequence_may_pass_through_incomplete_sums_while_staging() {
        let board = board_with(&[(7, 7, 0)]);
        let r = rules(RuleSet::Sequence, false);
        assert!(validate(&board, &[], Position::new(8, 7), 2, &r).is_ok());
        let first = staged(&[(8, 7, 2)]);
        assert!(validate(&board, &first, Position::new(9, 7), 3, &r).is_ok());

        let turn = staged(&[(8, 7, 2), (9, 7, 3)]);
        assert!(validate_all(&board, &turn, &r).is_ok());
        assert_eq!(score_placements(&board, &turn), 50);
        // stopping after the first tile leaves 0+2
        assert!(matches!(
            validate_all(&board, &first, &r),
            Err(PlacementError::SequenceSum { sum: 2, .. })
        ));
    }

    #[test]
    fn out_of_range_neighbour_does_not_overflow() {
        let mut board = Board::new(15);
        board
            .place(
                Position::new(7, 7),
                Tile {
                    value: 250,
                    owner: None,
                    turn_placed: 0,
                    state: TileState::Played,
                },
            )
            .unwrap();
        let r = rules(RuleSet::AdjacencySum, false);
        assert!(matches!(
            validate(&board, &[], Position::new(8, 7), 9, &r),
            Err(PlacementError::AdjacencySum { neighbor: 250, .. })
        ));
    }

    #[test]
    fn validate_all_replays_in_order() {
        let board = board_with(&[(7, 7, 2)]);
        let r = rules(RuleSet::AdjacencySum, false);
        assert!(validate_all(&board, &staged(&[(8, 7, 3), (9, 7, 2)]), &r).is_ok());
        assert!(validate_all(&board, &staged(&[(8, 7, 3), (9, 7, 4)]), &r).is_err());
    }

    #[test]
    fn completing_a_row_run_scores_once() {
        let board = board_with(&[(7, 7, 0)]);
        let s = staged(&[(8, 7, 2), (9, 7, 3)]);
        assert_eq!(score_placements(&board, &s), 50);
    }

    #[test]
    fn row_and_column_sequences_both_score() {
        let board = board_with(&[(7, 7, 1), (8, 6, 1)]);
        // (8,7)=4 completes row 1+4 and column 1+4
        let s = staged(&[(8, 7, 4)]);
        assert_eq!(score_placements(&board, &s), 100);
    }

    #[test]
    fn one_sequence_per_row_is_scored() {
        // two separate qualifying runs in row 7, staged with islands
        let board = board_with(&[(2, 7, 1), (9, 7, 2)]);
        let s = staged(&[(3, 7, 4), (10, 7, 3)]);
        assert_eq!(score_placements(&board, &s), 50);
    }

    #[test]
    fn runs_that_are_not_multiples_score_nothing() {
        let board = board_with(&[(7, 7, 1)]);
        assert_eq!(score_placements(&board, &staged(&[(8, 7, 2)])), 0);
        assert_eq!(score_placements(&board, &[]), 0);
    }

    #[test]
    fn strategy_matches_rule_set() {
        assert_eq!(RuleSet::AdjacencySum.strategy().name(), "adjacency_sum");
        assert_eq!(RuleSet::Sequence.strategy().name(), "sequence");
    }
}
