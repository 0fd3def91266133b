use super::constants::*;
use super::types::{Move, PieceType, Square};
use crate::error::{Result, ShogiError};
use std::collections::HashMap;
use std::sync::OnceLock;

// ==============================================================================
// --- Action lookup tables ---
// ==============================================================================
//
// Layout of the flat universe:
//   [0, BOARD_MOVE_ACTIONS_COUNT)   board moves, for each from, each to != from,
//                                   promote = false then true
//   [BOARD_MOVE_ACTIONS_COUNT, ..)  drops, for each hand kind, each square

pub struct ActionLookupTables {
    pub action_to_move: Vec<Move>,
    pub move_to_action: HashMap<Move, usize>,
}

static ACTION_LOOKUP_TABLES: OnceLock<ActionLookupTables> = OnceLock::new();

pub fn action_lookup_tables() -> &'static ActionLookupTables {
    ACTION_LOOKUP_TABLES.get_or_init(build_action_lookup_tables)
}

fn build_action_lookup_tables() -> ActionLookupTables {
    let mut action_to_move = Vec::with_capacity(ACTION_SPACE_SIZE);
    let mut move_to_action = HashMap::with_capacity(ACTION_SPACE_SIZE);

    // 1. board moves
    for from in Square::all() {
        for to in Square::all() {
            if from == to {
                continue;
            }
            for promote in [false, true] {
                let mv = Move::board(from, to, promote);
                move_to_action.insert(mv, action_to_move.len());
                action_to_move.push(mv);
            }
        }
    }

    // 2. drops
    for piece_type in PieceType::HAND {
        for to in Square::all() {
            let mv = Move::drop(piece_type, to);
            move_to_action.insert(mv, action_to_move.len());
            action_to_move.push(mv);
        }
    }

    debug_assert_eq!(action_to_move.len(), ACTION_SPACE_SIZE);
    ActionLookupTables {
        action_to_move,
        move_to_action,
    }
}

// ==============================================================================
// --- ActionSpaceMapper ---
// ==============================================================================

/// Bijection between moves and indices of the policy output.
#[derive(Clone, Copy)]
pub struct ActionSpaceMapper {
    tables: &'static ActionLookupTables,
}

impl Default for ActionSpaceMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionSpaceMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSpaceMapper")
            .field("total_actions", &self.total_actions())
            .finish()
    }
}

impl ActionSpaceMapper {
    pub fn new() -> Self {
        Self {
            tables: action_lookup_tables(),
        }
    }

    pub fn total_actions(&self) -> usize {
        self.tables.action_to_move.len()
    }

    /// Index of a move. Only fails for moves outside the universe (king drops).
    pub fn move_to_action(&self, mv: Move) -> Result<usize> {
        self.tables
            .move_to_action
            .get(&mv)
            .copied()
            .ok_or_else(|| ShogiError::MalformedInput(format!("move {} has no action index", mv)))
    }

    /// Move for an index; out-of-range indices are an error, never a fallback move.
    pub fn action_to_move(&self, action: usize) -> Result<Move> {
        self.tables.action_to_move.get(action).copied().ok_or_else(|| {
            ShogiError::MalformedInput(format!(
                "action {} outside universe of {}",
                action,
                self.total_actions()
            ))
        })
    }

    /// Boolean mask over the whole universe, true for each listed move.
    pub fn legal_mask(&self, moves: &[Move]) -> Result<Vec<bool>> {
        let mut mask = vec![false; self.total_actions()];
        for &mv in moves {
            mask[self.move_to_action(mv)?] = true;
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_size_matches_layout() {
        let mapper = ActionSpaceMapper::new();
        assert_eq!(mapper.total_actions(), ACTION_SPACE_SIZE);
        assert_eq!(mapper.tables.move_to_action.len(), ACTION_SPACE_SIZE);
    }

    #[test]
    fn first_and_last_indices() {
        let mapper = ActionSpaceMapper::new();
        let first = mapper.action_to_move(0).unwrap();
        assert_eq!(first.to_string(), "9a8a");
        assert_eq!(mapper.action_to_move(1).unwrap().to_string(), "9a8a+");
        let last = mapper.action_to_move(ACTION_SPACE_SIZE - 1).unwrap();
        assert_eq!(last.to_string(), "R*1i");
        assert_eq!(
            mapper.move_to_action(Move::from_usi("P*9a").unwrap()).unwrap(),
            BOARD_MOVE_ACTIONS_COUNT
        );
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mapper = ActionSpaceMapper::new();
        assert!(matches!(
            mapper.action_to_move(ACTION_SPACE_SIZE),
            Err(ShogiError::MalformedInput(_))
        ));
        assert!(mapper.action_to_move(usize::MAX).is_err());
    }

    #[test]
    fn legal_mask_marks_exactly_the_given_moves() {
        let mapper = ActionSpaceMapper::new();
        let moves = [
            Move::from_usi("7g7f").unwrap(),
            Move::from_usi("G*5e").unwrap(),
        ];
        let mask = mapper.legal_mask(&moves).unwrap();
        assert_eq!(mask.iter().filter(|&&b| b).count(), 2);
        for mv in moves {
            assert!(mask[mapper.move_to_action(mv).unwrap()]);
        }
    }
}
