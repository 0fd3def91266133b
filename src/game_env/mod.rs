// ==============================================================================
// --- Module declarations ---
// ==============================================================================

pub mod actions;
pub mod bitboard;
pub mod board;
pub mod constants;
pub mod features;
pub mod rules;
pub mod sfen;
pub mod types;
pub mod zobrist;

// ==============================================================================
// --- Public API re-exports ---
// ==============================================================================

pub use constants::*;

pub use types::{Color, GameOutcome, GameStatus, Hand, Move, Observation, Piece, PieceType, Square};

pub use board::{GameState, Position, UndoRecord};

pub use rules::{IllegalReason, MoveVerdict};

pub use bitboard::Bitboard;

pub use actions::{action_lookup_tables, ActionSpaceMapper};
