// src/error.rs
// Error taxonomy shared by the rules engine, action mapper, buffer and update engine

use thiserror::Error;

use crate::game_env::{GameOutcome, IllegalReason, Move};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShogiError {
    /// Well-formed move that the rules forbid in this position.
    #[error("illegal move {mv}: {reason} (position: {sfen})")]
    IllegalMove {
        mv: Move,
        reason: IllegalReason,
        sfen: String,
    },

    /// Structurally invalid move text, action index, position string or tensor shape.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Move attempted after the game already ended.
    #[error("game already finished ({outcome}) (position: {sfen})")]
    TerminalStateViolation { outcome: GameOutcome, sfen: String },

    /// Experience buffer used outside its fill / compute / drain protocol.
    #[error("buffer state error: {0}")]
    BufferState(String),

    /// Non-finite loss or gradient detected during an update.
    #[error("numeric instability: {0}")]
    NumericInstability(String),

    /// The engine could neither accept nor explain a move; always a bug.
    #[error("rules engine validation error for {mv}: {detail} (position: {sfen})")]
    Validation {
        mv: Move,
        detail: String,
        sfen: String,
    },

    #[error("model error: {0}")]
    Model(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Update stopped between optimizer steps by the caller.
    #[error("update interrupted after {completed_steps} optimizer steps")]
    Interrupted { completed_steps: usize },
}

pub type Result<T> = std::result::Result<T, ShogiError>;
