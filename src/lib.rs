//! # shogi_ppo - Shogi environment and on-policy PPO core
//!
//! A complete Shogi rules engine (move generation, drops, promotion,
//! repetition, checkmate) exposed through a fixed action space and tensor
//! observations, plus the PPO machinery that trains a policy from self-play.
//!
//! ## Modules
//! - `game_env`: position, legality, SFEN, action mapping, observations
//! - `experience` / `ppo`: rollout buffer with GAE and the clipped update
//! - `self_play` / `inference`: collection workers and the batched evaluator
//!
//! ## Example
//! ```rust
//! use shogi_ppo::GameState;
//!
//! let mut game = GameState::new();
//! let moves = game.generate_legal_moves();
//! assert_eq!(moves.len(), 30);
//! game.apply_move(moves[0]).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod game_env;
pub mod model;

// training pipeline
pub mod experience;
pub mod inference;
pub mod ppo;
pub mod self_play;

#[cfg(feature = "torch")]
pub mod nn_model;

pub use config::{CollectionConfig, PpoConfig, RulesConfig, TrainingConfig};
pub use error::{Result, ShogiError};

pub use game_env::{
    ActionSpaceMapper, Color, GameOutcome, GameState, GameStatus, Hand, IllegalReason, Move,
    MoveVerdict, Observation, Piece, PieceType, Square,
};

pub use game_env::{
    ACTION_SPACE_SIZE, BOARD_CHANNELS, BOARD_COLS, BOARD_MOVE_ACTIONS_COUNT, BOARD_ROWS,
    DROP_ACTIONS_COUNT, SCALAR_FEATURE_COUNT, START_SFEN, TOTAL_SQUARES,
};

pub use experience::{ExperienceBuffer, Minibatch, Transition, TurnOrder};
pub use inference::{inference_channel, ChannelEvaluator, InferenceServer};
pub use model::{LinearPolicy, PolicyModel, PolicyOutput, TrainableModel};
pub use ppo::{PpoUpdateEngine, UpdateMetrics};
pub use self_play::{collect_parallel, collect_segment, CollectionReport, EpisodeStats, StepExecutor};
