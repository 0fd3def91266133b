// src/config.rs
// Hyperparameters for the rules engine, experience collection and PPO updates

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShogiError};
use crate::game_env::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_MOVES_PER_GAME, DEFAULT_REPETITION_THRESHOLD};

/// Game-termination limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Ply count at which a game ends with `MoveLimitReached`
    pub max_moves_per_game: u32,
    /// Occurrences of the same position (side to move included) that end the game in a draw
    pub repetition_threshold: u32,
    /// Number of past position hashes kept for repetition detection
    pub history_limit: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_moves_per_game: DEFAULT_MAX_MOVES_PER_GAME,
            repetition_threshold: DEFAULT_REPETITION_THRESHOLD,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl RulesConfig {
    pub fn with_max_moves(mut self, n: u32) -> Self {
        self.max_moves_per_game = n;
        self
    }

    pub fn with_repetition_threshold(mut self, n: u32) -> Self {
        self.repetition_threshold = n;
        self
    }

    pub fn with_history_limit(mut self, n: usize) -> Self {
        self.history_limit = n.max(1);
        self
    }

    /// Bounds every game constructor relies on. A threshold below 2 would
    /// call the very first position a repetition.
    pub fn validate(&self) -> Result<()> {
        if self.repetition_threshold < 2 {
            return Err(ShogiError::Config(format!(
                "repetition_threshold must be at least 2, got {}",
                self.repetition_threshold
            )));
        }
        if self.max_moves_per_game == 0 {
            return Err(ShogiError::Config("max_moves_per_game must be at least 1".into()));
        }
        if self.history_limit == 0 {
            return Err(ShogiError::Config("history_limit must be at least 1".into()));
        }
        Ok(())
    }
}

/// PPO optimisation hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Discount factor, in (0, 1]
    pub gamma: f32,
    /// GAE smoothing, in [0, 1]
    pub gae_lambda: f32,
    /// Ratio clip range for the policy and the value estimate
    pub clip_epsilon: f32,
    /// Passes over the buffer per update (K)
    pub epochs: usize,
    pub minibatch_size: usize,
    /// c1
    pub value_coef: f32,
    /// c2
    pub entropy_coef: f32,
    pub max_grad_norm: f32,
    pub learning_rate: f64,
    /// Standardise advantages within each minibatch before the policy loss
    pub normalize_advantages: bool,
    pub shuffle: bool,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_epsilon: 0.2,
            epochs: 10,
            minibatch_size: 64,
            value_coef: 0.5,
            entropy_coef: 0.01,
            max_grad_norm: 0.5,
            learning_rate: 3e-4,
            normalize_advantages: true,
            shuffle: true,
        }
    }
}

impl PpoConfig {
    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_gae_lambda(mut self, lambda: f32) -> Self {
        self.gae_lambda = lambda;
        self
    }

    pub fn with_clip_epsilon(mut self, eps: f32) -> Self {
        self.clip_epsilon = eps;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_minibatch_size(mut self, size: usize) -> Self {
        self.minibatch_size = size;
        self
    }

    pub fn with_coefficients(mut self, value_coef: f32, entropy_coef: f32) -> Self {
        self.value_coef = value_coef;
        self.entropy_coef = entropy_coef;
        self
    }

    pub fn with_max_grad_norm(mut self, norm: f32) -> Self {
        self.max_grad_norm = norm;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(ShogiError::Config(format!("gamma must be in (0, 1], got {}", self.gamma)));
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(ShogiError::Config(format!(
                "gae_lambda must be in [0, 1], got {}",
                self.gae_lambda
            )));
        }
        if !(self.clip_epsilon > 0.0) {
            return Err(ShogiError::Config(format!(
                "clip_epsilon must be positive, got {}",
                self.clip_epsilon
            )));
        }
        if self.epochs == 0 {
            return Err(ShogiError::Config("epochs must be at least 1".into()));
        }
        if self.minibatch_size == 0 {
            return Err(ShogiError::Config("minibatch_size must be at least 1".into()));
        }
        if !(self.max_grad_norm > 0.0) {
            return Err(ShogiError::Config(format!(
                "max_grad_norm must be positive, got {}",
                self.max_grad_norm
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ShogiError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Self-play collection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Buffer capacity of each worker's segment
    pub steps_per_worker: usize,
    pub num_workers: usize,
    /// Largest batch the inference server forms
    pub inference_batch_size: usize,
    /// Capacity of the request queue; senders block when it is full
    pub inference_queue_bound: usize,
    /// How long the server waits for more requests before running a partial batch
    pub inference_timeout_ms: u64,
    pub seed: u64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            steps_per_worker: 2048,
            num_workers: 1,
            inference_batch_size: 16,
            inference_queue_bound: 64,
            inference_timeout_ms: 2,
            seed: 42,
        }
    }
}

impl CollectionConfig {
    pub fn with_steps_per_worker(mut self, n: usize) -> Self {
        self.steps_per_worker = n;
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Full configuration as supplied by an external orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub rules: RulesConfig,
    pub ppo: PpoConfig,
    pub collection: CollectionConfig,
}

impl TrainingConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ShogiError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.ppo.validate()?;
        self.rules.validate()?;
        if self.collection.steps_per_worker == 0 || self.collection.num_workers == 0 {
            return Err(ShogiError::Config(
                "steps_per_worker and num_workers must be at least 1".into(),
            ));
        }
        if self.collection.inference_queue_bound == 0 || self.collection.inference_batch_size == 0 {
            return Err(ShogiError::Config(
                "inference_queue_bound and inference_batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
