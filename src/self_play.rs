// self_play.rs - self-play collection
//
// StepExecutor binds the rules engine, the model, the action mapper and the
// experience buffer for one environment transition. collect_segment /
// collect_parallel fill whole buffers with it.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::{PpoConfig, RulesConfig, TrainingConfig};
use crate::error::{Result, ShogiError};
use crate::experience::{ExperienceBuffer, Transition, TurnOrder};
use crate::game_env::{ActionSpaceMapper, Color, GameOutcome, GameState, Move};
use crate::model::{masked_log_softmax, PolicyModel};

// ================ Episode records ================

/// Summary of one finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeStats {
    pub worker_id: usize,
    pub length: u32,
    pub outcome: GameOutcome,
}

/// What one environment step produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub action: usize,
    pub mv: Move,
    pub mover: Color,
    pub reward: f32,
    pub outcome: GameOutcome,
}

/// Reward for the side that just moved: 1 for delivering mate, otherwise 0.
pub fn reward_for_mover(outcome: GameOutcome, mover: Color) -> f32 {
    match outcome {
        GameOutcome::Checkmate { winner } if winner == mover => 1.0,
        _ => 0.0,
    }
}

// ================ StepExecutor ================

pub struct StepExecutor<M: PolicyModel> {
    worker_id: usize,
    model: M,
    game: GameState,
    mapper: ActionSpaceMapper,
    rng: StdRng,
    episodes: Vec<EpisodeStats>,
}

impl<M: PolicyModel> StepExecutor<M> {
    /// Starts from the initial position; fails on unusable `rules`.
    pub fn new(worker_id: usize, model: M, rules: RulesConfig, seed: u64) -> Result<Self> {
        Ok(Self::from_game(worker_id, model, GameState::with_config(rules)?, seed))
    }

    /// Plays on from `game`. Later episodes restart from the initial position
    /// under the same rules.
    pub fn from_game(worker_id: usize, model: M, game: GameState, seed: u64) -> Self {
        Self {
            worker_id,
            model,
            game,
            mapper: ActionSpaceMapper::new(),
            rng: StdRng::seed_from_u64(seed),
            episodes: Vec::new(),
        }
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Finished games so far, oldest first.
    pub fn episodes(&self) -> &[EpisodeStats] {
        &self.episodes
    }

    pub fn take_episodes(&mut self) -> Vec<EpisodeStats> {
        std::mem::take(&mut self.episodes)
    }

    /// Plays one move for the side to move and appends its transition.
    /// A finished game is replaced by a fresh one before the next step.
    pub fn step(&mut self, buffer: &mut ExperienceBuffer) -> Result<StepResult> {
        if buffer.is_full() || buffer.is_ready() {
            return Err(ShogiError::BufferState(format!(
                "step into a buffer that cannot accept data ({}/{}, ready: {})",
                buffer.len(),
                buffer.capacity(),
                buffer.is_ready()
            )));
        }

        let legal = self.game.generate_legal_moves();
        if legal.is_empty() {
            let sfen = self.game.to_sfen();
            return Err(match self.game.last_move() {
                Some(mv) => ShogiError::Validation {
                    mv,
                    detail: "game not finished but no legal moves".into(),
                    sfen,
                },
                None => ShogiError::MalformedInput(format!("position {} has no legal moves", sfen)),
            });
        }
        let legal_mask = self.mapper.legal_mask(&legal)?;
        let observation = self.game.observation();

        let out = self.model.evaluate(&observation)?;
        if out.logits.len() != self.mapper.total_actions() {
            return Err(ShogiError::Model(format!(
                "{} logits, expected {}",
                out.logits.len(),
                self.mapper.total_actions()
            )));
        }
        if !out.value.is_finite() {
            return Err(ShogiError::NumericInstability(format!("value estimate {}", out.value)));
        }

        let log_probs = masked_log_softmax(&out.logits, &legal_mask)?;
        let weights: Vec<f32> = log_probs
            .iter()
            .map(|&lp| if lp == f32::NEG_INFINITY { 0.0 } else { lp.exp() })
            .collect();
        let dist = WeightedIndex::new(&weights)
            .map_err(|e| ShogiError::NumericInstability(format!("policy distribution: {}", e)))?;
        let action = dist.sample(&mut self.rng);
        let mv = self.mapper.action_to_move(action)?;

        let mover = self.game.side_to_move();
        let outcome = match self.game.apply_move(mv) {
            Ok(outcome) => outcome,
            // the move came from the generator, so a refusal is an engine inconsistency
            Err(ShogiError::IllegalMove { mv, reason, sfen }) => {
                return Err(ShogiError::Validation {
                    mv,
                    detail: format!("generated move refused: {}", reason),
                    sfen,
                })
            }
            Err(e) => return Err(e),
        };
        let reward = reward_for_mover(outcome, mover);

        buffer.add(Transition {
            observation,
            action,
            log_prob: log_probs[action],
            value: out.value,
            reward,
            done: outcome.is_terminal(),
            legal_mask,
        })?;

        if outcome.is_terminal() {
            let stats = EpisodeStats {
                worker_id: self.worker_id,
                length: self.game.ply(),
                outcome,
            };
            debug!(
                worker = self.worker_id,
                length = stats.length,
                outcome = %outcome,
                "episode finished"
            );
            self.episodes.push(stats);
            self.game.reset();
        }

        Ok(StepResult {
            action,
            mv,
            mover,
            reward,
            outcome,
        })
    }

    /// Value estimate of the current position, used to bootstrap the last step.
    pub fn bootstrap_value(&self) -> Result<f32> {
        let out = self.model.evaluate(&self.game.observation())?;
        if !out.value.is_finite() {
            return Err(ShogiError::NumericInstability(format!("bootstrap value {}", out.value)));
        }
        Ok(out.value)
    }
}

// ================ Collection ================

/// A finished, merged batch of experience plus the games that ended in it.
#[derive(Debug, Clone)]
pub struct CollectionReport {
    pub buffer: ExperienceBuffer,
    pub episodes: Vec<EpisodeStats>,
}

/// Fills a private buffer of `steps` transitions and computes its advantages
/// with this worker's own bootstrap value. Both colours' moves share the
/// segment, so advantages use the alternating-turn recursion.
pub fn collect_segment<M: PolicyModel>(
    worker_id: usize,
    model: M,
    rules: RulesConfig,
    ppo: &PpoConfig,
    steps: usize,
    seed: u64,
) -> Result<CollectionReport> {
    let mut executor = StepExecutor::new(worker_id, model, rules, seed)?;
    let mut buffer = ExperienceBuffer::new(steps)?;
    while !buffer.is_full() {
        executor.step(&mut buffer)?;
    }
    let bootstrap = executor.bootstrap_value()?;
    buffer.compute_advantages_with(TurnOrder::Alternating, ppo.gamma, ppo.gae_lambda, bootstrap)?;
    Ok(CollectionReport {
        buffer,
        episodes: executor.take_episodes(),
    })
}

/// One worker per evaluator on scoped threads; segments are merged only
/// after each has its own advantages.
pub fn collect_parallel<E: PolicyModel + Send>(
    evaluators: Vec<E>,
    config: &TrainingConfig,
) -> Result<CollectionReport> {
    if evaluators.is_empty() {
        return Err(ShogiError::Config("collection needs at least one worker".into()));
    }
    let start = Instant::now();
    let workers = evaluators.len();
    let steps = config.collection.steps_per_worker;

    let results: Vec<Result<CollectionReport>> = thread::scope(|s| {
        let handles: Vec<_> = evaluators
            .into_iter()
            .enumerate()
            .map(|(worker_id, evaluator)| {
                let seed = config.collection.seed.wrapping_add(worker_id as u64);
                s.spawn(move || {
                    collect_segment(worker_id, evaluator, config.rules, &config.ppo, steps, seed)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(ShogiError::Model("collection worker panicked".into())))
            })
            .collect()
    });

    let mut segments = Vec::with_capacity(workers);
    let mut episodes = Vec::new();
    for result in results {
        let report = result?;
        segments.push(report.buffer);
        episodes.extend(report.episodes);
    }
    let buffer = ExperienceBuffer::merge(segments)?;

    info!(
        workers,
        transitions = buffer.len(),
        episodes = episodes.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "collection finished"
    );
    Ok(CollectionReport { buffer, episodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_env::{Observation, ACTION_SPACE_SIZE};
    use crate::model::{LinearPolicy, PolicyOutput};

    struct BadModel;

    impl PolicyModel for BadModel {
        fn evaluate(&self, _observation: &Observation) -> Result<PolicyOutput> {
            Ok(PolicyOutput {
                logits: vec![0.0; 3],
                value: 0.0,
            })
        }
    }

    #[test]
    fn step_appends_one_legal_transition() {
        let model = LinearPolicy::new(0.01, 1);
        let mut executor = StepExecutor::new(0, &model, RulesConfig::default(), 5).unwrap();
        let mut buffer = ExperienceBuffer::new(4).unwrap();
        let result = executor.step(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 1);
        let tr = &buffer.transitions()[0];
        assert_eq!(tr.legal_mask.len(), ACTION_SPACE_SIZE);
        assert_eq!(tr.legal_mask.iter().filter(|&&b| b).count(), 30);
        assert!(tr.legal_mask[result.action]);
        assert!(tr.log_prob <= 0.0 && tr.log_prob.is_finite());
        assert_eq!(result.mover, Color::Black);
        assert_eq!(executor.game().ply(), 1);
    }

    #[test]
    fn wrong_logit_count_is_a_model_error() {
        let mut executor = StepExecutor::new(0, BadModel, RulesConfig::default(), 5).unwrap();
        let mut buffer = ExperienceBuffer::new(4).unwrap();
        assert!(matches!(executor.step(&mut buffer), Err(ShogiError::Model(_))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn short_games_reset_and_are_recorded() {
        let model = LinearPolicy::zeros(0.01);
        let rules = RulesConfig::default().with_max_moves(6);
        let mut executor = StepExecutor::new(0, &model, rules, 9).unwrap();
        let mut buffer = ExperienceBuffer::new(13).unwrap();
        while !buffer.is_full() {
            executor.step(&mut buffer).unwrap();
        }
        assert_eq!(executor.episodes().len(), 2);
        assert!(executor
            .episodes()
            .iter()
            .all(|e| e.outcome == GameOutcome::MoveLimitReached && e.length == 6));
        let done: Vec<bool> = buffer.transitions().iter().map(|t| t.done).collect();
        assert!(done[5] && done[11] && !done[12]);
        assert_eq!(executor.game().ply(), 1);
        assert!(executor.step(&mut buffer).is_err());
    }

    #[test]
    fn reward_is_from_the_movers_view() {
        let mate = GameOutcome::Checkmate {
            winner: Color::White,
        };
        assert_eq!(reward_for_mover(mate, Color::White), 1.0);
        assert_eq!(reward_for_mover(mate, Color::Black), 0.0);
        assert_eq!(reward_for_mover(GameOutcome::RepetitionDraw, Color::Black), 0.0);
    }

    #[test]
    fn parallel_segments_are_merged_in_worker_order() {
        let model = LinearPolicy::new(0.01, 2);
        let mut config = TrainingConfig::default();
        config.collection = config.collection.with_steps_per_worker(8).with_workers(3);
        let report = collect_parallel(vec![&model; 3], &config).unwrap();
        assert_eq!(report.buffer.len(), 24);
        assert!(report.buffer.is_ready());
        // each worker starts from the initial position
        for w in 0..3 {
            let first = &report.buffer.transitions()[w * 8];
            assert_eq!(first.observation, GameState::new().observation());
        }
    }
}
