// src/experience.rs
// Fixed-capacity on-policy experience store with GAE

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ShogiError};
use crate::game_env::Observation;

/// One environment step as seen by the learner.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: Observation,
    pub action: usize,
    /// log π_old(action | observation) at collection time
    pub log_prob: f32,
    /// V_old(observation) at collection time
    pub value: f32,
    pub reward: f32,
    /// true if this step ended the episode
    pub done: bool,
    /// legal actions over the full universe
    pub legal_mask: Vec<bool>,
}

/// Indices into an `ExperienceBuffer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minibatch {
    pub indices: Vec<usize>,
}

impl Minibatch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// How the value estimates of consecutive transitions relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TurnOrder {
    /// Every step belongs to the same agent.
    #[default]
    SingleAgent,
    /// Consecutive steps alternate between two zero-sum players and each
    /// value is from its own mover's view, so the next step's value and
    /// advantage enter with a negative sign.
    Alternating,
}

impl TurnOrder {
    fn successor_sign(self) -> f32 {
        match self {
            TurnOrder::SingleAgent => 1.0,
            TurnOrder::Alternating => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// accepting transitions
    Filling,
    /// advantages computed, readable by the update engine
    Ready,
    /// an update applied steps from this data and then failed; only `clear` reopens it
    Consumed,
}

/// Filled to capacity, then `compute_advantages`, then drained by minibatches,
/// then `clear`. Any step out of that order is a `BufferState` error.
///
/// A buffer whose update failed after some optimizer steps were applied is
/// marked consumed: its transitions stay readable but it cannot feed a second
/// update, because the policy that collected it has already moved.
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    capacity: usize,
    transitions: Vec<Transition>,
    advantages: Vec<f32>,
    returns: Vec<f32>,
    phase: Phase,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ShogiError::BufferState("capacity must be at least 1".into()));
        }
        Ok(Self {
            capacity,
            transitions: Vec::with_capacity(capacity),
            advantages: Vec::with_capacity(capacity),
            returns: Vec::with_capacity(capacity),
            phase: Phase::Filling,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.transitions.len() == self.capacity
    }

    /// Advantages and returns are available.
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// An update already applied steps from this data.
    pub fn is_consumed(&self) -> bool {
        self.phase == Phase::Consumed
    }

    pub(crate) fn mark_consumed(&mut self) {
        if self.phase == Phase::Ready {
            self.phase = Phase::Consumed;
        }
    }

    pub fn add(&mut self, transition: Transition) -> Result<()> {
        if self.phase != Phase::Filling {
            return Err(ShogiError::BufferState(
                "add after advantages were computed; clear the buffer first".into(),
            ));
        }
        if self.is_full() {
            return Err(ShogiError::BufferState(format!(
                "buffer full ({} transitions)",
                self.capacity
            )));
        }
        self.transitions.push(transition);
        Ok(())
    }

    /// Single backward GAE pass over a full buffer of one agent's steps.
    ///
    /// `bootstrap_value` stands in for V(s_N) after the last stored step; it is
    /// ignored when that step ended an episode.
    pub fn compute_advantages(&mut self, gamma: f32, lambda: f32, bootstrap_value: f32) -> Result<()> {
        self.compute_advantages_with(TurnOrder::SingleAgent, gamma, lambda, bootstrap_value)
    }

    /// GAE pass for the given turn order.
    ///
    /// With `TurnOrder::Alternating` the recursion is the negamax form
    /// `delta_t = r_t - gamma * V_{t+1} * (1 - done_t) - V_t` and
    /// `A_t = delta_t - gamma * lambda * (1 - done_t) * A_{t+1}`, and
    /// `bootstrap_value` is V(s_N) from the view of the side to move at s_N.
    /// A mating move's +1 therefore reaches the loser's preceding move as a
    /// loss.
    pub fn compute_advantages_with(
        &mut self,
        order: TurnOrder,
        gamma: f32,
        lambda: f32,
        bootstrap_value: f32,
    ) -> Result<()> {
        if self.phase != Phase::Filling {
            return Err(ShogiError::BufferState("advantages already computed".into()));
        }
        if !self.is_full() {
            return Err(ShogiError::BufferState(format!(
                "advantages need a full buffer ({}/{})",
                self.len(),
                self.capacity
            )));
        }
        if !bootstrap_value.is_finite() {
            return Err(ShogiError::NumericInstability(format!(
                "bootstrap value {}",
                bootstrap_value
            )));
        }

        let n = self.transitions.len();
        self.advantages = vec![0.0; n];
        self.returns = vec![0.0; n];

        let sign = order.successor_sign();
        let mut next_value = bootstrap_value;
        let mut next_advantage = 0.0f32;
        for t in (0..n).rev() {
            let tr = &self.transitions[t];
            if !tr.reward.is_finite() || !tr.value.is_finite() {
                return Err(ShogiError::NumericInstability(format!(
                    "step {}: reward {} value {}",
                    t, tr.reward, tr.value
                )));
            }
            let not_done = if tr.done { 0.0 } else { 1.0 };
            let delta = tr.reward + sign * gamma * next_value * not_done - tr.value;
            let advantage = delta + sign * gamma * lambda * not_done * next_advantage;
            self.advantages[t] = advantage;
            self.returns[t] = advantage + tr.value;
            next_value = tr.value;
            next_advantage = advantage;
        }

        self.phase = Phase::Ready;
        debug!(steps = n, gamma, lambda, ?order, "advantages computed");
        Ok(())
    }

    fn require_ready(&self, what: &str) -> Result<()> {
        if self.phase == Phase::Consumed {
            return Err(ShogiError::BufferState(format!(
                "{} from a buffer an earlier update already consumed ({} transitions held)",
                what,
                self.len()
            )));
        }
        if self.phase != Phase::Ready {
            return Err(ShogiError::BufferState(format!(
                "{} before advantages were computed ({} transitions held)",
                what,
                self.len()
            )));
        }
        Ok(())
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn advantages(&self) -> Result<&[f32]> {
        self.require_ready("advantages read")?;
        Ok(&self.advantages)
    }

    pub fn returns(&self) -> Result<&[f32]> {
        self.require_ready("returns read")?;
        Ok(&self.returns)
    }

    /// Partitions every stored index into minibatches of `batch_size`.
    ///
    /// When `batch_size` does not divide the length the last minibatch is
    /// shorter; no index is dropped or repeated.
    pub fn iter_minibatches<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Result<Vec<Minibatch>> {
        self.require_ready("minibatch iteration")?;
        if batch_size == 0 {
            return Err(ShogiError::BufferState("minibatch size must be at least 1".into()));
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            order.shuffle(rng);
        }
        Ok(order
            .chunks(batch_size)
            .map(|chunk| Minibatch {
                indices: chunk.to_vec(),
            })
            .collect())
    }

    /// Drops all data and reopens the buffer for filling.
    pub fn clear(&mut self) {
        self.transitions.clear();
        self.advantages.clear();
        self.returns.clear();
        self.phase = Phase::Filling;
    }

    /// Concatenates segments whose advantages were computed independently,
    /// so no bootstrap ever crosses a segment boundary.
    pub fn merge(segments: Vec<ExperienceBuffer>) -> Result<ExperienceBuffer> {
        if segments.is_empty() {
            return Err(ShogiError::BufferState("nothing to merge".into()));
        }
        if let Some(i) = segments.iter().position(|s| !s.is_ready()) {
            return Err(ShogiError::BufferState(format!(
                "segment {} merged before its advantages were computed",
                i
            )));
        }

        let total: usize = segments.iter().map(|s| s.len()).sum();
        let mut merged = ExperienceBuffer {
            capacity: total,
            transitions: Vec::with_capacity(total),
            advantages: Vec::with_capacity(total),
            returns: Vec::with_capacity(total),
            phase: Phase::Ready,
        };
        let count = segments.len();
        for segment in segments {
            merged.transitions.extend(segment.transitions);
            merged.advantages.extend(segment.advantages);
            merged.returns.extend(segment.returns);
        }
        debug!(segments = count, transitions = total, "segments merged");
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_env::GameState;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn transition(value: f32, reward: f32, done: bool) -> Transition {
        Transition {
            observation: GameState::new().observation(),
            action: 0,
            log_prob: 0.0,
            value,
            reward,
            done,
            legal_mask: Vec::new(),
        }
    }

    fn filled(steps: &[(f32, f32, bool)]) -> ExperienceBuffer {
        let mut buf = ExperienceBuffer::new(steps.len()).unwrap();
        for &(v, r, d) in steps {
            buf.add(transition(v, r, d)).unwrap();
        }
        buf
    }

    #[test]
    fn add_beyond_capacity_fails() {
        let mut buf = ExperienceBuffer::new(1).unwrap();
        buf.add(transition(0.0, 0.0, false)).unwrap();
        assert!(matches!(
            buf.add(transition(0.0, 0.0, false)),
            Err(ShogiError::BufferState(_))
        ));
    }

    #[test]
    fn advantages_need_a_full_buffer() {
        let mut buf = ExperienceBuffer::new(3).unwrap();
        buf.add(transition(0.0, 0.0, false)).unwrap();
        assert!(buf.compute_advantages(0.99, 0.95, 0.0).is_err());
        assert!(buf.advantages().is_err());
    }

    #[test]
    fn telescoping_sum_with_unit_discount() {
        let values = [0.5, -0.2, 0.3, 0.9, 0.1];
        let rewards = [0.0, 0.0, 1.0, 0.0, -2.0];
        let steps: Vec<(f32, f32, bool)> = (0..5)
            .map(|t| (values[t], rewards[t], t == 4))
            .collect();
        let mut buf = filled(&steps);
        buf.compute_advantages(1.0, 1.0, 123.0).unwrap();
        let adv = buf.advantages().unwrap();
        for t in 0..5 {
            let future: f32 = rewards[t..].iter().sum();
            assert!((adv[t] - (future - values[t])).abs() < 1e-5, "step {}", t);
        }
        let ret = buf.returns().unwrap();
        assert!((ret[0] - (-1.0)).abs() < 1e-5);
    }

    #[test]
    fn episode_boundary_stops_bootstrap() {
        // second step ends an episode; the third belongs to the next one
        let mut buf = filled(&[(0.0, 0.0, false), (0.0, 1.0, true), (5.0, 0.0, false)]);
        buf.compute_advantages(1.0, 1.0, 5.0).unwrap();
        let adv = buf.advantages().unwrap();
        assert!((adv[1] - 1.0).abs() < 1e-6);
        assert!((adv[0] - 1.0).abs() < 1e-6);
        // bootstrap 5.0 flows only into the last step
        assert!((adv[2] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn lambda_zero_is_one_step_td() {
        let mut buf = filled(&[(0.2, 0.5, false), (0.4, 0.0, false)]);
        buf.compute_advantages(0.9, 0.0, 1.0).unwrap();
        let adv = buf.advantages().unwrap();
        assert!((adv[0] - (0.5 + 0.9 * 0.4 - 0.2)).abs() < 1e-6);
        assert!((adv[1] - (0.9 * 1.0 - 0.4)).abs() < 1e-6);
    }

    #[test]
    fn losing_move_before_mate_gets_a_negative_advantage() {
        // loser's quiet move, then the winner's mating move
        let mut buf = filled(&[(0.0, 0.0, false), (0.0, 1.0, true)]);
        buf.compute_advantages_with(TurnOrder::Alternating, 1.0, 1.0, 0.0).unwrap();
        assert_eq!(buf.advantages().unwrap(), &[-1.0, 1.0]);
        assert_eq!(buf.returns().unwrap(), &[-1.0, 1.0]);
    }

    #[test]
    fn alternating_bootstrap_is_the_opponents_value() {
        let mut buf = filled(&[(0.2, 0.0, false)]);
        buf.compute_advantages_with(TurnOrder::Alternating, 1.0, 1.0, 0.5).unwrap();
        let adv = buf.advantages().unwrap();
        assert!((adv[0] - (-0.5 - 0.2)).abs() < 1e-6);
    }

    #[test]
    fn consumed_buffer_keeps_data_but_refuses_minibatches() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut buf = filled(&[(0.0, 1.0, true); 3]);
        buf.mark_consumed();
        // only a ready buffer can be consumed
        assert!(!buf.is_consumed());

        buf.compute_advantages(0.99, 0.95, 0.0).unwrap();
        buf.mark_consumed();
        assert!(buf.is_consumed() && !buf.is_ready());
        assert_eq!(buf.transitions().len(), 3);
        assert!(matches!(
            buf.iter_minibatches(2, false, &mut rng),
            Err(ShogiError::BufferState(_))
        ));
        assert!(buf.compute_advantages(0.99, 0.95, 0.0).is_err());
        assert!(buf.add(transition(0.0, 0.0, false)).is_err());
        assert!(ExperienceBuffer::merge(vec![buf.clone()]).is_err());

        buf.clear();
        assert!(!buf.is_consumed());
        buf.add(transition(0.0, 0.0, false)).unwrap();
    }

    #[test]
    fn minibatches_cover_every_index_once() {
        let mut rng = StdRng::seed_from_u64(11);
        for (n, size) in [(12usize, 4usize), (10, 4), (7, 7), (5, 9)] {
            let mut buf = filled(&vec![(0.0, 0.0, false); n]);
            buf.compute_advantages(0.99, 0.95, 0.0).unwrap();
            let batches = buf.iter_minibatches(size, true, &mut rng).unwrap();
            let mut seen: Vec<usize> = batches.iter().flat_map(|b| b.indices.clone()).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..n).collect::<Vec<_>>());
            assert_eq!(batches.len(), (n + size - 1) / size);
            assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
        }
    }

    #[test]
    fn cleared_buffer_refuses_stale_reads() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut buf = filled(&[(0.0, 0.0, true); 2]);
        buf.compute_advantages(0.99, 0.95, 0.0).unwrap();
        assert!(buf.add(transition(0.0, 0.0, false)).is_err());
        buf.clear();
        assert!(matches!(
            buf.iter_minibatches(1, false, &mut rng),
            Err(ShogiError::BufferState(_))
        ));
        assert!(buf.is_empty());
        buf.add(transition(0.0, 0.0, false)).unwrap();
    }

    #[test]
    fn merge_requires_finished_segments() {
        let mut a = filled(&[(0.0, 1.0, true)]);
        let b = filled(&[(0.0, 0.0, false)]);
        a.compute_advantages(0.99, 0.95, 0.0).unwrap();
        assert!(ExperienceBuffer::merge(vec![a.clone(), b]).is_err());

        let mut c = filled(&[(0.0, 0.0, false), (0.0, 0.0, false)]);
        c.compute_advantages(1.0, 1.0, 2.0).unwrap();
        let merged = ExperienceBuffer::merge(vec![a, c]).unwrap();
        assert_eq!(merged.len(), 3);
        assert!(merged.is_ready());
        assert_eq!(merged.advantages().unwrap(), &[1.0, 2.0, 2.0]);
    }
}
