// src/model.rs
// Model capability seen by the collection loop and the PPO engine, plus a
// small pure-Rust linear policy used by tests and the demo binary

use ndarray::{Array1, Array2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Result, ShogiError};
use crate::game_env::{Observation, ACTION_SPACE_SIZE, BOARD_CHANNELS, SCALAR_FEATURE_COUNT};

// ==============================================================================
// --- Capability traits ---
// ==============================================================================

/// Raw network output for one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    /// One logit per action of the full universe; the caller masks illegal actions
    pub logits: Vec<f32>,
    pub value: f32,
}

/// Inference side of the model: observation -> (logits, value).
pub trait PolicyModel {
    fn evaluate(&self, observation: &Observation) -> Result<PolicyOutput>;

    fn evaluate_batch(&self, observations: &[&Observation]) -> Result<Vec<PolicyOutput>> {
        observations.iter().map(|obs| self.evaluate(obs)).collect()
    }
}

impl<M: PolicyModel + ?Sized> PolicyModel for &M {
    fn evaluate(&self, observation: &Observation) -> Result<PolicyOutput> {
        (**self).evaluate(observation)
    }

    fn evaluate_batch(&self, observations: &[&Observation]) -> Result<Vec<PolicyOutput>> {
        (**self).evaluate_batch(observations)
    }
}

/// Parameter gradients produced by a `TrainableModel`.
pub trait Gradients {
    fn global_norm(&self) -> f32;
    fn scale(&mut self, factor: f32);
    fn is_finite(&self) -> bool;
}

/// Training side of the model.
///
/// Gradient computation never touches the weights; `apply_gradients` applies
/// a whole step at once. A step that is computed but never applied leaves
/// the model exactly as it was.
pub trait TrainableModel: PolicyModel {
    type Grads: Gradients;

    /// Chain rule from output gradients: returns d/dθ of
    /// `Σ_i (logit_grads[i] · logits_i + value_grads[i] * value_i)`.
    fn compute_gradients(
        &self,
        observations: &[&Observation],
        logit_grads: &[Vec<f32>],
        value_grads: &[f32],
    ) -> Result<Self::Grads>;

    fn apply_gradients(&mut self, grads: &Self::Grads) -> Result<()>;
}

// ==============================================================================
// --- Masked distribution helpers ---
// ==============================================================================

/// Log-probabilities over legal actions; illegal entries are `-inf`.
pub fn masked_log_softmax(logits: &[f32], mask: &[bool]) -> Result<Vec<f32>> {
    if logits.len() != mask.len() {
        return Err(ShogiError::Model(format!(
            "{} logits for a mask of {}",
            logits.len(),
            mask.len()
        )));
    }
    let mut max = f32::NEG_INFINITY;
    let mut any_legal = false;
    for (&l, _) in logits.iter().zip(mask).filter(|(_, &legal)| legal) {
        if !l.is_finite() {
            return Err(ShogiError::NumericInstability(format!("non-finite logit {}", l)));
        }
        any_legal = true;
        max = max.max(l);
    }
    if !any_legal {
        return Err(ShogiError::Model("no legal action to choose from".into()));
    }
    let sum: f32 = logits
        .iter()
        .zip(mask)
        .filter(|(_, &legal)| legal)
        .map(|(&l, _)| (l - max).exp())
        .sum();
    let log_z = max + sum.ln();
    Ok(logits
        .iter()
        .zip(mask)
        .map(|(&l, &legal)| if legal { l - log_z } else { f32::NEG_INFINITY })
        .collect())
}

/// Probabilities over legal actions; illegal entries are exactly zero.
pub fn masked_softmax(logits: &[f32], mask: &[bool]) -> Result<Vec<f32>> {
    Ok(masked_log_softmax(logits, mask)?
        .into_iter()
        .map(|lp| if lp == f32::NEG_INFINITY { 0.0 } else { lp.exp() })
        .collect())
}

/// Shannon entropy of a masked distribution given as (probs, log_probs).
pub fn entropy(probs: &[f32], log_probs: &[f32]) -> f32 {
    probs
        .iter()
        .zip(log_probs)
        .filter(|(&p, _)| p > 0.0)
        .map(|(&p, &lp)| -p * lp)
        .sum()
}

// ==============================================================================
// --- LinearPolicy ---
// ==============================================================================

/// Summary features: mean of each board plane, the scalar vector, a bias.
pub const LINEAR_FEATURE_COUNT: usize = BOARD_CHANNELS + SCALAR_FEATURE_COUNT + 1;

fn summary_features(obs: &Observation) -> Result<Array1<f32>> {
    if obs.board.len_of(Axis(0)) != BOARD_CHANNELS || obs.scalars.len() != SCALAR_FEATURE_COUNT {
        return Err(ShogiError::MalformedInput(format!(
            "observation shape {:?} / {} does not match the encoder",
            obs.board.shape(),
            obs.scalars.len()
        )));
    }
    let mut features = Array1::<f32>::zeros(LINEAR_FEATURE_COUNT);
    for (c, plane) in obs.board.axis_iter(Axis(0)).enumerate() {
        features[c] = plane.mean().unwrap_or(0.0);
    }
    for (i, &s) in obs.scalars.iter().enumerate() {
        features[BOARD_CHANNELS + i] = s;
    }
    features[LINEAR_FEATURE_COUNT - 1] = 1.0;
    Ok(features)
}

/// Linear policy head and tanh value head over summary features, trained by plain SGD.
#[derive(Debug, Clone)]
pub struct LinearPolicy {
    /// (actions, features)
    policy_weights: Array2<f32>,
    /// (features,)
    value_weights: Array1<f32>,
    learning_rate: f32,
}

#[derive(Debug, Clone)]
pub struct LinearGradients {
    pub policy: Array2<f32>,
    pub value: Array1<f32>,
}

impl Gradients for LinearGradients {
    fn global_norm(&self) -> f32 {
        let sq: f32 = self.policy.iter().chain(self.value.iter()).map(|g| g * g).sum();
        sq.sqrt()
    }

    fn scale(&mut self, factor: f32) {
        self.policy *= factor;
        self.value *= factor;
    }

    fn is_finite(&self) -> bool {
        self.policy.iter().chain(self.value.iter()).all(|g| g.is_finite())
    }
}

impl LinearPolicy {
    /// All-zero weights: uniform policy over legal moves and zero value.
    pub fn zeros(learning_rate: f32) -> Self {
        Self {
            policy_weights: Array2::zeros((ACTION_SPACE_SIZE, LINEAR_FEATURE_COUNT)),
            value_weights: Array1::zeros(LINEAR_FEATURE_COUNT),
            learning_rate,
        }
    }

    /// Small uniform random weights from a fixed seed.
    pub fn new(learning_rate: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let init = Uniform::new_inclusive(-0.01f32, 0.01f32);
        let mut model = Self::zeros(learning_rate);
        model.policy_weights.mapv_inplace(|_| init.sample(&mut rng));
        model.value_weights.mapv_inplace(|_| init.sample(&mut rng));
        model
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn policy_weights(&self) -> &Array2<f32> {
        &self.policy_weights
    }

    pub fn value_weights(&self) -> &Array1<f32> {
        &self.value_weights
    }

    fn forward(&self, features: &Array1<f32>) -> PolicyOutput {
        let logits = self.policy_weights.dot(features);
        let value = self.value_weights.dot(features).tanh();
        PolicyOutput {
            logits: logits.to_vec(),
            value,
        }
    }
}

impl PolicyModel for LinearPolicy {
    fn evaluate(&self, observation: &Observation) -> Result<PolicyOutput> {
        let features = summary_features(observation)?;
        Ok(self.forward(&features))
    }
}

impl TrainableModel for LinearPolicy {
    type Grads = LinearGradients;

    fn compute_gradients(
        &self,
        observations: &[&Observation],
        logit_grads: &[Vec<f32>],
        value_grads: &[f32],
    ) -> Result<LinearGradients> {
        let n = observations.len();
        if logit_grads.len() != n || value_grads.len() != n {
            return Err(ShogiError::Model(format!(
                "{} observations, {} logit gradients, {} value gradients",
                n,
                logit_grads.len(),
                value_grads.len()
            )));
        }

        let mut phi = Array2::<f32>::zeros((n, LINEAR_FEATURE_COUNT));
        let mut g_logits = Array2::<f32>::zeros((n, ACTION_SPACE_SIZE));
        let mut value = Array1::<f32>::zeros(LINEAR_FEATURE_COUNT);

        for (i, obs) in observations.iter().enumerate() {
            let features = summary_features(obs)?;
            if logit_grads[i].len() != ACTION_SPACE_SIZE {
                return Err(ShogiError::Model(format!(
                    "logit gradient of length {}",
                    logit_grads[i].len()
                )));
            }
            g_logits
                .row_mut(i)
                .assign(&Array1::from(logit_grads[i].clone()));
            // tanh'(x) = 1 - tanh(x)^2
            let v = self.value_weights.dot(&features).tanh();
            value.scaled_add(value_grads[i] * (1.0 - v * v), &features);
            phi.row_mut(i).assign(&features);
        }

        Ok(LinearGradients {
            policy: g_logits.t().dot(&phi),
            value,
        })
    }

    fn apply_gradients(&mut self, grads: &LinearGradients) -> Result<()> {
        if grads.policy.shape() != self.policy_weights.shape()
            || grads.value.len() != self.value_weights.len()
        {
            return Err(ShogiError::Model("gradient shape does not match the weights".into()));
        }
        self.policy_weights.scaled_add(-self.learning_rate, &grads.policy);
        self.value_weights.scaled_add(-self.learning_rate, &grads.value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_env::GameState;

    #[test]
    fn masked_softmax_zeroes_illegal_actions() {
        let logits = [1.0, 2.0, 3.0, 100.0];
        let mask = [true, true, true, false];
        let probs = masked_softmax(&logits, &mask).unwrap();
        assert_eq!(probs[3], 0.0);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn empty_mask_is_an_error() {
        assert!(masked_softmax(&[0.0, 0.0], &[false, false]).is_err());
        assert!(masked_softmax(&[0.0], &[true, true]).is_err());
    }

    #[test]
    fn uniform_entropy_is_log_n() {
        let probs = masked_softmax(&[0.0; 4], &[true; 4]).unwrap();
        let log_probs = masked_log_softmax(&[0.0; 4], &[true; 4]).unwrap();
        assert!((entropy(&probs, &log_probs) - 4f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn linear_policy_output_shape() {
        let model = LinearPolicy::new(0.01, 7);
        let out = model.evaluate(&GameState::new().observation()).unwrap();
        assert_eq!(out.logits.len(), ACTION_SPACE_SIZE);
        assert!(out.value.abs() < 1.0);
    }

    #[test]
    fn gradient_step_moves_logit_in_requested_direction() {
        let mut model = LinearPolicy::zeros(0.1);
        let obs = GameState::new().observation();
        let mut g = vec![0.0; ACTION_SPACE_SIZE];
        // descending on +1 lowers the logit, descending on -1 raises it
        g[5] = -1.0;
        g[9] = 1.0;
        let grads = model.compute_gradients(&[&obs], &[g], &[-1.0]).unwrap();
        assert!(grads.is_finite());
        assert!(grads.global_norm() > 0.0);

        let before = model.evaluate(&obs).unwrap();
        model.apply_gradients(&grads).unwrap();
        let after = model.evaluate(&obs).unwrap();
        assert!(after.logits[5] > before.logits[5]);
        assert!(after.logits[9] < before.logits[9]);
        assert!(after.value > before.value);
        assert_eq!(after.logits[0], before.logits[0]);
    }

    #[test]
    fn scaling_gradients_scales_the_norm() {
        let model = LinearPolicy::new(0.1, 3);
        let obs = GameState::new().observation();
        let g = vec![0.5; ACTION_SPACE_SIZE];
        let mut grads = model.compute_gradients(&[&obs], &[g], &[1.0]).unwrap();
        let norm = grads.global_norm();
        grads.scale(0.5);
        assert!((grads.global_norm() - 0.5 * norm).abs() < 1e-3 * norm);
    }
}
