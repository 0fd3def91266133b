// src/ppo.rs
// Clipped-surrogate policy / value optimisation over a ready experience buffer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PpoConfig;
use crate::error::{Result, ShogiError};
use crate::experience::{ExperienceBuffer, Minibatch};
use crate::game_env::{Observation, ACTION_SPACE_SIZE};
use crate::model::{entropy, masked_log_softmax, Gradients, TrainableModel};

// ==============================================================================
// --- Loss terms ---
// ==============================================================================

/// `min(r * A, clip(r, 1 - eps, 1 + eps) * A)`, the quantity PPO maximises.
pub fn clipped_surrogate(ratio: f32, advantage: f32, clip_epsilon: f32) -> f32 {
    let clipped = ratio.clamp(1.0 - clip_epsilon, 1.0 + clip_epsilon);
    (ratio * advantage).min(clipped * advantage)
}

/// Pessimistic value loss: the larger of the plain squared error and the
/// squared error of a prediction held within `eps` of the old estimate.
pub fn clipped_value_loss(value: f32, old_value: f32, target: f32, clip_epsilon: f32) -> f32 {
    let unclipped = (value - target).powi(2);
    let held = old_value + (value - old_value).clamp(-clip_epsilon, clip_epsilon);
    let clipped = (held - target).powi(2);
    unclipped.max(clipped)
}

/// d(clipped_surrogate)/d(log π_new).
fn surrogate_grad(ratio: f32, advantage: f32, clip_epsilon: f32) -> f32 {
    let clipped = ratio.clamp(1.0 - clip_epsilon, 1.0 + clip_epsilon);
    if ratio * advantage <= clipped * advantage {
        ratio * advantage
    } else {
        0.0
    }
}

/// d(clipped_value_loss)/d(value).
fn value_loss_grad(value: f32, old_value: f32, target: f32, clip_epsilon: f32) -> f32 {
    let delta = value - old_value;
    let unclipped = (value - target).powi(2);
    let held = old_value + delta.clamp(-clip_epsilon, clip_epsilon);
    let clipped = (held - target).powi(2);
    if unclipped >= clipped {
        2.0 * (value - target)
    } else if delta.abs() < clip_epsilon {
        2.0 * (held - target)
    } else {
        0.0
    }
}

// ==============================================================================
// --- Metrics ---
// ==============================================================================

/// Averages over every minibatch step of one `update` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UpdateMetrics {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    /// Fraction of samples whose ratio left [1 - eps, 1 + eps]
    pub clip_fraction: f32,
    /// Mean of (r - 1) - ln r
    pub approx_kl: f32,
    pub total_loss: f32,
    /// Gradient norm before clipping
    pub grad_norm: f32,
    pub minibatches: usize,
}

impl UpdateMetrics {
    fn accumulate(&mut self, step: &UpdateMetrics) {
        self.policy_loss += step.policy_loss;
        self.value_loss += step.value_loss;
        self.entropy += step.entropy;
        self.clip_fraction += step.clip_fraction;
        self.approx_kl += step.approx_kl;
        self.total_loss += step.total_loss;
        self.grad_norm += step.grad_norm;
        self.minibatches += step.minibatches;
    }

    fn averaged(mut self) -> Self {
        if self.minibatches > 0 {
            let n = self.minibatches as f32;
            self.policy_loss /= n;
            self.value_loss /= n;
            self.entropy /= n;
            self.clip_fraction /= n;
            self.approx_kl /= n;
            self.total_loss /= n;
            self.grad_norm /= n;
        }
        self
    }
}

// ==============================================================================
// --- PpoUpdateEngine ---
// ==============================================================================

pub struct PpoUpdateEngine {
    config: PpoConfig,
    rng: StdRng,
    stop: Option<Arc<AtomicBool>>,
}

impl PpoUpdateEngine {
    pub fn new(config: PpoConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            stop: None,
        })
    }

    /// Checked before every optimizer step; once set, `update` returns `Interrupted`.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// K epochs of minibatch steps over a ready buffer, then clears it.
    ///
    /// A step that fails is never applied. If it was the first step the buffer
    /// stays ready; otherwise the buffer is marked consumed, keeping its
    /// transitions for inspection but refusing a second update. On
    /// interruption the buffer is cleared, since the model already moved.
    pub fn update<M: TrainableModel>(
        &mut self,
        model: &mut M,
        buffer: &mut ExperienceBuffer,
    ) -> Result<UpdateMetrics> {
        if !buffer.is_ready() {
            return Err(ShogiError::BufferState(format!(
                "update on a buffer without advantages ({}/{} transitions)",
                buffer.len(),
                buffer.capacity()
            )));
        }

        let mut totals = UpdateMetrics::default();
        for epoch in 0..self.config.epochs {
            let batches =
                buffer.iter_minibatches(self.config.minibatch_size, self.config.shuffle, &mut self.rng)?;
            for batch in &batches {
                if self.stop_requested() {
                    buffer.clear();
                    info!(completed_steps = totals.minibatches, "ppo update interrupted");
                    return Err(ShogiError::Interrupted {
                        completed_steps: totals.minibatches,
                    });
                }
                let step = match self.minibatch_step(model, buffer, batch) {
                    Ok(step) => step,
                    Err(e) => {
                        if totals.minibatches > 0 {
                            buffer.mark_consumed();
                        }
                        warn!(completed_steps = totals.minibatches, error = %e, "ppo update failed");
                        return Err(e);
                    }
                };
                totals.accumulate(&step);
            }
            debug!(epoch, minibatches = batches.len(), "ppo epoch done");
        }

        buffer.clear();
        let metrics = totals.averaged();
        info!(
            policy_loss = metrics.policy_loss,
            value_loss = metrics.value_loss,
            entropy = metrics.entropy,
            clip_fraction = metrics.clip_fraction,
            approx_kl = metrics.approx_kl,
            grad_norm = metrics.grad_norm,
            minibatches = metrics.minibatches,
            "ppo update"
        );
        Ok(metrics)
    }

    /// One optimizer step on one minibatch. Gradients are computed and checked
    /// in full before anything is applied to the model.
    pub fn minibatch_step<M: TrainableModel>(
        &self,
        model: &mut M,
        buffer: &ExperienceBuffer,
        batch: &Minibatch,
    ) -> Result<UpdateMetrics> {
        if batch.is_empty() {
            return Ok(UpdateMetrics::default());
        }
        let cfg = &self.config;
        let eps = cfg.clip_epsilon;
        let transitions = buffer.transitions();
        let advantages_all = buffer.advantages()?;
        let returns_all = buffer.returns()?;

        let mut observations: Vec<&Observation> = Vec::with_capacity(batch.len());
        for &i in &batch.indices {
            let tr = transitions.get(i).ok_or_else(|| {
                ShogiError::BufferState(format!("minibatch index {} out of range", i))
            })?;
            observations.push(&tr.observation);
        }
        let outputs = model.evaluate_batch(&observations)?;
        if outputs.len() != batch.len() {
            return Err(ShogiError::Model(format!(
                "{} outputs for {} observations",
                outputs.len(),
                batch.len()
            )));
        }

        let mut advantages: Vec<f32> = batch.indices.iter().map(|&i| advantages_all[i]).collect();
        if cfg.normalize_advantages && advantages.len() > 1 {
            let n = advantages.len() as f32;
            let mean = advantages.iter().sum::<f32>() / n;
            let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
            let std = var.sqrt() + 1e-8;
            for a in &mut advantages {
                *a = (*a - mean) / std;
            }
        }

        let n = batch.len() as f32;
        let mut logit_grads = Vec::with_capacity(batch.len());
        let mut value_grads = Vec::with_capacity(batch.len());
        let mut step = UpdateMetrics {
            minibatches: 1,
            ..UpdateMetrics::default()
        };
        let mut objective_sum = 0.0f32;

        for (k, (&i, out)) in batch.indices.iter().zip(&outputs).enumerate() {
            let tr = &transitions[i];
            if out.logits.len() != ACTION_SPACE_SIZE {
                return Err(ShogiError::Model(format!(
                    "{} logits, expected {}",
                    out.logits.len(),
                    ACTION_SPACE_SIZE
                )));
            }
            let log_probs = masked_log_softmax(&out.logits, &tr.legal_mask)?;
            let new_lp = log_probs.get(tr.action).copied().unwrap_or(f32::NEG_INFINITY);
            if new_lp == f32::NEG_INFINITY {
                return Err(ShogiError::BufferState(format!(
                    "stored action {} is not legal under its own mask",
                    tr.action
                )));
            }
            let probs: Vec<f32> = log_probs
                .iter()
                .map(|&lp| if lp == f32::NEG_INFINITY { 0.0 } else { lp.exp() })
                .collect();
            let h = entropy(&probs, &log_probs);

            let log_ratio = new_lp - tr.log_prob;
            let ratio = log_ratio.exp();
            let adv = advantages[k];
            let ret = returns_all[i];

            objective_sum += clipped_surrogate(ratio, adv, eps);
            step.value_loss += clipped_value_loss(out.value, tr.value, ret, eps) / n;
            step.entropy += h / n;
            step.approx_kl += ((ratio - 1.0) - log_ratio) / n;
            if (ratio - 1.0).abs() > eps {
                step.clip_fraction += 1.0 / n;
            }

            // d total / d logits
            let g_obj = surrogate_grad(ratio, adv, eps);
            let mut g = vec![0.0f32; ACTION_SPACE_SIZE];
            for (j, &p) in probs.iter().enumerate() {
                if p == 0.0 {
                    continue;
                }
                let indicator = if j == tr.action { 1.0 } else { 0.0 };
                let policy_part = -g_obj * (indicator - p) / n;
                let entropy_part = cfg.entropy_coef * p * (log_probs[j] + h) / n;
                g[j] = policy_part + entropy_part;
            }
            logit_grads.push(g);
            value_grads.push(cfg.value_coef * value_loss_grad(out.value, tr.value, ret, eps) / n);
        }

        step.policy_loss = -objective_sum / n;
        step.total_loss =
            step.policy_loss + cfg.value_coef * step.value_loss - cfg.entropy_coef * step.entropy;
        if !step.total_loss.is_finite() {
            return Err(ShogiError::NumericInstability(format!(
                "loss {} (policy {}, value {}, entropy {})",
                step.total_loss, step.policy_loss, step.value_loss, step.entropy
            )));
        }

        let mut grads = model.compute_gradients(&observations, &logit_grads, &value_grads)?;
        if !grads.is_finite() {
            return Err(ShogiError::NumericInstability("non-finite gradient".into()));
        }
        let norm = grads.global_norm();
        if !norm.is_finite() {
            return Err(ShogiError::NumericInstability(format!("gradient norm {}", norm)));
        }
        if norm > cfg.max_grad_norm {
            grads.scale(cfg.max_grad_norm / norm);
        }
        model.apply_gradients(&grads)?;
        step.grad_norm = norm;
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrogate_at_ratio_one_is_the_advantage() {
        for adv in [-2.0f32, 0.0, 0.7] {
            assert_eq!(clipped_surrogate(1.0, adv, 0.2), adv);
        }
    }

    #[test]
    fn surrogate_never_exceeds_unclipped_objective() {
        let eps = 0.2;
        for &ratio in &[0.5f32, 0.8, 0.9, 1.0, 1.1, 1.2, 1.5] {
            for &adv in &[-1.0f32, 1.0] {
                assert!(clipped_surrogate(ratio, adv, eps) <= ratio * adv + 1e-7);
            }
        }
        // clip edges
        assert!((clipped_surrogate(1.2, 1.0, eps) - 1.2).abs() < 1e-6);
        assert!((clipped_surrogate(1.5, 1.0, eps) - 1.2).abs() < 1e-6);
        assert!((clipped_surrogate(0.8, -1.0, eps) + 0.8).abs() < 1e-6);
        assert!((clipped_surrogate(0.5, -1.0, eps) + 0.8).abs() < 1e-6);
        // the pessimistic side is never clipped
        assert!((clipped_surrogate(0.5, 1.0, eps) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn surrogate_gradient_vanishes_outside_the_clip() {
        assert_eq!(surrogate_grad(1.5, 1.0, 0.2), 0.0);
        assert_eq!(surrogate_grad(0.5, -1.0, 0.2), 0.0);
        assert!((surrogate_grad(1.1, 1.0, 0.2) - 1.1).abs() < 1e-6);
        assert!((surrogate_grad(0.5, 1.0, 0.2) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn value_loss_takes_the_larger_error() {
        // prediction jumped past the target: clipped version is further away
        let loss = clipped_value_loss(1.0, 0.0, 0.9, 0.2);
        assert!((loss - (0.2f32 - 0.9).powi(2)).abs() < 1e-6);
        // small move: both candidates agree
        let loss = clipped_value_loss(0.1, 0.0, 1.0, 0.2);
        assert!((loss - 0.81).abs() < 1e-6);
        // gradient is zero when the clipped term dominates and is saturated
        assert_eq!(value_loss_grad(1.0, 0.0, 0.9, 0.2), 0.0);
    }

    #[test]
    fn metrics_average_over_steps() {
        let mut totals = UpdateMetrics::default();
        for loss in [1.0, 3.0] {
            totals.accumulate(&UpdateMetrics {
                policy_loss: loss,
                minibatches: 1,
                ..UpdateMetrics::default()
            });
        }
        let avg = totals.averaged();
        assert_eq!(avg.policy_loss, 2.0);
        assert_eq!(avg.minibatches, 2);
        assert_eq!(UpdateMetrics::default().averaged(), UpdateMetrics::default());
    }
}
