// inference.rs - batched inference server
//
// Collection workers send single observations over a bounded channel; the
// server groups them into batches and answers each on its own reply channel.

use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{Result, ShogiError};
use crate::game_env::Observation;
use crate::model::{PolicyModel, PolicyOutput};

// ================ Requests ================

#[derive(Debug)]
pub struct InferenceRequest {
    pub observation: Observation,
    /// each request carries its own reply channel
    pub response_tx: mpsc::Sender<Result<PolicyOutput>>,
}

/// Bounded request queue: senders block once `bound` requests are waiting.
pub fn inference_channel(
    bound: usize,
) -> (mpsc::SyncSender<InferenceRequest>, mpsc::Receiver<InferenceRequest>) {
    mpsc::sync_channel(bound.max(1))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferenceStats {
    pub requests: usize,
    pub batches: usize,
}

// ================ Batch server ================

pub struct InferenceServer<M: PolicyModel> {
    model: M,
    request_rx: mpsc::Receiver<InferenceRequest>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl<M: PolicyModel> InferenceServer<M> {
    pub fn new(
        model: M,
        request_rx: mpsc::Receiver<InferenceRequest>,
        batch_size: usize,
        batch_timeout_ms: u64,
    ) -> Self {
        Self {
            model,
            request_rx,
            batch_size: batch_size.max(1),
            batch_timeout: Duration::from_millis(batch_timeout_ms),
        }
    }

    /// Serves until every sender is dropped (blocking).
    pub fn run(&self) -> InferenceStats {
        info!(
            batch_size = self.batch_size,
            timeout_ms = self.batch_timeout.as_millis() as u64,
            "inference server started"
        );
        let mut stats = InferenceStats::default();
        let mut batch: Vec<InferenceRequest> = Vec::with_capacity(self.batch_size);

        loop {
            // block for the first request of a batch
            match self.request_rx.recv() {
                Ok(req) => batch.push(req),
                Err(mpsc::RecvError) => break,
            }

            // take whatever is already queued
            let mut disconnected = false;
            while batch.len() < self.batch_size {
                match self.request_rx.try_recv() {
                    Ok(req) => batch.push(req),
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            // then wait briefly for stragglers
            let deadline = Instant::now() + self.batch_timeout;
            while !disconnected && batch.len() < self.batch_size {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match self.request_rx.recv_timeout(remaining) {
                    Ok(req) => batch.push(req),
                    Err(mpsc::RecvTimeoutError::Timeout) => break,
                    Err(mpsc::RecvTimeoutError::Disconnected) => disconnected = true,
                }
            }

            stats.requests += batch.len();
            stats.batches += 1;
            if stats.batches % 1000 == 0 {
                debug!(batch = stats.batches, size = batch.len(), "inference batch");
            }
            self.process_batch(&mut batch);

            if disconnected {
                break;
            }
        }

        info!(
            requests = stats.requests,
            batches = stats.batches,
            "inference server stopped, all clients disconnected"
        );
        stats
    }

    fn process_batch(&self, batch: &mut Vec<InferenceRequest>) {
        if batch.is_empty() {
            return;
        }
        let observations: Vec<&Observation> = batch.iter().map(|r| &r.observation).collect();
        let result = self.model.evaluate_batch(&observations);

        match result {
            Ok(outputs) if outputs.len() == batch.len() => {
                for (req, out) in batch.drain(..).zip(outputs) {
                    // a worker that gave up waiting is not an error here
                    let _ = req.response_tx.send(Ok(out));
                }
            }
            Ok(outputs) => {
                let err = ShogiError::Model(format!(
                    "{} outputs for a batch of {}",
                    outputs.len(),
                    batch.len()
                ));
                for req in batch.drain(..) {
                    let _ = req.response_tx.send(Err(err.clone()));
                }
            }
            Err(err) => {
                for req in batch.drain(..) {
                    let _ = req.response_tx.send(Err(err.clone()));
                }
            }
        }
    }
}

// ================ Channel evaluator (worker side) ================

/// `PolicyModel` that forwards to an `InferenceServer`.
#[derive(Clone)]
pub struct ChannelEvaluator {
    request_tx: mpsc::SyncSender<InferenceRequest>,
}

impl ChannelEvaluator {
    pub fn new(request_tx: mpsc::SyncSender<InferenceRequest>) -> Self {
        Self { request_tx }
    }
}

impl PolicyModel for ChannelEvaluator {
    fn evaluate(&self, observation: &Observation) -> Result<PolicyOutput> {
        let (response_tx, response_rx) = mpsc::channel();
        let req = InferenceRequest {
            observation: observation.clone(),
            response_tx,
        };
        self.request_tx
            .send(req)
            .map_err(|_| ShogiError::Model("inference server disconnected".into()))?;
        response_rx
            .recv()
            .map_err(|_| ShogiError::Model("inference server dropped the request".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_env::GameState;
    use crate::model::LinearPolicy;
    use std::thread;

    #[test]
    fn channel_evaluator_matches_direct_evaluation() {
        let model = LinearPolicy::new(0.01, 4);
        let obs = GameState::new().observation();
        let direct = model.evaluate(&obs).unwrap();

        let (tx, rx) = inference_channel(4);
        let stats = thread::scope(|s| {
            let server = InferenceServer::new(&model, rx, 8, 1);
            let handle = s.spawn(move || server.run());
            let evaluators: Vec<ChannelEvaluator> = (0..3).map(|_| ChannelEvaluator::new(tx.clone())).collect();
            drop(tx);
            for evaluator in &evaluators {
                assert_eq!(evaluator.evaluate(&obs).unwrap(), direct);
            }
            drop(evaluators);
            handle.join().unwrap()
        });
        assert_eq!(stats.requests, 3);
        assert!(stats.batches >= 1 && stats.batches <= 3);
    }

    #[test]
    fn evaluator_reports_a_missing_server() {
        let (tx, rx) = inference_channel(1);
        drop(rx);
        let evaluator = ChannelEvaluator::new(tx);
        let err = evaluator.evaluate(&GameState::new().observation()).unwrap_err();
        assert!(matches!(err, ShogiError::Model(_)));
    }
}
