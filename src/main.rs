// src/main.rs - self-play PPO training loop
//
// usage: shogi_ppo [config.json] [iterations]

use anyhow::{Context, Result};
use shogi_ppo::{
    collect_parallel, inference_channel, ChannelEvaluator, InferenceServer, LinearPolicy,
    PpoUpdateEngine, TrainingConfig,
};
use std::thread;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn load_config(path: Option<&str>) -> Result<TrainingConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path))?;
            TrainingConfig::from_json_str(&text)?
        }
        None => {
            let mut config = TrainingConfig::default();
            config.collection = config
                .collection
                .with_steps_per_worker(256)
                .with_workers(4);
            config.ppo = config.ppo.with_minibatch_size(64);
            config
        }
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1).map(String::as_str))?;
    let iterations: usize = match args.get(2) {
        Some(n) => n.parse().with_context(|| format!("bad iteration count {}", n))?,
        None => 3,
    };
    info!(
        workers = config.collection.num_workers,
        steps_per_worker = config.collection.steps_per_worker,
        iterations,
        "starting self-play training"
    );

    let mut model = LinearPolicy::new(config.ppo.learning_rate as f32, config.collection.seed);
    let mut engine = PpoUpdateEngine::new(config.ppo.clone(), config.collection.seed)?;

    for iteration in 0..iterations {
        let start = Instant::now();
        let mut iter_config = config.clone();
        iter_config.collection.seed = config.collection.seed.wrapping_add((iteration as u64) << 16);

        // the server borrows the model only for the collection phase
        let mut report = thread::scope(|s| {
            let (tx, rx) = inference_channel(config.collection.inference_queue_bound);
            let server = InferenceServer::new(
                &model,
                rx,
                config.collection.inference_batch_size,
                config.collection.inference_timeout_ms,
            );
            let server_handle = s.spawn(move || server.run());
            let evaluators: Vec<ChannelEvaluator> = (0..config.collection.num_workers)
                .map(|_| ChannelEvaluator::new(tx.clone()))
                .collect();
            drop(tx);
            let report = collect_parallel(evaluators, &iter_config);
            if server_handle.join().is_err() {
                warn!("inference server thread panicked");
            }
            report
        })?;

        let finished = report.episodes.len();
        let mates = report
            .episodes
            .iter()
            .filter(|e| e.outcome.winner().is_some())
            .count();
        let metrics = engine.update(&mut model, &mut report.buffer)?;

        info!(
            iteration,
            episodes = finished,
            checkmates = mates,
            policy_loss = metrics.policy_loss,
            value_loss = metrics.value_loss,
            entropy = metrics.entropy,
            approx_kl = metrics.approx_kl,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "iteration done"
        );
        info!("metrics: {}", serde_json::to_string(&metrics)?);
    }

    Ok(())
}
