//! Main imitation trainer.

use super::config::TrainerConfig;
use super::sched::WarmupLinear;
use super::stats::MetricAccumulator;
use super::step::compute_batch_losses;
use crate::checkpoint::{
    read_record, write_record, CheckpointRecord, Checkpointable, ResumeInfo,
};
use crate::data::TrajectoryDataset;
use crate::env::{EnvFactory, EvalSetup};
use crate::eval::{self, EpisodeRunner, EvalContext, FrameEncoder, GreedyRunner, RawFrameDump};
use crate::model::{Policy, Tokenizer};
use crate::{MetricValue, Metrics, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;
use tch::nn::OptimizerConfig;
use tch::{nn, Kind};

/// Global gradient-norm ceiling. Applied after `backward()` and before the
/// optimizer step on every batch, without exception.
const MAX_GRAD_NORM: f64 = 0.25;

/// Trainer for language-conditioned imitation learning.
///
/// Owns the policy, its optimizer and scheduler, the offline dataset, and
/// the evaluation wiring. One `train_iteration` is one pass over the
/// dataset plus (on cadence) one evaluation pass.
pub struct Trainer<P: Policy> {
    /// Configuration
    config: TrainerConfig,
    /// Policy under training
    model: P,
    /// Language tokenizer
    tokenizer: Box<dyn Tokenizer>,
    /// Optimizer over the policy's parameter store
    optimizer: nn::Optimizer,
    /// LR scheduler, stepped once per batch when present
    scheduler: Option<WarmupLinear>,
    /// Training trajectories
    dataset: TrajectoryDataset,
    /// Held-out trajectories for the no-environment evaluation fallback
    val_dataset: Option<TrajectoryDataset>,
    /// Which evaluation family runs
    eval_setup: EvalSetup,
    /// Per-episode environment construction
    env_factory: Option<Box<dyn EnvFactory>>,
    /// Single-episode rollout routine
    runner: Box<dyn EpisodeRunner>,
    /// Render-artifact encoder
    frame_encoder: Box<dyn FrameEncoder>,
    /// Batch shuffling
    rng: StdRng,
    /// Start time
    start_time: Instant,
}

impl<P: Policy> Trainer<P> {
    /// Create a new trainer over `model`'s parameter store.
    pub fn new(
        model: P,
        tokenizer: Box<dyn Tokenizer>,
        dataset: TrajectoryDataset,
        config: TrainerConfig,
    ) -> Result<Self> {
        crate::utils::set_seed(config.seed);

        let optimizer = nn::AdamW {
            wd: config.weight_decay,
            ..Default::default()
        }
        .build(model.var_store(), config.learning_rate)?;

        let scheduler = config
            .warmup_steps
            .map(|warmup| WarmupLinear::new(config.learning_rate, warmup));

        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            config,
            model,
            tokenizer,
            optimizer,
            scheduler,
            dataset,
            val_dataset: None,
            eval_setup: EvalSetup::HeldOut,
            env_factory: None,
            runner: Box::new(GreedyRunner),
            frame_encoder: Box::new(RawFrameDump),
            rng,
            start_time: Instant::now(),
        })
    }

    /// Attach a validation split for the held-out evaluation fallback.
    pub fn with_val_dataset(mut self, val_dataset: TrajectoryDataset) -> Self {
        self.val_dataset = Some(val_dataset);
        self
    }

    /// Select the evaluation family.
    pub fn with_eval_setup(mut self, setup: EvalSetup) -> Self {
        self.eval_setup = setup;
        self
    }

    /// Attach the per-episode environment factory.
    pub fn with_env_factory(mut self, factory: Box<dyn EnvFactory>) -> Self {
        self.env_factory = Some(factory);
        self
    }

    /// Replace the rollout routine.
    pub fn with_runner(mut self, runner: Box<dyn EpisodeRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replace the render-artifact encoder.
    pub fn with_frame_encoder(mut self, encoder: Box<dyn FrameEncoder>) -> Self {
        self.frame_encoder = encoder;
        self
    }

    pub fn model(&self) -> &P {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut P {
        &mut self.model
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    fn current_lr(&self) -> f64 {
        self.scheduler
            .as_ref()
            .map(|s| s.lr())
            .unwrap_or(self.config.learning_rate)
    }

    /// One pass over the training set, plus evaluation on cadence.
    pub fn train_iteration(&mut self, iter_num: u64, eval_render: bool) -> Result<Metrics> {
        let train_start = Instant::now();
        let discrete = self.model.discrete();
        let mut acc = MetricAccumulator::new();

        let batches = self.dataset.batches(self.config.batch_size, &mut self.rng)?;
        let progress = self.config.progress.then(|| {
            let pb = ProgressBar::new(batches.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            pb
        });

        for batch in &batches {
            let losses = compute_batch_losses(
                &self.model,
                self.tokenizer.as_ref(),
                batch,
                self.config.state_il,
                self.config.chunk_length,
                self.config.device,
                iter_num as i64,
            )?;

            self.optimizer.zero_grad();
            losses.loss.backward();
            self.clip_global_grad_norm();
            self.optimizer.step();
            if let Some(scheduler) = &mut self.scheduler {
                scheduler.step(&mut self.optimizer);
            }

            // Scalars detach here; nothing below holds the graph.
            tch::no_grad(|| {
                acc.push("train_loss", losses.loss.double_value(&[]));
                acc.push("action_pred_loss", losses.act_loss.double_value(&[]));
                acc.push("state_pred_loss", losses.state_loss.double_value(&[]));
                acc.push("options_pred_loss", losses.options_loss.double_value(&[]));
                acc.push("state_rc_loss", losses.state_rc_loss.double_value(&[]));
                acc.push("lang_rc_loss", losses.lang_rc_loss.double_value(&[]));
                acc.push("commitment_loss", losses.commitment_loss.double_value(&[]));
                acc.push("entropy", losses.entropy.double_value(&[]));
                acc.push("lang_entropy", losses.lang_entropy.double_value(&[]));
            });
            if let Some(action_error) = losses.action_error {
                acc.push("action_error", action_error);
            }

            if let Some(pb) = &progress {
                pb.set_message(format!("Loss: {:.4}", acc.mean("train_loss")));
                pb.inc(1);
            }
        }

        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }

        let mut logs = Metrics::new();
        logs.insert(
            "time/training".to_string(),
            MetricValue::Scalar(train_start.elapsed().as_secs_f64()),
        );

        if self.config.eval_every > 0 && iter_num % self.config.eval_every == 0 {
            let eval_start = Instant::now();
            let eval_metrics = self.evaluate(iter_num, eval_render)?;
            for (key, value) in eval_metrics {
                logs.insert(format!("evaluation/{key}"), value);
            }
            logs.insert(
                "time/evaluation".to_string(),
                MetricValue::Scalar(eval_start.elapsed().as_secs_f64()),
            );
        }

        logs.insert(
            "time/total".to_string(),
            MetricValue::Scalar(self.start_time.elapsed().as_secs_f64()),
        );

        logs.insert(
            "training/train_loss_mean".to_string(),
            MetricValue::Scalar(acc.mean("train_loss")),
        );
        logs.insert(
            "training/train_loss_std".to_string(),
            MetricValue::Scalar(acc.std("train_loss")),
        );
        if discrete {
            logs.insert(
                "training/action_error".to_string(),
                MetricValue::Scalar(acc.mean("action_error")),
            );
        }
        for key in [
            "action_pred_loss",
            "state_pred_loss",
            "options_pred_loss",
            "state_rc_loss",
            "lang_rc_loss",
            "commitment_loss",
            "entropy",
            "lang_entropy",
        ] {
            logs.insert(
                format!("training/{key}"),
                MetricValue::Scalar(acc.mean(key)),
            );
        }
        logs.insert(
            "training/mutual_information".to_string(),
            MetricValue::Scalar(acc.mean("entropy") - acc.mean("lang_entropy")),
        );
        logs.insert(
            "training/lr".to_string(),
            MetricValue::Scalar(self.current_lr()),
        );

        Ok(logs)
    }

    /// Run the configured evaluation family once.
    pub fn evaluate(&self, iter_num: u64, render: bool) -> Result<Metrics> {
        let ctx = EvalContext {
            model: &self.model,
            tokenizer: self.tokenizer.as_ref(),
            runner: self.runner.as_ref(),
            factory: self.env_factory.as_deref(),
            encoder: self.frame_encoder.as_ref(),
            config: &self.config,
            train_max_length: self.dataset.max_length(),
            no_lang: self.dataset.no_lang,
            device: self.config.device,
            iter_num,
            render,
        };
        eval::evaluate(&ctx, &self.eval_setup, self.val_dataset.as_ref())
    }

    /// Save one atomic checkpoint record.
    pub fn save(&self, iter_num: u64, filepath: &Path, config: serde_json::Value) -> Result<()> {
        let record = self.to_record(iter_num, config)?;
        write_record(filepath, &record)
    }

    /// Restore from a checkpoint record on disk.
    pub fn load(&mut self, filepath: &Path) -> Result<ResumeInfo> {
        let record = read_record(filepath)?;
        self.restore(&record)
    }

    /// Clip the global gradient norm across all parameters.
    fn clip_global_grad_norm(&self) {
        let mut total = 0.0f64;
        for var in self.model.var_store().variables().values() {
            let grad = var.grad();
            if grad.defined() {
                total += grad
                    .pow_tensor_scalar(2.0)
                    .sum(Kind::Float)
                    .double_value(&[]);
            }
        }
        let norm = total.sqrt();

        if norm > MAX_GRAD_NORM {
            let coef = MAX_GRAD_NORM / (norm + 1e-6);
            for var in self.model.var_store().variables().values() {
                let mut grad = var.grad();
                if grad.defined() {
                    let _ = grad.f_mul_scalar_(coef);
                }
            }
        }
    }
}

impl<P: Policy> Checkpointable for Trainer<P> {
    fn to_record(&self, iter_num: u64, config: serde_json::Value) -> Result<CheckpointRecord> {
        let mut weights = Vec::new();
        self.model.var_store().save_to_stream(&mut weights)?;

        Ok(CheckpointRecord {
            model_weights: weights,
            optimizer_lr: Some(self.current_lr()),
            scheduler: self.scheduler.as_ref().map(|s| s.state()),
            iter_num,
            train_max_length: self.dataset.max_length() as u64,
            config,
            version: crate::VERSION.to_string(),
        })
    }

    fn restore(&mut self, record: &CheckpointRecord) -> Result<ResumeInfo> {
        self.model
            .var_store_mut()
            .load_from_stream(Cursor::new(&record.model_weights))?;

        // Absent optimizer/scheduler state is skipped silently, not
        // distinguished from a restoration failure.
        if let Some(lr) = record.optimizer_lr {
            self.optimizer.set_lr(lr);
        }
        if let (Some(scheduler), Some(state)) = (self.scheduler.as_mut(), record.scheduler) {
            scheduler.load_state(state);
        }

        Ok(ResumeInfo {
            iter_num: record.iter_num,
            train_max_length: record.train_max_length,
            config: record.config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic_dataset;
    use crate::model::{HashTokenizer, PolicyMethod, ReferencePolicy, ReferencePolicyConfig};
    use tch::Device;

    fn reference_trainer(method: PolicyMethod, use_vq: bool) -> Trainer<ReferencePolicy> {
        let policy = ReferencePolicy::new(
            Device::Cpu,
            ReferencePolicyConfig {
                state_dim: 3,
                act_dim: 4,
                hidden_size: 16,
                vocab_size: 256,
                method,
                use_vq,
                num_options: 4,
                ..Default::default()
            },
        );
        let tokenizer = Box::new(HashTokenizer::new(256));
        let dataset = synthetic_dataset(8, 6, 3, 4, 11).unwrap();
        let config = TrainerConfig {
            batch_size: 4,
            chunk_length: 4,
            eval_every: 0,
            progress: false,
            ..Default::default()
        };
        Trainer::new(policy, tokenizer, dataset, config).unwrap()
    }

    #[test]
    fn test_train_iteration_produces_metrics() {
        let mut trainer = reference_trainer(PolicyMethod::Option, true);
        let logs = trainer.train_iteration(1, false).unwrap();

        assert!(logs.contains_key("training/train_loss_mean"));
        assert!(logs.contains_key("training/train_loss_std"));
        assert!(logs.contains_key("training/action_error"));
        assert!(logs.contains_key("training/commitment_loss"));
        assert!(logs.contains_key("training/mutual_information"));
        assert!(logs.contains_key("time/training"));
        assert!(logs.contains_key("time/total"));

        let loss = logs["training/train_loss_mean"].as_scalar().unwrap();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_vanilla_optional_losses_are_zero() {
        let mut trainer = reference_trainer(PolicyMethod::Vanilla, false);
        let logs = trainer.train_iteration(1, false).unwrap();

        assert_eq!(logs["training/commitment_loss"].as_scalar().unwrap(), 0.0);
        assert_eq!(logs["training/options_pred_loss"].as_scalar().unwrap(), 0.0);
        assert_eq!(logs["training/state_rc_loss"].as_scalar().unwrap(), 0.0);
        assert_eq!(logs["training/lang_rc_loss"].as_scalar().unwrap(), 0.0);
    }

    #[test]
    fn test_checkpoint_round_trip_restores_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trainer.bin");

        let trainer = reference_trainer(PolicyMethod::Option, true);
        let max_length = trainer.dataset.max_length() as u64;
        trainer
            .save(17, &path, serde_json::json!({"chunk_length": 4}))
            .unwrap();

        let mut fresh = reference_trainer(PolicyMethod::Option, true);
        let info = fresh.load(&path).unwrap();
        assert_eq!(info.iter_num, 17);
        assert_eq!(info.train_max_length, max_length);
        assert_eq!(info.config["chunk_length"], 4);
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut trainer = reference_trainer(PolicyMethod::Vanilla, false);
        let first = trainer.train_iteration(1, false).unwrap()["training/train_loss_mean"]
            .as_scalar()
            .unwrap();
        for iter_num in 2..=6 {
            trainer.train_iteration(iter_num, false).unwrap();
        }
        let last = trainer.train_iteration(7, false).unwrap()["training/train_loss_mean"]
            .as_scalar()
            .unwrap();
        assert!(last < first * 1.5, "loss diverged: {first} -> {last}");
    }
}
