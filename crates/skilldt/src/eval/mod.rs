//! Episodic evaluation dispatch.
//!
//! Exactly one environment family is active per run, selected at
//! configuration time through [`EvalSetup`]:
//! - task-suite: repeats x task registry, seeded per repeat
//! - grid-instruction: plain repeats
//! - rephrasal-instruction: repeats x instruction x category x phrasing
//! - generic continuous control: plain repeats
//! - none: held-out-batch loss evaluation on the validation split
//!
//! Rollouts delegate to an [`EpisodeRunner`]; rendered episodes persist a
//! video artifact plus instruction and option-trace side files.

mod artifacts;
mod rollout;
mod words;

pub use artifacts::{persist_episode, sanitize_stem, FrameEncoder, RawFrameDump};
pub use rollout::{EpisodeOutcome, EpisodeRunner, GreedyRunner, RolloutRequest};
pub use words::WordsDict;

use crate::data::TrajectoryDataset;
use crate::env::{EnvFactory, EpisodeRequest, EvalSetup, RephrasalSet};
use crate::model::{Policy, PolicyMethod, Tokenizer};
use crate::training::step::compute_batch_losses;
use crate::training::{MetricAccumulator, StatSeries, TrainerConfig};
use crate::utils::episode_seed;
use crate::{viz, Error, MetricValue, Metrics, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tch::Device;

/// Episode cap for the task-suite family.
const TASK_SUITE_MAX_EP_LEN: usize = 50;

/// Borrowed view of everything one evaluation pass needs.
pub struct EvalContext<'a> {
    pub model: &'a dyn Policy,
    pub tokenizer: &'a dyn Tokenizer,
    pub runner: &'a dyn EpisodeRunner,
    pub factory: Option<&'a dyn EnvFactory>,
    pub encoder: &'a dyn FrameEncoder,
    pub config: &'a TrainerConfig,
    /// Longest trajectory in the training set, for episode caps.
    pub train_max_length: usize,
    pub no_lang: bool,
    pub device: Device,
    pub iter_num: u64,
    pub render: bool,
}

impl<'a> EvalContext<'a> {
    fn require_factory(&self) -> Result<&'a dyn EnvFactory> {
        self.factory.ok_or_else(|| {
            Error::Config("this evaluation family requires an environment factory".into())
        })
    }

    fn run_one(
        &self,
        env: &mut dyn crate::env::EnvWrapper,
        words: &mut WordsDict,
        max_steps: usize,
        seed: Option<u64>,
    ) -> Result<EpisodeOutcome> {
        let request = RolloutRequest {
            no_lang: self.no_lang,
            tokenizer: self.tokenizer,
            model: self.model,
            max_steps,
            chunk_length: self.config.chunk_length,
            render: self.render,
            device: self.device,
            seed,
        };
        self.runner.run_episode(env, &request, words)
    }

    /// Persist artifacts for the current repeat when rendering applies.
    fn maybe_persist(
        &self,
        repeat: u64,
        instruction_stem: Option<&str>,
        outcome: &EpisodeOutcome,
    ) -> Result<()> {
        if !self.render || repeat % self.config.render_freq.max(1) != 0 {
            return Ok(());
        }
        let stem = match instruction_stem {
            Some(instr) => format!("{}_{}_{}", self.iter_num, repeat, sanitize_stem(instr)),
            None => format!("{}_{}", self.iter_num, repeat),
        };
        persist_episode(
            Path::new(&self.config.render_path),
            &stem,
            outcome,
            self.encoder,
        )?;
        tracing::info!(
            options = ?outcome.option_trace,
            success = outcome.success,
            episode_return = outcome.episode_return,
            "Rendered episode"
        );
        Ok(())
    }
}

/// Run the evaluation procedure for the configured family.
pub fn evaluate(
    ctx: &EvalContext,
    setup: &EvalSetup,
    val_dataset: Option<&TrajectoryDataset>,
) -> Result<Metrics> {
    let method = ctx.model.method();

    // One fresh list per option, refilled by the rollout routine.
    let mut words = WordsDict::new();
    if method != PolicyMethod::Vanilla {
        words.reset(ctx.model.num_options());
    }

    let rollout_cap = ctx.config.eval_episode_factor.max(1) * ctx.train_max_length.max(1);

    let mut metrics = match setup {
        EvalSetup::TaskSuite { tasks } => eval_task_suite(ctx, tasks, &mut words)?,
        EvalSetup::GridInstruction => eval_repeats(ctx, &mut words, rollout_cap)?,
        EvalSetup::RephrasalInstruction { instructions } => {
            eval_rephrasal(ctx, instructions, &mut words)?
        }
        EvalSetup::Generic => eval_repeats(ctx, &mut words, rollout_cap)?,
        EvalSetup::HeldOut => eval_held_out(ctx, val_dataset)?,
    };

    if method != PolicyMethod::Vanilla && ctx.model.use_vq() {
        metrics.insert(
            "token_usage".to_string(),
            viz::token_usage(&words, ctx.model.num_options(), &ctx.config.skip_words),
        );
    }

    Ok(metrics)
}

/// Task-suite family: repeats x task registry with deterministic seeds.
fn eval_task_suite(
    ctx: &EvalContext,
    tasks: &[String],
    words: &mut WordsDict,
) -> Result<Metrics> {
    let factory = ctx.require_factory()?;

    let mut returns = StatSeries::default();
    let mut lengths = StatSeries::default();
    let mut successes = StatSeries::default();
    let mut task_wise: BTreeMap<String, StatSeries> = BTreeMap::new();

    for i in 1..=ctx.config.num_eval_episodes {
        let seed = episode_seed(i);
        for task in tasks {
            let mut env = factory.create(&EpisodeRequest::for_task(task, seed))?;
            let outcome = ctx.run_one(env.as_mut(), words, TASK_SUITE_MAX_EP_LEN, Some(seed))?;
            ctx.maybe_persist(i, None, &outcome)?;

            returns.push(outcome.episode_return);
            lengths.push(outcome.length as f64);
            successes.push(outcome.success as i64 as f64);
            task_wise
                .entry(task.clone())
                .or_default()
                .push(outcome.success as i64 as f64);
        }
    }

    let mut metrics = Metrics::new();
    metrics.insert("return_mean".into(), MetricValue::Scalar(returns.mean()));
    metrics.insert("return_std".into(), MetricValue::Scalar(returns.std()));
    metrics.insert("length_mean".into(), MetricValue::Scalar(lengths.mean()));
    metrics.insert("length_std".into(), MetricValue::Scalar(lengths.std()));
    metrics.insert("success_rate".into(), MetricValue::Scalar(successes.mean()));
    metrics.insert("success_std".into(), MetricValue::Scalar(successes.std()));
    metrics.insert("task_wise".into(), viz::success_histogram(&task_wise));
    Ok(metrics)
}

/// Plain-repeats families (grid-instruction and generic control).
fn eval_repeats(ctx: &EvalContext, words: &mut WordsDict, max_ep_len: usize) -> Result<Metrics> {
    let factory = ctx.require_factory()?;

    let mut returns = StatSeries::default();
    let mut lengths = StatSeries::default();
    let mut successes = StatSeries::default();

    for i in 1..=ctx.config.num_eval_episodes {
        let mut env = factory.create(&EpisodeRequest::plain())?;
        let outcome = ctx.run_one(env.as_mut(), words, max_ep_len, None)?;
        ctx.maybe_persist(i, None, &outcome)?;

        returns.push(outcome.episode_return);
        lengths.push(outcome.length as f64);
        successes.push(outcome.success as i64 as f64);
    }

    let mut metrics = Metrics::new();
    metrics.insert("return_mean".into(), MetricValue::Scalar(returns.mean()));
    metrics.insert("return_std".into(), MetricValue::Scalar(returns.std()));
    metrics.insert("length_mean".into(), MetricValue::Scalar(lengths.mean()));
    metrics.insert("length_std".into(), MetricValue::Scalar(lengths.std()));
    metrics.insert("success_rate".into(), MetricValue::Scalar(successes.mean()));
    Ok(metrics)
}

/// Rephrasal family: repeats x instruction x category x phrasing.
fn eval_rephrasal(
    ctx: &EvalContext,
    instructions: &RephrasalSet,
    words: &mut WordsDict,
) -> Result<Metrics> {
    let factory = ctx.require_factory()?;
    let max_ep_len = ctx.train_max_length.max(1);

    let mut dists = StatSeries::default();
    let mut lengths = StatSeries::default();
    let mut successes = StatSeries::default();
    let mut instr_wise: BTreeMap<String, StatSeries> = BTreeMap::new();
    let mut rephrasal_wise: BTreeMap<String, StatSeries> = BTreeMap::new();

    for i in 1..=ctx.config.num_eval_episodes {
        for entry in &instructions.entries {
            for (kind, phrasings) in &entry.variants {
                for phrasing in phrasings {
                    let mut env = factory
                        .create(&EpisodeRequest::for_instruction(phrasing, &entry.canonical))?;
                    let outcome = ctx.run_one(env.as_mut(), words, max_ep_len, None)?;
                    ctx.maybe_persist(i, Some(phrasing), &outcome)?;

                    dists.push(outcome.episode_return);
                    lengths.push(outcome.length as f64);
                    successes.push(outcome.success as i64 as f64);
                    instr_wise
                        .entry(entry.canonical.clone())
                        .or_default()
                        .push(outcome.success as i64 as f64);
                    rephrasal_wise
                        .entry(kind.label().to_string())
                        .or_default()
                        .push(outcome.success as i64 as f64);
                }
            }
        }
    }

    let mut metrics = Metrics::new();
    metrics.insert("length_mean".into(), MetricValue::Scalar(lengths.mean()));
    metrics.insert("length_std".into(), MetricValue::Scalar(lengths.std()));
    metrics.insert("dist_mean".into(), MetricValue::Scalar(dists.mean()));
    metrics.insert("dist_std".into(), MetricValue::Scalar(dists.std()));
    metrics.insert("success_rate".into(), MetricValue::Scalar(successes.mean()));
    metrics.insert("instr_wise".into(), viz::success_histogram(&instr_wise));
    metrics.insert(
        "rephrasal_wise".into(),
        viz::success_histogram(&rephrasal_wise),
    );
    Ok(metrics)
}

/// No environment configured: mirror the training step's loss computation
/// on the validation split, without the gradient update.
fn eval_held_out(ctx: &EvalContext, val_dataset: Option<&TrajectoryDataset>) -> Result<Metrics> {
    let val = val_dataset.ok_or_else(|| {
        Error::Config("held-out evaluation requires a validation dataset".into())
    })?;
    let _no_grad = tch::no_grad_guard();
    let discrete = ctx.model.discrete();

    let mut acc = MetricAccumulator::new();
    for batch in val.ordered_batches(ctx.config.batch_size)? {
        let losses = compute_batch_losses(
            ctx.model,
            ctx.tokenizer,
            &batch,
            ctx.config.state_il,
            ctx.config.chunk_length,
            ctx.device,
            ctx.iter_num as i64,
        )?;

        acc.push("eval_loss", losses.loss.double_value(&[]));
        acc.push("action_pred_loss", losses.act_loss.double_value(&[]));
        acc.push("state_pred_loss", losses.state_loss.double_value(&[]));
        acc.push("state_rc_loss", losses.state_rc_loss.double_value(&[]));
        acc.push("lang_rc_loss", losses.lang_rc_loss.double_value(&[]));
        if let Some(err) = losses.action_error {
            acc.push("action_error", err);
        }
    }

    let mut metrics = Metrics::new();
    metrics.insert(
        "eval_loss_mean".into(),
        MetricValue::Scalar(acc.mean("eval_loss")),
    );
    metrics.insert(
        "eval_loss_std".into(),
        MetricValue::Scalar(acc.std("eval_loss")),
    );
    for key in ["action_pred_loss", "state_pred_loss", "state_rc_loss", "lang_rc_loss"] {
        metrics.insert(key.into(), MetricValue::Scalar(acc.mean(key)));
    }
    if discrete {
        metrics.insert(
            "action_error".into(),
            MetricValue::Scalar(acc.mean("action_error")),
        );
    }
    Ok(metrics)
}
