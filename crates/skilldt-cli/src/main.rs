//! SkillDT CLI
//!
//! Command-line interface for training and evaluating language-conditioned
//! imitation policies on the built-in toy environments.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use skilldt::checkpoint::{CheckpointConfig, CheckpointManager};
use skilldt::data::{synthetic_continuous_dataset, synthetic_dataset};
use skilldt::env::{default_rephrasal_set, default_task_registry, EnvFactory, EvalSetup};
use skilldt::model::{PolicyMethod, ReferencePolicyConfig};
use skilldt::prelude::*;

#[derive(Parser)]
#[command(name = "skilldt")]
#[command(version, about = "SkillDT - hierarchical imitation learning in Rust", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a policy on a synthetic dataset
    Train {
        /// Environment family (grid, task-suite, rephrasal, pointmass, none)
        #[arg(default_value = "grid")]
        env: String,

        /// Training iterations
        #[arg(long, default_value = "50")]
        iterations: u64,

        /// Learning rate
        #[arg(long, default_value = "0.0001")]
        lr: f64,

        /// Chunk length K for option-based methods
        #[arg(long, default_value = "10")]
        chunk_length: i64,

        /// Policy method (vanilla, option, traj-option)
        #[arg(long, default_value = "option")]
        method: String,

        /// Episode repeats per evaluation pass
        #[arg(long, default_value = "5")]
        eval_episodes: u64,

        /// Render evaluation episodes
        #[arg(long)]
        render: bool,

        /// Checkpoint directory
        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: String,
    },

    /// Evaluate a checkpointed policy
    Eval {
        /// Environment family (grid, task-suite, rephrasal, pointmass)
        env: String,

        /// Checkpoint file to restore
        #[arg(long)]
        checkpoint: Option<String>,

        /// Number of episode repeats
        #[arg(long, default_value = "10")]
        episodes: u64,
    },

    /// List available environment families
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            env,
            iterations,
            lr,
            chunk_length,
            method,
            eval_episodes,
            render,
            checkpoint_dir,
        } => train(
            &env,
            iterations,
            lr,
            chunk_length,
            &method,
            eval_episodes,
            render,
            &checkpoint_dir,
        ),
        Commands::Eval {
            env,
            checkpoint,
            episodes,
        } => eval(&env, checkpoint.as_deref(), episodes),
        Commands::List => {
            println!("Available environment families:");
            println!("  grid       - instruction-conditioned grid navigation");
            println!("  task-suite - named tasks with seeded episodes");
            println!("  rephrasal  - instruction rephrasal generalization");
            println!("  pointmass  - generic continuous control");
            println!("  none       - held-out-batch loss evaluation only");
            Ok(())
        }
    }
}

/// Map a family name to its evaluation setup and factory.
fn family(env: &str) -> Result<(EvalSetup, Option<Box<dyn EnvFactory>>)> {
    Ok(match env {
        "grid" => (
            EvalSetup::GridInstruction,
            Some(Box::new(skilldt_envs::InstructionGridFactory)),
        ),
        "task-suite" => (
            EvalSetup::TaskSuite {
                tasks: default_task_registry(),
            },
            Some(Box::new(skilldt_envs::GoalReachFactory)),
        ),
        "rephrasal" => (
            EvalSetup::RephrasalInstruction {
                instructions: default_rephrasal_set(),
            },
            Some(Box::new(skilldt_envs::RephrasalReachFactory)),
        ),
        "pointmass" => (
            EvalSetup::Generic,
            Some(Box::new(skilldt_envs::PointMassFactory)),
        ),
        "none" => (EvalSetup::HeldOut, None),
        other => bail!("unknown environment family: {other} (try `skilldt list`)"),
    })
}

fn parse_method(method: &str) -> Result<PolicyMethod> {
    Ok(match method {
        "vanilla" => PolicyMethod::Vanilla,
        "option" => PolicyMethod::Option,
        "traj-option" => PolicyMethod::TrajOption,
        other => bail!("unknown method: {other}"),
    })
}

fn build_trainer(
    env: &str,
    lr: f64,
    chunk_length: i64,
    method: PolicyMethod,
    eval_episodes: u64,
    continuous: bool,
) -> Result<Trainer<ReferencePolicy>> {
    let device = tch::Device::cuda_if_available();

    let policy = ReferencePolicy::new(
        device,
        ReferencePolicyConfig {
            state_dim: 4,
            act_dim: if continuous { 2 } else { 4 },
            discrete: !continuous,
            hidden_size: 64,
            vocab_size: 2048,
            method,
            horizon: chunk_length,
            num_options: 8,
            use_vq: method != PolicyMethod::Vanilla,
            ..Default::default()
        },
    );

    let (dataset, val_dataset) = if continuous {
        (
            synthetic_continuous_dataset(64, 12, 4, 2, 7)?,
            synthetic_continuous_dataset(16, 12, 4, 2, 8)?,
        )
    } else {
        (synthetic_dataset(64, 12, 4, 4, 7)?, synthetic_dataset(16, 12, 4, 4, 8)?)
    };

    let mut config = TrainerConfig::default()
        .with_lr(lr)
        .with_chunk_length(chunk_length)
        .with_eval_episodes(eval_episodes);
    config.device = device;

    let (setup, factory) = family(env)?;
    let mut trainer = Trainer::new(policy, Box::new(HashTokenizer::new(2048)), dataset, config)?
        .with_val_dataset(val_dataset)
        .with_eval_setup(setup);
    if let Some(factory) = factory {
        trainer = trainer.with_env_factory(factory);
    }
    Ok(trainer)
}

#[allow(clippy::too_many_arguments)]
fn train(
    env: &str,
    iterations: u64,
    lr: f64,
    chunk_length: i64,
    method: &str,
    eval_episodes: u64,
    render: bool,
    checkpoint_dir: &str,
) -> Result<()> {
    let continuous = env == "pointmass";
    let method = parse_method(method)?;
    let mut trainer = build_trainer(env, lr, chunk_length, method, eval_episodes, continuous)?;

    let logger = ConsoleLogger::new();
    let manager = CheckpointManager::new(CheckpointConfig::new(checkpoint_dir));
    let config_snapshot = serde_json::to_value(trainer.config())?;

    tracing::info!(env, iterations, "Starting training");

    for iter_num in 1..=iterations {
        let logs = trainer.train_iteration(iter_num, render)?;
        logger.log_metrics(&logs, iter_num);
        manager.maybe_save(&trainer, iter_num, config_snapshot.clone())?;
    }

    manager.save(&trainer, iterations, config_snapshot)?;
    tracing::info!("Training complete");
    Ok(())
}

fn eval(env: &str, checkpoint: Option<&str>, episodes: u64) -> Result<()> {
    let continuous = env == "pointmass";
    let mut trainer = build_trainer(
        env,
        1e-4,
        10,
        PolicyMethod::Option,
        episodes,
        continuous,
    )?;

    if let Some(path) = checkpoint {
        let info = trainer.load(std::path::Path::new(path))?;
        tracing::info!(iter_num = info.iter_num, "Restored checkpoint");
    }

    let metrics = trainer.evaluate(0, false)?;
    ConsoleLogger::new().log_metrics(&metrics, 0);
    Ok(())
}
