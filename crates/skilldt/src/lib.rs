//! # SkillDT
//!
//! Language-conditioned hierarchical imitation learning in Rust.
//!
//! ## Overview
//!
//! SkillDT provides:
//! - Offline trajectory datasets with chunk-aligned padding
//! - Mask-aware loss composition for decision-transformer policies with
//!   optional skill/option selectors
//! - A supervised training loop with gradient clipping and LR scheduling
//! - Episodic evaluation dispatch across several environment families
//! - Checkpointing with rotation and metric logging backends
//!
//! The neural architecture itself is a collaborator: anything implementing
//! the [`model::Policy`] trait can be trained. A compact reference policy is
//! included so the loop can be driven end to end.
//!
//! ## Features
//!
//! - `default` - Core functionality
//! - `tensorboard` - TensorBoard metric logging backend
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use skilldt::prelude::*;
//!
//! let dataset = TrajectoryDataset::new(trajectories, true);
//! let mut trainer = Trainer::new(policy, tokenizer, dataset, config)?;
//! let metrics = trainer.train_iteration(1)?;
//! ```

pub mod checkpoint;
pub mod data;
pub mod env;
pub mod eval;
pub mod log;
pub mod model;
pub mod training;
pub mod utils;
pub mod viz;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{CheckpointConfig, CheckpointManager, CheckpointRecord};
    pub use crate::data::{pad_to_multiple, TrajectoryBatch, TrajectoryDataset};
    pub use crate::env::{EnvFactory, EnvStep, EnvWrapper, EpisodeRequest, EvalSetup};
    pub use crate::eval::{EpisodeOutcome, EpisodeRunner, GreedyRunner, WordsDict};
    pub use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, NoOpLogger};
    pub use crate::model::{
        Encoding, HashTokenizer, ModelOutput, Policy, PolicyMethod, ReferencePolicy, Tokenizer,
    };
    pub use crate::training::{Trainer, TrainerConfig};
    pub use crate::{MetricValue, Metrics};

    #[cfg(feature = "tensorboard")]
    pub use crate::log::TensorBoardLogger;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::collections::HashMap;

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("environment error: {0}")]
    Env(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tensor error: {0}")]
    Tensor(#[from] tch::TchError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single value in a metrics dictionary.
///
/// Most entries are scalars; evaluation passes can also embed per-key success
/// histograms and the option/token usage matrix for downstream visualization.
#[derive(Debug, Clone)]
pub enum MetricValue {
    Scalar(f64),
    /// Labelled bars, e.g. per-task or per-rephrasal success rates.
    Histogram(Vec<(String, f64)>),
    /// Token usage counts per option index, from evaluation rollouts.
    TokenMatrix {
        num_options: usize,
        rows: Vec<(String, Vec<u64>)>,
    },
}

impl MetricValue {
    /// The scalar payload, if this is a scalar metric.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

/// Flat string-keyed metrics, namespaced by phase (`training/*`,
/// `evaluation/*`, `time/*`).
pub type Metrics = HashMap<String, MetricValue>;
