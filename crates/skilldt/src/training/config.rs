//! Trainer configuration.

use serde::{Deserialize, Serialize};
use tch::Device;

/// Configuration for the imitation trainer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Trajectories per mini-batch
    pub batch_size: usize,
    /// Chunk length K for option-based methods
    pub chunk_length: i64,
    /// Imitate next states in addition to actions
    pub state_il: bool,
    /// Base learning rate
    pub learning_rate: f64,
    /// Optimizer weight decay
    pub weight_decay: f64,
    /// LR warmup steps; no scheduler when absent
    pub warmup_steps: Option<u64>,

    // Evaluation
    /// Run the evaluation pass every N iterations
    pub eval_every: u64,
    /// Episode repeats per evaluation pass
    pub num_eval_episodes: u64,
    /// Multiplier on the dataset max length for episode caps
    pub eval_episode_factor: usize,
    /// Render every Nth episode repeat when rendering is on
    pub render_freq: u64,
    /// Directory for render artifacts
    pub render_path: String,
    /// Words excluded from the token-usage visualization
    pub skip_words: Vec<String>,

    /// Show progress bars
    pub progress: bool,
    /// Random seed
    pub seed: u64,

    /// Device to train on
    #[serde(skip, default = "default_device")]
    pub device: Device,
}

fn default_device() -> Device {
    Device::Cpu
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            chunk_length: 10,
            state_il: true,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            warmup_steps: Some(1000),

            eval_every: 5,
            num_eval_episodes: 10,
            eval_episode_factor: 2,
            render_freq: 1,
            render_path: "renders".to_string(),
            skip_words: Vec::new(),

            progress: true,
            seed: 42,

            device: Device::Cpu,
        }
    }
}

impl TrainerConfig {
    /// Create config for CUDA device
    pub fn cuda(mut self) -> Self {
        self.device = Device::Cuda(0);
        self
    }

    /// Set the learning rate
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set the chunk length K
    pub fn with_chunk_length(mut self, k: i64) -> Self {
        self.chunk_length = k;
        self
    }

    /// Set the evaluation cadence
    pub fn with_eval_every(mut self, n: u64) -> Self {
        self.eval_every = n;
        self
    }

    /// Set episode repeats per evaluation
    pub fn with_eval_episodes(mut self, n: u64) -> Self {
        self.num_eval_episodes = n;
        self
    }
}
