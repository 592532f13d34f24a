//! Checkpointing for resumable training.
//!
//! Provides:
//! - `CheckpointRecord` - one atomic record of model/optimizer/scheduler
//!   state plus resume bookkeeping
//! - `Checkpointable` - trait the trainer implements for save/restore
//! - `CheckpointManager` - rotation and latest-checkpoint discovery

use crate::training::SchedulerState;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Complete persisted state for one checkpoint.
///
/// Written and read as a single binary record; the config snapshot is
/// opaque JSON for the caller's bookkeeping.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckpointRecord {
    /// Serialized canonical model weights
    pub model_weights: Vec<u8>,
    /// Optimizer learning rate at save time, if an optimizer was attached
    pub optimizer_lr: Option<f64>,
    /// Scheduler state, if a scheduler was attached
    pub scheduler: Option<SchedulerState>,
    /// Training iteration the checkpoint was taken at
    pub iter_num: u64,
    /// Longest trajectory in the training set
    pub train_max_length: u64,
    /// Opaque config snapshot
    pub config: serde_json::Value,
    /// Library version that wrote the record
    pub version: String,
}

/// What a restored checkpoint hands back for resume bookkeeping.
#[derive(Clone, Debug)]
pub struct ResumeInfo {
    pub iter_num: u64,
    pub train_max_length: u64,
    pub config: serde_json::Value,
}

/// Trait for trainers that can be checkpointed.
pub trait Checkpointable {
    /// Capture the current state as one record.
    fn to_record(&self, iter_num: u64, config: serde_json::Value) -> Result<CheckpointRecord>;

    /// Restore from a record. Model weights are restored unconditionally;
    /// optimizer/scheduler state only where those objects exist.
    fn restore(&mut self, record: &CheckpointRecord) -> Result<ResumeInfo>;
}

/// Serialize and write a record atomically (temp file + rename).
pub fn write_record(path: &Path, record: &CheckpointRecord) -> Result<()> {
    let bytes =
        bincode::serialize(record).map_err(|e| Error::Checkpoint(e.to_string()))?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and deserialize a record.
pub fn read_record(path: &Path) -> Result<CheckpointRecord> {
    let bytes = fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|e| Error::Checkpoint(e.to_string()))
}

/// Configuration for checkpoint management.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory to store checkpoints
    pub checkpoint_dir: PathBuf,
    /// Save a checkpoint every N iterations
    pub save_every: u64,
    /// Keep only the last N checkpoints (0 = keep all)
    pub keep_last: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            save_every: 10,
            keep_last: 5,
        }
    }
}

impl CheckpointConfig {
    /// Create a new config with the given directory.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    /// Set save frequency.
    pub fn save_every(mut self, iterations: u64) -> Self {
        self.save_every = iterations;
        self
    }

    /// Set number of checkpoints to keep.
    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }
}

/// Manages checkpoint lifecycle: saving, loading, rotation.
pub struct CheckpointManager {
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&config.checkpoint_dir) {
            tracing::warn!("Failed to create checkpoint directory: {}", e);
        }
        Self { config }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Save when the iteration hits the configured cadence.
    pub fn maybe_save<T: Checkpointable>(
        &self,
        trainable: &T,
        iter_num: u64,
        config: serde_json::Value,
    ) -> Result<Option<PathBuf>> {
        if iter_num == 0 || iter_num % self.config.save_every != 0 {
            return Ok(None);
        }
        self.save(trainable, iter_num, config).map(Some)
    }

    /// Force-save a checkpoint regardless of iteration.
    pub fn save<T: Checkpointable>(
        &self,
        trainable: &T,
        iter_num: u64,
        config: serde_json::Value,
    ) -> Result<PathBuf> {
        let record = trainable.to_record(iter_num, config)?;
        let path = self
            .config
            .checkpoint_dir
            .join(format!("checkpoint_iter_{:06}.bin", iter_num));

        write_record(&path, &record)?;
        tracing::info!(path = %path.display(), iter_num, "Saved checkpoint");

        if self.config.keep_last > 0 {
            self.cleanup_old_checkpoints()?;
        }
        Ok(path)
    }

    /// Restore the most recent checkpoint, if any exists.
    pub fn load_latest<T: Checkpointable>(&self, trainable: &mut T) -> Result<Option<ResumeInfo>> {
        let Some(path) = self.list_checkpoints()?.pop() else {
            return Ok(None);
        };
        let record = read_record(&path)?;
        let info = trainable.restore(&record)?;
        tracing::info!(path = %path.display(), iter_num = info.iter_num, "Loaded checkpoint");
        Ok(Some(info))
    }

    /// All checkpoint files in iteration order.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };

        let mut checkpoints: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("checkpoint_iter_") && n.ends_with(".bin"))
                    .unwrap_or(false)
            })
            .collect();

        checkpoints.sort();
        Ok(checkpoints)
    }

    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let mut checkpoints = self.list_checkpoints()?;
        while checkpoints.len() > self.config.keep_last {
            let old = checkpoints.remove(0);
            if let Err(e) = fs::remove_file(&old) {
                tracing::warn!(path = %old.display(), "Failed to remove old checkpoint: {}", e);
            } else {
                tracing::debug!(path = %old.display(), "Removed old checkpoint");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct MockTrainable {
        weights: Vec<u8>,
        iter_num: u64,
    }

    impl Checkpointable for MockTrainable {
        fn to_record(&self, iter_num: u64, config: serde_json::Value) -> Result<CheckpointRecord> {
            Ok(CheckpointRecord {
                model_weights: self.weights.clone(),
                optimizer_lr: Some(1e-4),
                scheduler: None,
                iter_num,
                train_max_length: 32,
                config,
                version: crate::VERSION.to_string(),
            })
        }

        fn restore(&mut self, record: &CheckpointRecord) -> Result<ResumeInfo> {
            self.weights = record.model_weights.clone();
            self.iter_num = record.iter_num;
            Ok(ResumeInfo {
                iter_num: record.iter_num,
                train_max_length: record.train_max_length,
                config: record.config.clone(),
            })
        }
    }

    #[test]
    fn test_record_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt.bin");
        let record = CheckpointRecord {
            model_weights: vec![1, 2, 3],
            optimizer_lr: Some(3e-4),
            scheduler: Some(SchedulerState { step_count: 12 }),
            iter_num: 7,
            train_max_length: 40,
            config: serde_json::json!({"k": 10}),
            version: crate::VERSION.to_string(),
        };

        write_record(&path, &record).unwrap();
        let restored = read_record(&path).unwrap();
        assert_eq!(restored.model_weights, vec![1, 2, 3]);
        assert_eq!(restored.iter_num, 7);
        assert_eq!(restored.train_max_length, 40);
        assert_eq!(restored.scheduler, Some(SchedulerState { step_count: 12 }));
    }

    #[test]
    fn test_maybe_save_respects_cadence() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(CheckpointConfig::new(dir.path()).save_every(5));
        let trainable = MockTrainable {
            weights: vec![1],
            iter_num: 0,
        };

        assert!(manager
            .maybe_save(&trainable, 0, serde_json::Value::Null)
            .unwrap()
            .is_none());
        assert!(manager
            .maybe_save(&trainable, 3, serde_json::Value::Null)
            .unwrap()
            .is_none());
        assert!(manager
            .maybe_save(&trainable, 5, serde_json::Value::Null)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_load_latest_restores_state() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(CheckpointConfig::new(dir.path()));
        let trainable = MockTrainable {
            weights: vec![9, 9],
            iter_num: 0,
        };

        manager
            .save(&trainable, 10, serde_json::json!({"lr": 1e-4}))
            .unwrap();

        let mut fresh = MockTrainable {
            weights: vec![],
            iter_num: 0,
        };
        let info = manager.load_latest(&mut fresh).unwrap().unwrap();
        assert_eq!(info.iter_num, 10);
        assert_eq!(fresh.weights, vec![9, 9]);
        assert_eq!(info.config["lr"], 1e-4);
    }

    #[test]
    fn test_rotation_keeps_last_n() {
        let dir = tempdir().unwrap();
        let manager =
            CheckpointManager::new(CheckpointConfig::new(dir.path()).save_every(1).keep_last(2));
        let trainable = MockTrainable {
            weights: vec![1],
            iter_num: 0,
        };

        for iter_num in 1..=5 {
            manager
                .save(&trainable, iter_num, serde_json::Value::Null)
                .unwrap();
        }

        let remaining = manager.list_checkpoints().unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining[0]
            .to_string_lossy()
            .contains("checkpoint_iter_000004"));
        assert!(remaining[1]
            .to_string_lossy()
            .contains("checkpoint_iter_000005"));
    }
}
