//! Offline trajectory storage and batching.
//!
//! Provides:
//! - `Trajectory` - one language-annotated episode
//! - `TrajectoryDataset` - storage plus shuffled mini-batch iteration
//! - `TrajectoryBatch` - padded per-timestep tensors for one batch
//! - `pad_to_multiple` - chunk-aligned padding for option-based methods

use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use tch::{Device, Tensor};

/// Action sequence for one trajectory: class indices or continuous vectors.
#[derive(Clone, Debug)]
pub enum ActionSeq {
    Discrete(Vec<i64>),
    Continuous(Vec<Vec<f32>>),
}

impl ActionSeq {
    pub fn len(&self) -> usize {
        match self {
            ActionSeq::Discrete(a) => a.len(),
            ActionSeq::Continuous(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single language-annotated trajectory of experience.
#[derive(Clone, Debug)]
pub struct Trajectory {
    pub lang: String,
    pub states: Vec<Vec<f32>>,
    pub actions: ActionSeq,
    pub dones: Vec<bool>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// One padded batch of trajectories, ready for a forward pass.
///
/// All per-timestep tensors share the same `[B, T]` leading shape; the
/// attention mask is 1 for valid steps and 0 for padding.
#[derive(Debug)]
pub struct TrajectoryBatch {
    pub langs: Vec<String>,
    /// `[B, T, S]` float
    pub states: Tensor,
    /// `[B, T]` int64 class indices, or `[B, T, A]` float when continuous
    pub actions: Tensor,
    /// `[B, T]` int64
    pub timesteps: Tensor,
    /// `[B, T]` int64
    pub dones: Tensor,
    /// `[B, T]` int64, 1 = valid
    pub attention_mask: Tensor,
    pub discrete: bool,
}

impl TrajectoryBatch {
    /// Batch size.
    pub fn batch_size(&self) -> i64 {
        self.states.size()[0]
    }

    /// Padded sequence length.
    pub fn seq_len(&self) -> i64 {
        self.states.size()[1]
    }

    /// Move every tensor to the given device.
    pub fn to_device(&self, device: Device) -> TrajectoryBatch {
        TrajectoryBatch {
            langs: self.langs.clone(),
            states: self.states.to_device(device),
            actions: self.actions.to_device(device),
            timesteps: self.timesteps.to_device(device),
            dones: self.dones.to_device(device),
            attention_mask: self.attention_mask.to_device(device),
            discrete: self.discrete,
        }
    }
}

/// Right-pad a `[B, T, ...]` tensor with zeros along the time dimension.
fn pad_time(t: &Tensor, padded_len: i64) -> Tensor {
    let size = t.size();
    let extra = padded_len - size[1];
    if extra <= 0 {
        return t.shallow_clone();
    }
    let mut pad_shape = size.clone();
    pad_shape[1] = extra;
    let zeros = Tensor::zeros(pad_shape.as_slice(), (t.kind(), t.device()));
    Tensor::cat(&[t.shallow_clone(), zeros], 1)
}

/// Pad every per-timestep field to the next multiple of the chunk length `k`.
///
/// Option-based methods reshape the sequence into fixed-size chunks; the
/// padded length is `(T / k + 1) * k` so the reshape never truncates.
pub fn pad_to_multiple(batch: &TrajectoryBatch, k: i64) -> Result<TrajectoryBatch> {
    if k <= 0 {
        return Err(Error::Config(format!("chunk length must be positive, got {k}")));
    }
    let len = batch.seq_len();
    let padded_len = (len / k + 1) * k;

    Ok(TrajectoryBatch {
        langs: batch.langs.clone(),
        states: pad_time(&batch.states, padded_len),
        actions: pad_time(&batch.actions, padded_len),
        timesteps: pad_time(&batch.timesteps, padded_len),
        dones: pad_time(&batch.dones, padded_len),
        attention_mask: pad_time(&batch.attention_mask, padded_len),
        discrete: batch.discrete,
    })
}

/// Dataset of variable-length trajectories with shuffled mini-batching.
pub struct TrajectoryDataset {
    trajectories: Vec<Trajectory>,
    /// Whether language annotations should be ignored at evaluation time.
    pub no_lang: bool,
    max_length: usize,
    state_dim: usize,
    discrete: bool,
    act_dim: usize,
}

impl TrajectoryDataset {
    pub fn new(trajectories: Vec<Trajectory>, no_lang: bool) -> Result<Self> {
        if trajectories.is_empty() {
            return Err(Error::Config("dataset must contain at least one trajectory".into()));
        }
        let max_length = trajectories.iter().map(|t| t.len()).max().unwrap_or(0);
        let state_dim = trajectories[0].states[0].len();
        let (discrete, act_dim) = match &trajectories[0].actions {
            ActionSeq::Discrete(_) => (true, 0),
            ActionSeq::Continuous(a) => (false, a[0].len()),
        };

        for traj in &trajectories {
            if traj.actions.len() != traj.len() || traj.dones.len() != traj.len() {
                return Err(Error::Config(
                    "per-timestep fields must share one length within a trajectory".into(),
                ));
            }
        }

        Ok(Self {
            trajectories,
            no_lang,
            max_length,
            state_dim,
            discrete,
            act_dim,
        })
    }

    /// Longest trajectory length in the dataset.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn discrete(&self) -> bool {
        self.discrete
    }

    /// Build padded batches over a shuffled pass of the dataset.
    pub fn batches<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Result<Vec<TrajectoryBatch>> {
        let mut order: Vec<usize> = (0..self.trajectories.len()).collect();
        order.shuffle(rng);

        order
            .chunks(batch_size.max(1))
            .map(|chunk| self.collate(chunk))
            .collect()
    }

    /// Build padded batches in index order (held-out evaluation).
    pub fn ordered_batches(&self, batch_size: usize) -> Result<Vec<TrajectoryBatch>> {
        let order: Vec<usize> = (0..self.trajectories.len()).collect();
        order
            .chunks(batch_size.max(1))
            .map(|chunk| self.collate(chunk))
            .collect()
    }

    /// Collate a set of trajectories into one padded batch.
    pub fn collate(&self, indices: &[usize]) -> Result<TrajectoryBatch> {
        let b = indices.len();
        let t = indices
            .iter()
            .map(|&i| self.trajectories[i].len())
            .max()
            .ok_or_else(|| Error::Config("cannot collate an empty batch".into()))?;
        let s = self.state_dim;

        let mut langs = Vec::with_capacity(b);
        let mut states = vec![0f32; b * t * s];
        let mut timesteps = vec![0i64; b * t];
        let mut dones = vec![0i64; b * t];
        let mut mask = vec![0i64; b * t];
        let mut disc_actions = vec![0i64; b * t];
        let mut cont_actions = vec![0f32; b * t * self.act_dim.max(1)];

        for (row, &idx) in indices.iter().enumerate() {
            let traj = &self.trajectories[idx];
            langs.push(traj.lang.clone());
            for step in 0..traj.len() {
                let flat = row * t + step;
                states[flat * s..(flat + 1) * s].copy_from_slice(&traj.states[step]);
                timesteps[flat] = step as i64;
                dones[flat] = traj.dones[step] as i64;
                mask[flat] = 1;
                match &traj.actions {
                    ActionSeq::Discrete(a) => disc_actions[flat] = a[step],
                    ActionSeq::Continuous(a) => {
                        let d = self.act_dim;
                        cont_actions[flat * d..(flat + 1) * d].copy_from_slice(&a[step]);
                    }
                }
            }
        }

        let actions = if self.discrete {
            Tensor::from_slice(&disc_actions).reshape([b as i64, t as i64])
        } else {
            Tensor::from_slice(&cont_actions).reshape([b as i64, t as i64, self.act_dim as i64])
        };

        Ok(TrajectoryBatch {
            langs,
            states: Tensor::from_slice(&states).reshape([b as i64, t as i64, s as i64]),
            actions,
            timesteps: Tensor::from_slice(&timesteps).reshape([b as i64, t as i64]),
            dones: Tensor::from_slice(&dones).reshape([b as i64, t as i64]),
            attention_mask: Tensor::from_slice(&mask).reshape([b as i64, t as i64]),
            discrete: self.discrete,
        })
    }
}

/// Build a small synthetic discrete-action dataset, mostly for demos/tests.
pub fn synthetic_dataset(
    num_trajectories: usize,
    max_len: usize,
    state_dim: usize,
    num_actions: i64,
    seed: u64,
) -> Result<TrajectoryDataset> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let instructions = [
        "go to the red square",
        "open the drawer",
        "push the block left",
        "press the button",
    ];

    let mut trajectories = Vec::with_capacity(num_trajectories);
    for i in 0..num_trajectories {
        let len = rng.gen_range(2..=max_len.max(2));
        let mut states = Vec::with_capacity(len);
        let mut actions = Vec::with_capacity(len);
        let mut dones = Vec::with_capacity(len);
        for step in 0..len {
            states.push((0..state_dim).map(|_| rng.gen_range(-1.0..1.0)).collect());
            actions.push(rng.gen_range(0..num_actions));
            dones.push(step == len - 1);
        }
        trajectories.push(Trajectory {
            lang: instructions[i % instructions.len()].to_string(),
            states,
            actions: ActionSeq::Discrete(actions),
            dones,
        });
    }

    TrajectoryDataset::new(trajectories, false)
}

/// Continuous-action counterpart of [`synthetic_dataset`].
pub fn synthetic_continuous_dataset(
    num_trajectories: usize,
    max_len: usize,
    state_dim: usize,
    act_dim: usize,
    seed: u64,
) -> Result<TrajectoryDataset> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let mut trajectories = Vec::with_capacity(num_trajectories);
    for _ in 0..num_trajectories {
        let len = rng.gen_range(2..=max_len.max(2));
        let mut states = Vec::with_capacity(len);
        let mut actions = Vec::with_capacity(len);
        let mut dones = Vec::with_capacity(len);
        for step in 0..len {
            states.push((0..state_dim).map(|_| rng.gen_range(-1.0..1.0)).collect());
            actions.push((0..act_dim).map(|_| rng.gen_range(-1.0..1.0)).collect());
            dones.push(step == len - 1);
        }
        trajectories.push(Trajectory {
            lang: String::new(),
            states,
            actions: ActionSeq::Continuous(actions),
            dones,
        });
    }

    TrajectoryDataset::new(trajectories, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tch::Kind;

    fn tiny_dataset() -> TrajectoryDataset {
        synthetic_dataset(6, 5, 3, 4, 7).unwrap()
    }

    #[test]
    fn test_collate_shapes_and_mask() {
        let ds = tiny_dataset();
        let batch = ds.collate(&[0, 1]).unwrap();
        assert_eq!(batch.states.size().len(), 3);
        assert_eq!(batch.states.size()[0], 2);
        assert_eq!(batch.attention_mask.size(), batch.timesteps.size());

        // mask counts equal the real trajectory lengths
        let total_mask = batch
            .attention_mask
            .sum(Kind::Int64)
            .int64_value(&[]);
        assert!(total_mask >= 4); // two trajectories of length >= 2
    }

    #[test]
    fn test_pad_to_multiple_always_adds_a_chunk() {
        let ds = tiny_dataset();
        let batch = ds.collate(&[0, 1, 2]).unwrap();
        let k = 4;
        let padded = pad_to_multiple(&batch, k).unwrap();
        assert_eq!(padded.seq_len() % k, 0);
        assert!(padded.seq_len() > batch.seq_len());
        // padding contributes nothing to the mask
        let before = batch.attention_mask.sum(Kind::Int64).int64_value(&[]);
        let after = padded.attention_mask.sum(Kind::Int64).int64_value(&[]);
        assert_eq!(before, after);
    }

    #[test]
    fn test_batches_cover_dataset() {
        let ds = tiny_dataset();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let batches = ds.batches(4, &mut rng).unwrap();
        let covered: usize = batches.iter().map(|b| b.langs.len()).sum();
        assert_eq!(covered, ds.len());
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let traj = Trajectory {
            lang: "x".into(),
            states: vec![vec![0.0], vec![0.0]],
            actions: ActionSeq::Discrete(vec![0]),
            dones: vec![false, true],
        };
        assert!(TrajectoryDataset::new(vec![traj], false).is_err());
    }
}
