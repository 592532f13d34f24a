//! Single-episode rollout.
//!
//! The dispatcher drives episodes through the `EpisodeRunner` trait; the
//! included `GreedyRunner` replays the policy greedily over a sliding
//! context window. Rollout policies with search or sampling plug in through
//! the same trait.

use super::words::WordsDict;
use crate::env::{EnvWrapper, Frame};
use crate::model::{Policy, Tokenizer};
use crate::Result;
use tch::{Device, Kind, Tensor};

/// Everything a runner needs besides the environment itself.
pub struct RolloutRequest<'a> {
    pub no_lang: bool,
    pub tokenizer: &'a dyn Tokenizer,
    pub model: &'a dyn Policy,
    pub max_steps: usize,
    pub chunk_length: i64,
    pub render: bool,
    pub device: Device,
    pub seed: Option<u64>,
}

/// Outcome of one episode.
pub struct EpisodeOutcome {
    pub episode_return: f64,
    pub length: usize,
    pub success: bool,
    pub option_trace: Vec<i64>,
    pub instruction: String,
    pub frames: Vec<Frame>,
}

/// Runs one episode and folds spoken words into the shared dictionary.
pub trait EpisodeRunner: Send {
    fn run_episode(
        &self,
        env: &mut dyn EnvWrapper,
        request: &RolloutRequest,
        words: &mut WordsDict,
    ) -> Result<EpisodeOutcome>;
}

/// Greedy rollout over a sliding window of the last `chunk_length` steps.
pub struct GreedyRunner;

impl EpisodeRunner for GreedyRunner {
    fn run_episode(
        &self,
        env: &mut dyn EnvWrapper,
        request: &RolloutRequest,
        words: &mut WordsDict,
    ) -> Result<EpisodeOutcome> {
        let model = request.model;
        let discrete = model.discrete();
        let act_dim = model.act_dim();
        let device = request.device;
        let _no_grad = tch::no_grad_guard();

        let obs = env.reset(request.seed)?;
        let instruction = if request.no_lang {
            String::new()
        } else {
            env.instruction()
        };
        let instruction_words = request.tokenizer.words(&instruction);
        let encoding = request.tokenizer.tokenize(&[instruction.clone()], true)?;
        let lang_ids = encoding.token_ids.to_device(device);
        let lang_mask = encoding.attention_mask.to_device(device);

        let mut states: Vec<Vec<f32>> = vec![obs.iter().copied().collect()];
        let mut actions: Vec<Vec<f32>> = Vec::new();
        let mut option_trace: Vec<i64> = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        let mut episode_return = 0.0;
        let mut length = 0;
        let mut success = false;
        let mut last_option: Option<i64> = None;

        if request.render {
            if let Some(frame) = env.render_frame() {
                frames.push(frame);
            }
        }

        for _step in 0..request.max_steps {
            let window = request.chunk_length.max(1) as usize;
            let start = states.len().saturating_sub(window);
            let ctx_states = &states[start..];
            let t = ctx_states.len();
            let state_dim = ctx_states[0].len();

            let flat_states: Vec<f32> = ctx_states.iter().flatten().copied().collect();
            let states_t = Tensor::from_slice(&flat_states)
                .reshape([1, t as i64, state_dim as i64])
                .to_device(device);

            // Action history over the window, zero placeholder for the
            // current step.
            let mut flat_actions = vec![0f32; t * act_dim as usize];
            for (i, past) in actions[start..].iter().enumerate() {
                let base = i * act_dim as usize;
                flat_actions[base..base + past.len()].copy_from_slice(past);
            }
            let actions_t = Tensor::from_slice(&flat_actions)
                .reshape([1, t as i64, act_dim])
                .to_device(device);

            let timesteps_t = Tensor::arange_start(start as i64, (start + t) as i64, (Kind::Int64, device))
                .unsqueeze(0);
            let mask_t = Tensor::ones([1, t as i64], (Kind::Int64, device));

            let output =
                model.forward(&lang_ids, &lang_mask, &states_t, &actions_t, &timesteps_t, &mask_t)?;
            let last = output.action_preds.get(0).get(t as i64 - 1); // [A]
            let option = output
                .options
                .as_ref()
                .map(|o| o.int64_value(&[0, t as i64 - 1]));
            let (action_vec, action_index) = if discrete {
                let index = last.argmax(0, false).int64_value(&[]);
                let mut one_hot = vec![0f32; act_dim as usize];
                one_hot[index as usize] = 1.0;
                (one_hot, index as f32)
            } else {
                let values = Vec::<f32>::try_from(last.reshape([-1])).map_err(crate::Error::Tensor)?;
                (values, 0.0)
            };

            if let Some(option) = option {
                option_trace.push(option);
                if last_option != Some(option) {
                    words.record(option, &instruction_words);
                    last_option = Some(option);
                }
            }

            let env_action = if discrete {
                ndarray::ArrayD::from_elem(ndarray::IxDyn(&[1]), action_index)
            } else {
                ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&[action_vec.len()]), action_vec.clone())
                    .map_err(|e| crate::Error::Env(e.to_string()))?
            };

            let step = env.step(&env_action)?;
            episode_return += step.reward;
            length += 1;
            success = step.success;

            if request.render {
                if let Some(frame) = env.render_frame() {
                    frames.push(frame);
                }
            }

            actions.push(action_vec);
            states.push(step.observation.iter().copied().collect());

            if step.done {
                break;
            }
        }

        Ok(EpisodeOutcome {
            episode_return,
            length,
            success,
            option_trace,
            instruction,
            frames,
        })
    }
}
