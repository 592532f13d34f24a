//! Rephrasal-instruction environment.
//!
//! The canonical instruction fixes the goal; the concrete phrasing is what
//! the agent hears. Success therefore measures whether the policy grounds a
//! rephrased instruction to the same behavior.

use crate::{name_hash, position_frame};
use ndarray::{ArrayD, IxDyn};
use skilldt::env::{EnvFactory, EnvStep, EnvWrapper, EpisodeRequest, Frame};
use skilldt::{Error, Result};

const STEP_SIZE: f32 = 0.1;
const SUCCESS_RADIUS: f32 = 0.15;

/// A 2D point agent whose goal is derived from the canonical instruction.
pub struct RephrasalReach {
    /// What the agent hears (a concrete phrasing).
    phrasing: String,
    /// What fixes the dynamics.
    canonical: String,
    agent: [f32; 2],
    goal: [f32; 2],
    done: bool,
}

impl RephrasalReach {
    pub fn new(phrasing: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            phrasing: phrasing.into(),
            canonical: canonical.into(),
            agent: [0.0; 2],
            goal: [0.0; 2],
            done: false,
        }
    }

    fn observation(&self) -> ArrayD<f32> {
        ArrayD::from_shape_vec(
            IxDyn(&[4]),
            vec![self.agent[0], self.agent[1], self.goal[0], self.goal[1]],
        )
        .expect("static shape")
    }

    fn distance(&self) -> f32 {
        let dx = self.agent[0] - self.goal[0];
        let dy = self.agent[1] - self.goal[1];
        (dx * dx + dy * dy).sqrt()
    }
}

impl EnvWrapper for RephrasalReach {
    fn reset(&mut self, _seed: Option<u64>) -> Result<ArrayD<f32>> {
        let hash = name_hash(&self.canonical);
        self.goal = [
            ((hash % 13) as f32 / 6.0 - 1.0) * 0.8,
            ((hash / 13 % 13) as f32 / 6.0 - 1.0) * 0.8,
        ];
        self.agent = [0.0, 0.0];
        self.done = false;
        Ok(self.observation())
    }

    fn step(&mut self, action: &ArrayD<f32>) -> Result<EnvStep> {
        if self.done {
            return Err(Error::Env("step called on finished episode".into()));
        }
        let index = action
            .iter()
            .next()
            .copied()
            .ok_or_else(|| Error::Env("empty action".into()))? as i64;

        match index {
            0 => self.agent[0] -= STEP_SIZE,
            1 => self.agent[0] += STEP_SIZE,
            2 => self.agent[1] -= STEP_SIZE,
            3 => self.agent[1] += STEP_SIZE,
            other => return Err(Error::Env(format!("invalid action {other}"))),
        }
        self.agent[0] = self.agent[0].clamp(-1.0, 1.0);
        self.agent[1] = self.agent[1].clamp(-1.0, 1.0);

        let distance = self.distance();
        let success = distance < SUCCESS_RADIUS;
        self.done = success;

        Ok(EnvStep {
            observation: self.observation(),
            reward: -distance as f64,
            done: self.done,
            success,
        })
    }

    fn instruction(&self) -> String {
        self.phrasing.clone()
    }

    fn render_frame(&self) -> Option<Frame> {
        Some(position_frame(self.agent[0], self.agent[1]))
    }
}

/// Builds a `RephrasalReach` from the dispatcher's (phrasing, canonical)
/// request.
pub struct RephrasalReachFactory;

impl EnvFactory for RephrasalReachFactory {
    fn create(&self, request: &EpisodeRequest) -> Result<Box<dyn EnvWrapper>> {
        let phrasing = request
            .instruction
            .ok_or_else(|| Error::Env("rephrasal episode without a phrasing".into()))?;
        let canonical = request.canonical.unwrap_or(phrasing);
        Ok(Box::new(RephrasalReach::new(phrasing, canonical)))
    }
}
