//! Generic continuous-control environment: a damped point mass.

use crate::position_frame;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skilldt::env::{EnvFactory, EnvStep, EnvWrapper, EpisodeRequest, Frame};
use skilldt::{Error, Result};

const DT: f32 = 0.1;
const DAMPING: f32 = 0.9;
const SUCCESS_RADIUS: f32 = 0.1;
const MAX_STEPS: u32 = 200;

/// A point mass pushed toward the origin with continuous 2D forces.
///
/// Observation: `[x, y, vx, vy]`. Action: force vector, clamped to [-1, 1].
pub struct PointMass {
    pos: [f32; 2],
    vel: [f32; 2],
    steps: u32,
    done: bool,
    rng: StdRng,
}

impl PointMass {
    pub fn new() -> Self {
        Self {
            pos: [0.0; 2],
            vel: [0.0; 2],
            steps: 0,
            done: false,
            rng: StdRng::from_entropy(),
        }
    }

    fn observation(&self) -> ArrayD<f32> {
        ArrayD::from_shape_vec(
            IxDyn(&[4]),
            vec![self.pos[0], self.pos[1], self.vel[0], self.vel[1]],
        )
        .expect("static shape")
    }
}

impl Default for PointMass {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvWrapper for PointMass {
    fn reset(&mut self, seed: Option<u64>) -> Result<ArrayD<f32>> {
        if let Some(s) = seed {
            self.rng = StdRng::seed_from_u64(s);
        }
        self.pos = [self.rng.gen_range(-0.8..0.8), self.rng.gen_range(-0.8..0.8)];
        self.vel = [0.0; 2];
        self.steps = 0;
        self.done = false;
        Ok(self.observation())
    }

    fn step(&mut self, action: &ArrayD<f32>) -> Result<EnvStep> {
        if self.done {
            return Err(Error::Env("step called on finished episode".into()));
        }
        let forces: Vec<f32> = action.iter().copied().collect();
        if forces.len() < 2 {
            return Err(Error::Env(format!(
                "expected a 2-dim force, got {} dims",
                forces.len()
            )));
        }

        for i in 0..2 {
            self.vel[i] = (self.vel[i] + forces[i].clamp(-1.0, 1.0) * DT) * DAMPING;
            self.pos[i] = (self.pos[i] + self.vel[i] * DT).clamp(-1.0, 1.0);
        }
        self.steps += 1;

        let distance = (self.pos[0] * self.pos[0] + self.pos[1] * self.pos[1]).sqrt();
        let success = distance < SUCCESS_RADIUS;
        self.done = success || self.steps >= MAX_STEPS;

        Ok(EnvStep {
            observation: self.observation(),
            reward: -distance as f64,
            done: self.done,
            success,
        })
    }

    fn instruction(&self) -> String {
        String::new()
    }

    fn render_frame(&self) -> Option<Frame> {
        Some(position_frame(self.pos[0], self.pos[1]))
    }
}

/// Builds a `PointMass` per episode.
pub struct PointMassFactory;

impl EnvFactory for PointMassFactory {
    fn create(&self, request: &EpisodeRequest) -> Result<Box<dyn EnvWrapper>> {
        let mut env = PointMass::new();
        if let Some(seed) = request.seed {
            env.rng = StdRng::seed_from_u64(seed);
        }
        Ok(Box::new(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_force_moves_mass() {
        let mut env = PointMass::new();
        let obs = env.reset(Some(3)).unwrap();
        let x0 = obs[IxDyn(&[0])];

        let force = ArrayD::from_shape_vec(IxDyn(&[2]), vec![1.0, 0.0]).unwrap();
        let step = env.step(&force).unwrap();
        assert!(step.observation[IxDyn(&[0])] > x0);
        assert!(step.reward <= 0.0);
    }

    #[test]
    fn test_episode_truncates() {
        let mut env = PointMass::new();
        env.reset(Some(3)).unwrap();
        let force = ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.0, 0.0]).unwrap();
        let mut done = false;
        for _ in 0..MAX_STEPS {
            let step = env.step(&force).unwrap();
            if step.done {
                done = true;
                break;
            }
        }
        assert!(done);
    }
}
