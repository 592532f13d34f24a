//! Grid-instruction environment: navigate to a named colored square.

use crate::position_frame;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skilldt::env::{EnvFactory, EnvStep, EnvWrapper, EpisodeRequest, Frame};
use skilldt::{Error, Result};

const GRID: i32 = 5;

const COLORS: [(&str, (i32, i32)); 4] = [
    ("red", (0, 0)),
    ("green", (GRID - 1, 0)),
    ("blue", (0, GRID - 1)),
    ("yellow", (GRID - 1, GRID - 1)),
];

/// A 5x5 grid with one colored goal square per episode.
///
/// Observation: `[agent_x, agent_y, goal_x, goal_y]` normalized to [0, 1].
/// Actions: four cardinal moves. The instruction names the goal color.
pub struct InstructionGrid {
    agent: (i32, i32),
    goal: (i32, i32),
    color: &'static str,
    done: bool,
    rng: StdRng,
}

impl InstructionGrid {
    pub fn new() -> Self {
        Self {
            agent: (GRID / 2, GRID / 2),
            goal: COLORS[0].1,
            color: COLORS[0].0,
            done: false,
            rng: StdRng::from_entropy(),
        }
    }

    fn observation(&self) -> ArrayD<f32> {
        let scale = (GRID - 1) as f32;
        ArrayD::from_shape_vec(
            IxDyn(&[4]),
            vec![
                self.agent.0 as f32 / scale,
                self.agent.1 as f32 / scale,
                self.goal.0 as f32 / scale,
                self.goal.1 as f32 / scale,
            ],
        )
        .expect("static shape")
    }
}

impl Default for InstructionGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvWrapper for InstructionGrid {
    fn reset(&mut self, seed: Option<u64>) -> Result<ArrayD<f32>> {
        if let Some(s) = seed {
            self.rng = StdRng::seed_from_u64(s);
        }
        let (color, goal) = COLORS[self.rng.gen_range(0..COLORS.len())];
        self.color = color;
        self.goal = goal;
        self.agent = (GRID / 2, GRID / 2);
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
            0 => self.agent.0 -= 1,
            1 => self.agent.0 += 1,
            2 => self.agent.1 -= 1,
            3 => self.agent.1 += 1,
            other => return Err(Error::Env(format!("invalid action {other}"))),
        }
        self.agent.0 = self.agent.0.clamp(0, GRID - 1);
        self.agent.1 = self.agent.1.clamp(0, GRID - 1);

        let success = self.agent == self.goal;
        self.done = success;

        Ok(EnvStep {
            observation: self.observation(),
            reward: if success { 1.0 } else { 0.0 },
            done: self.done,
            success,
        })
    }

    fn instruction(&self) -> String {
        format!("go to the {} square", self.color)
    }

    fn render_frame(&self) -> Option<Frame> {
        let scale = (GRID - 1) as f32;
        Some(position_frame(
            self.agent.0 as f32 / scale * 2.0 - 1.0,
            self.agent.1 as f32 / scale * 2.0 - 1.0,
        ))
    }
}

/// Builds a fresh `InstructionGrid` per episode.
pub struct InstructionGridFactory;

impl EnvFactory for InstructionGridFactory {
    fn create(&self, request: &EpisodeRequest) -> Result<Box<dyn EnvWrapper>> {
        let mut env = InstructionGrid::new();
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
    fn test_instruction_names_goal_color() {
        let mut env = InstructionGrid::new();
        env.reset(Some(5)).unwrap();
        assert!(env.instruction().starts_with("go to the "));
        assert!(COLORS.iter().any(|(c, _)| env.instruction().contains(c)));
    }

    #[test]
    fn test_walking_to_goal_succeeds() {
        let mut env = InstructionGrid::new();
        env.reset(Some(5)).unwrap();

        // walk greedily toward the goal
        for _ in 0..(2 * GRID) {
            let action = if env.agent.0 > env.goal.0 {
                0.0
            } else if env.agent.0 < env.goal.0 {
                1.0
            } else if env.agent.1 > env.goal.1 {
                2.0
            } else {
                3.0
            };
            let step = env
                .step(&ArrayD::from_elem(IxDyn(&[1]), action))
                .unwrap();
            if step.done {
                assert!(step.success);
                return;
            }
        }
        panic!("never reached the goal");
    }
}
