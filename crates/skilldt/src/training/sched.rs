//! Learning-rate scheduling.

use serde::{Deserialize, Serialize};
use tch::nn;

/// Serializable scheduler state, persisted in checkpoints.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerState {
    pub step_count: u64,
}

/// Linear-warmup scheduler stepped once per batch.
///
/// The learning rate ramps from near zero to the base rate over
/// `warmup_steps`, then stays flat.
#[derive(Debug)]
pub struct WarmupLinear {
    base_lr: f64,
    warmup_steps: u64,
    state: SchedulerState,
}

impl WarmupLinear {
    pub fn new(base_lr: f64, warmup_steps: u64) -> Self {
        Self {
            base_lr,
            warmup_steps: warmup_steps.max(1),
            state: SchedulerState::default(),
        }
    }

    /// Current learning rate.
    pub fn lr(&self) -> f64 {
        let scale = ((self.state.step_count + 1) as f64 / self.warmup_steps as f64).min(1.0);
        self.base_lr * scale
    }

    /// Advance one step and push the new rate into the optimizer.
    pub fn step(&mut self, optimizer: &mut nn::Optimizer) {
        self.state.step_count += 1;
        optimizer.set_lr(self.lr());
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn load_state(&mut self, state: SchedulerState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_ramp() {
        let sched = WarmupLinear::new(1e-3, 100);
        assert!(sched.lr() < 1e-3);

        let mut sched = WarmupLinear::new(1e-3, 100);
        sched.state = SchedulerState { step_count: 99 };
        assert!((sched.lr() - 1e-3).abs() < 1e-12);

        sched.state = SchedulerState { step_count: 500 };
        assert!((sched.lr() - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_state_round_trip() {
        let mut sched = WarmupLinear::new(1e-4, 10);
        sched.load_state(SchedulerState { step_count: 7 });
        assert_eq!(sched.state(), SchedulerState { step_count: 7 });
    }
}
