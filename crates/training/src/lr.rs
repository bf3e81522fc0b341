//! Epoch-level learning-rate schedules.

use crate::config::{LrSchedulerKind, RunConfig};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrDecay {
    /// Multiply by `gamma` every `step_size` epochs.
    Step { step_size: usize, gamma: f64 },
    /// Multiply by `gamma` every epoch.
    Exponential { gamma: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LrScheduler {
    base_lr: f64,
    decay: Option<LrDecay>,
    epochs: usize,
}

impl LrScheduler {
    pub fn new(base_lr: f64, decay: Option<LrDecay>) -> Self {
        Self {
            base_lr,
            decay,
            epochs: 0,
        }
    }

    /// `StepLR` defaults to step size 10 and gamma 0.1, `ExponentialLR` to gamma 0.9.
    pub fn from_config(config: &RunConfig) -> Self {
        let decay = config.learning_rate_scheduler.map(|kind| match kind {
            LrSchedulerKind::StepLR => LrDecay::Step {
                step_size: config.lr_step_size.unwrap_or(10).max(1),
                gamma: config.lr_gamma.unwrap_or(0.1),
            },
            LrSchedulerKind::ExponentialLR => LrDecay::Exponential {
                gamma: config.lr_gamma.unwrap_or(0.9),
            },
        });
        Self::new(config.learning_rate, decay)
    }

    pub fn decay(&self) -> Option<LrDecay> {
        self.decay
    }

    pub fn is_constant(&self) -> bool {
        self.decay.is_none()
    }

    pub fn current(&self) -> f64 {
        match self.decay {
            None => self.base_lr,
            Some(LrDecay::Step { step_size, gamma }) => {
                self.base_lr * gamma.powi((self.epochs / step_size) as i32)
            }
            Some(LrDecay::Exponential { gamma }) => self.base_lr * gamma.powi(self.epochs as i32),
        }
    }

    /// Advance one epoch; returns the rate before and after.
    pub fn step(&mut self) -> (f64, f64) {
        let before = self.current();
        self.epochs += 1;
        (before, self.current())
    }
}
