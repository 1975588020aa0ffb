use crate::{config, TrainingError};

pub trait LRScheduler: Send {
    /// Advances one step and returns the rate to use for it.
    fn step(&mut self) -> f64;
    /// Rate returned by the most recent [`LRScheduler::step`].
    fn learning_rate(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerConfig {
    InverseSqrtWarmup { d_model: usize, warmup_steps: usize },
    Constant { learning_rate: f64 },
}

impl SchedulerConfig {
    pub fn from_training_config(
        cfg: &config::SchedulerConfig,
        d_model: usize,
    ) -> Result<Self, TrainingError> {
        match cfg.strategy {
            config::LearningRateSchedule::InverseSqrtWarmup => Ok(SchedulerConfig::InverseSqrtWarmup {
                d_model,
                warmup_steps: cfg.warmup_steps,
            }),
            config::LearningRateSchedule::Constant => {
                let learning_rate = cfg.learning_rate.ok_or_else(|| {
                    TrainingError::initialization("constant schedule requires a learning_rate")
                })?;
                Ok(SchedulerConfig::Constant {
                    learning_rate: learning_rate as f64,
                })
            }
        }
    }

    pub fn build(self) -> Result<Box<dyn LRScheduler>, TrainingError> {
        match self {
            SchedulerConfig::InverseSqrtWarmup {
                d_model,
                warmup_steps,
            } => Ok(Box::new(InverseSqrtWarmup::new(d_model, warmup_steps)?)),
            SchedulerConfig::Constant { learning_rate } => {
                Ok(Box::new(Constant::new(learning_rate)?))
            }
        }
    }
}

/// `d_model^-0.5 * min(step^-0.5, step * warmup_steps^-1.5)`.
///
/// Rises linearly for `warmup_steps` steps, peaks at `step == warmup_steps`,
/// then decays with the inverse square root of the step.
#[derive(Debug, Clone)]
pub struct InverseSqrtWarmup {
    d_model: usize,
    warmup_steps: usize,
    step: usize,
    current_lr: f64,
}

impl InverseSqrtWarmup {
    pub fn new(d_model: usize, warmup_steps: usize) -> Result<Self, TrainingError> {
        if d_model == 0 {
            return Err(TrainingError::initialization(
                "schedule requires d_model greater than zero",
            ));
        }
        if warmup_steps == 0 {
            return Err(TrainingError::initialization(
                "schedule requires warmup_steps greater than zero",
            ));
        }
        Ok(Self {
            d_model,
            warmup_steps,
            step: 0,
            current_lr: 0.0,
        })
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    /// Rate at a 1-indexed `step`; step zero is undefined and rejected.
    pub fn rate(&self, step: usize) -> Result<f64, TrainingError> {
        if step == 0 {
            return Err(TrainingError::initialization(
                "learning-rate schedule is 1-indexed; step 0 is undefined",
            ));
        }
        Ok(self.compute_lr(step))
    }

    fn compute_lr(&self, step: usize) -> f64 {
        let step = step as f64;
        let warmup = self.warmup_steps as f64;
        let decay = step.powf(-0.5);
        let ramp = step * warmup.powf(-1.5);
        (self.d_model as f64).powf(-0.5) * decay.min(ramp)
    }
}

impl LRScheduler for InverseSqrtWarmup {
    fn step(&mut self) -> f64 {
        self.step = self.step.saturating_add(1);
        self.current_lr = self.compute_lr(self.step);
        self.current_lr
    }

    fn learning_rate(&self) -> f64 {
        self.current_lr
    }
}

#[derive(Debug, Clone)]
pub struct Constant {
    learning_rate: f64,
}

impl Constant {
    pub fn new(learning_rate: f64) -> Result<Self, TrainingError> {
        if !(learning_rate > 0.0 && learning_rate.is_finite()) {
            return Err(TrainingError::initialization(
                "constant schedule requires a positive learning rate",
            ));
        }
        Ok(Self { learning_rate })
    }
}

impl LRScheduler for Constant {
    fn step(&mut self) -> f64 {
        self.learning_rate
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_uses_warmup_branch() -> Result<(), TrainingError> {
        let schedule = InverseSqrtWarmup::new(128, 4000)?;
        let expected = 128f64.powf(-0.5) * 4000f64.powf(-1.5);
        assert!((schedule.rate(1)? - expected).abs() < 1e-15);
        Ok(())
    }

    #[test]
    fn rises_then_decays_around_warmup() -> Result<(), TrainingError> {
        let warmup = 50;
        let schedule = InverseSqrtWarmup::new(64, warmup)?;
        for step in 1..warmup {
            assert!(schedule.rate(step + 1)? > schedule.rate(step)?, "step {step}");
        }
        for step in warmup + 1..4 * warmup {
            assert!(schedule.rate(step + 1)? < schedule.rate(step)?, "step {step}");
        }
        let peak = schedule.rate(warmup)?;
        for step in 1..4 * warmup {
            assert!(schedule.rate(step)? <= peak + 1e-12);
        }
        Ok(())
    }

    #[test]
    fn step_zero_is_rejected() -> Result<(), TrainingError> {
        let schedule = InverseSqrtWarmup::new(8, 10)?;
        assert!(matches!(
            schedule.rate(0),
            Err(TrainingError::Initialization(_))
        ));
        Ok(())
    }

    #[test]
    fn stepping_is_one_indexed() -> Result<(), TrainingError> {
        let mut schedule = SchedulerConfig::InverseSqrtWarmup {
            d_model: 16,
            warmup_steps: 10,
        }
        .build()?;
        assert_eq!(schedule.learning_rate(), 0.0);
        let first = schedule.step();
        let reference = InverseSqrtWarmup::new(16, 10)?;
        assert_eq!(first, reference.rate(1)?);
        assert_eq!(schedule.learning_rate(), first);
        assert_eq!(schedule.step(), reference.rate(2)?);
        Ok(())
    }

    #[test]
    fn constant_requires_positive_rate() -> Result<(), TrainingError> {
        assert!(Constant::new(0.0).is_err());
        let mut schedule = SchedulerConfig::Constant { learning_rate: 1e-3 }.build()?;
        assert_eq!(schedule.step(), 1e-3);
        Ok(())
    }
}
