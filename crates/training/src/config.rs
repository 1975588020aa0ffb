use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;
use transducer::TransformerConfig;

/// Complete training configuration, loaded from TOML or JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    pub model: TransformerConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl TrainingConfig {
    /// Parses by file extension (`.json`, otherwise TOML) and validates.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: TrainingConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Collects every problem instead of stopping at the first.
    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if let Err(err) = self.model.validate() {
            errors.push(format!("model: {err}"));
        }

        if !(0.0 < self.optimizer.beta1 && self.optimizer.beta1 < 1.0) {
            errors.push("optimizer.beta1 must be in (0, 1)".to_string());
        }
        if !(0.0 < self.optimizer.beta2 && self.optimizer.beta2 < 1.0) {
            errors.push("optimizer.beta2 must be in (0, 1)".to_string());
        }
        if self.optimizer.epsilon <= 0.0 {
            errors.push("optimizer.epsilon must be greater than 0".to_string());
        }
        if self.optimizer.weight_decay < 0.0 {
            errors.push("optimizer.weight_decay must be >= 0".to_string());
        }
        if let Some(max_norm) = self.optimizer.max_grad_norm {
            if max_norm <= 0.0 {
                errors.push("optimizer.max_grad_norm must be greater than 0".to_string());
            }
        }

        match self.scheduler.strategy {
            LearningRateSchedule::InverseSqrtWarmup => {
                if self.scheduler.warmup_steps == 0 {
                    errors.push("scheduler.warmup_steps must be greater than 0".to_string());
                }
            }
            LearningRateSchedule::Constant => match self.scheduler.learning_rate {
                Some(lr) if lr > 0.0 => {}
                Some(_) => {
                    errors.push("scheduler.learning_rate must be greater than 0".to_string())
                }
                None => errors.push(
                    "scheduler.learning_rate is required by the constant strategy".to_string(),
                ),
            },
        }

        if self.runtime.log_every_n_steps == 0 {
            errors.push("runtime.log_every_n_steps must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_beta1")]
    pub beta1: f32,
    #[serde(default = "default_beta2")]
    pub beta2: f32,
    #[serde(default = "default_adam_eps")]
    pub epsilon: f32,
    #[serde(default)]
    pub weight_decay: f32,
    #[serde(default)]
    pub max_grad_norm: Option<f32>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_adam_eps(),
            weight_decay: 0.0,
            max_grad_norm: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub strategy: LearningRateSchedule,
    #[serde(default = "default_warmup_steps")]
    pub warmup_steps: usize,
    /// Only read by [`LearningRateSchedule::Constant`].
    #[serde(default)]
    pub learning_rate: Option<f32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: LearningRateSchedule::default(),
            warmup_steps: default_warmup_steps(),
            learning_rate: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LearningRateSchedule {
    #[default]
    InverseSqrtWarmup,
    Constant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Seeds the device RNG behind weight init and dropout. Backends that
    /// cannot be seeded (the CPU one) only log a warning.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            log_every_n_steps: default_log_every_n_steps(),
        }
    }
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.98
}

fn default_adam_eps() -> f32 {
    1e-9
}

fn default_warmup_steps() -> usize {
    4000
}

fn default_seed() -> u64 {
    42
}

fn default_log_every_n_steps() -> usize {
    100
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ConfigFormat(String),
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("trainer initialization failed: {0}")]
    Initialization(String),
    #[error("training failed: {0}")]
    Runtime(String),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<candle_core::Error> for TrainingError {
    fn from(value: candle_core::Error) -> Self {
        TrainingError::Runtime(value.to_string())
    }
}
