use candle_core::{backprop::GradStore, DType, Tensor, Var};

use crate::{config, TrainingError};

const EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub enum OptimizerConfig {
    AdamW(AdamWConfig),
}

/// Adam with decoupled weight decay; `weight_decay = 0` is plain Adam.
#[derive(Debug, Clone, Copy)]
pub struct AdamWConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
}

impl From<&config::OptimizerConfig> for OptimizerConfig {
    /// The learning rate starts at zero; the schedule sets it every step.
    fn from(value: &config::OptimizerConfig) -> Self {
        OptimizerConfig::AdamW(AdamWConfig {
            learning_rate: 0.0,
            beta1: value.beta1 as f64,
            beta2: value.beta2 as f64,
            epsilon: value.epsilon as f64,
            weight_decay: value.weight_decay as f64,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainerOptimizerOptions {
    pub clip_global_norm: Option<f64>,
    /// Parameter-name fragments exempt from weight decay.
    pub weight_decay_exclude: Vec<String>,
}

impl From<&config::OptimizerConfig> for TrainerOptimizerOptions {
    fn from(value: &config::OptimizerConfig) -> Self {
        Self {
            clip_global_norm: value.max_grad_norm.map(|norm| norm as f64),
            weight_decay_exclude: vec!["bias".to_string(), "norm".to_string()],
        }
    }
}

#[derive(Debug)]
pub struct TrainerOptimizer {
    config: OptimizerConfig,
    params: Vec<ParameterSlot>,
    step: usize,
    clip_global_norm: Option<f64>,
}

#[derive(Debug)]
struct ParameterSlot {
    name: String,
    param: Var,
    first_moment: Tensor,
    second_moment: Tensor,
    apply_weight_decay: bool,
}

impl TrainerOptimizer {
    pub fn new(
        named_parameters: Vec<(String, Var)>,
        config: OptimizerConfig,
        options: TrainerOptimizerOptions,
    ) -> Result<Self, TrainingError> {
        if named_parameters.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }

        let mut params = Vec::with_capacity(named_parameters.len());
        for (name, var) in named_parameters {
            let tensor = var.as_tensor();
            if tensor.dtype() != DType::F32 {
                return Err(TrainingError::initialization(format!(
                    "optimizer expects f32 parameters, '{name}' is {:?}",
                    tensor.dtype()
                )));
            }
            let first_moment = tensor.zeros_like()?;
            let second_moment = tensor.zeros_like()?;
            let apply_weight_decay =
                should_apply_weight_decay(&name, &options.weight_decay_exclude);

            params.push(ParameterSlot {
                name,
                param: var,
                first_moment,
                second_moment,
                apply_weight_decay,
            });
        }

        log::debug!(
            "optimizer tracking {} tensors ({} without weight decay)",
            params.len(),
            params.iter().filter(|slot| !slot.apply_weight_decay).count()
        );

        Ok(Self {
            config,
            params,
            step: 0,
            clip_global_norm: options.clip_global_norm,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        match self.config {
            OptimizerConfig::AdamW(cfg) => cfg.learning_rate,
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match &mut self.config {
            OptimizerConfig::AdamW(cfg) => cfg.learning_rate = lr,
        }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> usize {
        self.step
    }

    /// Consumes the gradients of every tracked parameter and applies one
    /// update. Returns the global gradient norm before clipping.
    pub fn step(&mut self, grads: &mut GradStore) -> Result<f64, TrainingError> {
        let mut processed = Vec::new();

        for (index, slot) in self.params.iter().enumerate() {
            let Some(grad) = grads.remove(slot.param.as_tensor()) else {
                continue;
            };
            let norm = tensor_l2_norm(&grad)?;
            if !norm.is_finite() {
                return Err(TrainingError::runtime(format!(
                    "gradient of '{}' is not finite ({norm})",
                    slot.name
                )));
            }
            processed.push(ProcessedGradient { index, grad, norm });
        }

        if processed.is_empty() {
            return Ok(0.0);
        }

        let total_norm = processed
            .iter()
            .map(|item| item.norm * item.norm)
            .sum::<f64>()
            .sqrt();
        if !total_norm.is_finite() {
            return Err(TrainingError::runtime(format!(
                "gradient norm is not finite ({total_norm})"
            )));
        }

        if let Some(max_norm) = self.clip_global_norm {
            if total_norm > max_norm {
                let scale = max_norm / (total_norm + EPS);
                for item in &mut processed {
                    item.grad = item.grad.affine(scale, 0.0)?;
                }
            }
        }

        self.step += 1;
        match self.config {
            OptimizerConfig::AdamW(cfg) => self.step_adamw(cfg, processed)?,
        }
        Ok(total_norm)
    }

    fn step_adamw(
        &mut self,
        cfg: AdamWConfig,
        processed: Vec<ProcessedGradient>,
    ) -> Result<(), TrainingError> {
        let scale_m = 1.0 / (1.0 - cfg.beta1.powi(self.step as i32)).max(EPS);
        let scale_v = 1.0 / (1.0 - cfg.beta2.powi(self.step as i32)).max(EPS);

        for item in processed {
            let slot = &mut self.params[item.index];

            let new_m = (slot.first_moment.affine(cfg.beta1, 0.0)?
                + item.grad.affine(1.0 - cfg.beta1, 0.0)?)?;
            let new_v = (slot.second_moment.affine(cfg.beta2, 0.0)?
                + item.grad.sqr()?.affine(1.0 - cfg.beta2, 0.0)?)?;

            let m_hat = new_m.affine(scale_m, 0.0)?;
            let denom = new_v.affine(scale_v, 0.0)?.sqrt()?.affine(1.0, cfg.epsilon)?;
            let update = m_hat.div(&denom)?.affine(cfg.learning_rate, 0.0)?;

            let current = slot.param.as_tensor().detach();
            let decayed = if slot.apply_weight_decay && cfg.weight_decay != 0.0 {
                current.affine(1.0 - cfg.learning_rate * cfg.weight_decay, 0.0)?
            } else {
                current
            };
            slot.param.set(&decayed.sub(&update)?)?;

            slot.first_moment = new_m;
            slot.second_moment = new_v;
        }
        Ok(())
    }
}

struct ProcessedGradient {
    index: usize,
    grad: Tensor,
    norm: f64,
}

fn should_apply_weight_decay(name: &str, exclusions: &[String]) -> bool {
    !exclusions
        .iter()
        .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
}

fn tensor_l2_norm(tensor: &Tensor) -> Result<f64, TrainingError> {
    let squared = tensor.sqr()?.sum_all()?.to_vec0::<f32>()?;
    Ok((squared as f64).sqrt())
}
