use attention::masks::build_padding_mask;
use candle_core::{Device, Tensor};
use layers::{ForwardMode, Parameterized};
use transducer::Transformer;

use crate::{
    config::TrainingConfig,
    loss::{LossMetrics, MaskedCrossEntropy},
    metrics::{MetricSnapshot, StreamMetrics},
    optimizer::{OptimizerConfig, TrainerOptimizer, TrainerOptimizerOptions},
    scheduler::{LRScheduler, SchedulerConfig},
    TrainingError,
};

/// Per-step driver: teacher-forced training, autoregressive evaluation and
/// running metrics. Epoch iteration and data loading stay with the caller.
pub struct Seq2SeqTrainer {
    model: Transformer,
    optimizer: TrainerOptimizer,
    scheduler: Box<dyn LRScheduler>,
    loss: MaskedCrossEntropy,
    train_metrics: StreamMetrics,
    val_metrics: StreamMetrics,
    log_every: usize,
}

impl Seq2SeqTrainer {
    pub fn new(
        model: Transformer,
        optimizer: TrainerOptimizer,
        scheduler: Box<dyn LRScheduler>,
        log_every: usize,
    ) -> Self {
        let streams = model.num_streams();
        Self {
            model,
            optimizer,
            scheduler,
            loss: MaskedCrossEntropy::new(),
            train_metrics: StreamMetrics::training(streams),
            val_metrics: StreamMetrics::validation(streams),
            log_every: log_every.max(1),
        }
    }

    /// Builds the model, optimizer and schedule described by `config`.
    pub fn from_config(config: &TrainingConfig, device: &Device) -> Result<Self, TrainingError> {
        config.validate()?;
        if let Err(err) = device.set_seed(config.runtime.seed) {
            log::warn!("failed to seed device RNG: {err}");
        }
        let model = Transformer::new(config.model.clone(), device).map_err(|err| {
            TrainingError::initialization(format!("failed to build model: {err}"))
        })?;
        let optimizer = TrainerOptimizer::new(
            model.named_parameters(""),
            OptimizerConfig::from(&config.optimizer),
            TrainerOptimizerOptions::from(&config.optimizer),
        )?;
        let scheduler =
            SchedulerConfig::from_training_config(&config.scheduler, config.model.d_model)?
                .build()?;
        Ok(Self::new(
            model,
            optimizer,
            scheduler,
            config.runtime.log_every_n_steps,
        ))
    }

    pub fn model(&self) -> &Transformer {
        &self.model
    }

    /// Optimizer updates applied so far.
    pub fn steps(&self) -> usize {
        self.optimizer.steps()
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// One teacher-forced update on `x` `(batch, src_len)` and one
    /// `(batch, tgt_len)` target per stream.
    ///
    /// The decoder's padding mask comes from the first stream's shifted
    /// input; streams share the source's padding alignment.
    pub fn train_step(&mut self, x: &Tensor, ys: &[Tensor]) -> Result<MetricSnapshot, TrainingError> {
        self.check_streams(ys)?;
        let y_inp = ys
            .iter()
            .map(Transformer::shift_right)
            .collect::<candle_core::Result<Vec<_>>>()?;
        let padding_mask = build_padding_mask(x)?;
        let target_padding_mask = build_padding_mask(&y_inp[0])?;

        let output = self.model.forward(
            x,
            &y_inp,
            ForwardMode::Training,
            Some(&target_padding_mask),
            Some(&padding_mask),
        )?;
        let (total, per_stream) = self.stream_losses(&output.probs, ys)?;
        let total_value = total.to_vec0::<f32>()? as f64;
        if !total_value.is_finite() {
            return Err(TrainingError::runtime(format!(
                "loss became non-finite ({total_value}) at step {}",
                self.steps() + 1
            )));
        }

        let mut grads = total.backward()?;
        let lr = self.scheduler.step();
        self.optimizer.set_learning_rate(lr);
        let grad_norm = self.optimizer.step(&mut grads)?;

        self.train_metrics.update(total_value, &per_stream);
        let snapshot = self.train_metrics.snapshot();
        let step = self.steps();
        log::debug!("step {step} loss {total_value:.4} grad_norm {grad_norm:.4} lr {lr:.3e}");
        if step % self.log_every == 0 {
            log::info!("step {step} | lr {lr:.3e} | {snapshot}");
        }
        Ok(snapshot)
    }

    /// Autoregressive prediction scored against `ys`; parameters are not
    /// touched.
    pub fn evaluate_step(&mut self, x: &Tensor, ys: &[Tensor]) -> Result<MetricSnapshot, TrainingError> {
        self.check_streams(ys)?;
        let probs = self.model.predict_probs(x)?;
        let (total, per_stream) = self.stream_losses(&probs, ys)?;
        let total_value = total.to_vec0::<f32>()? as f64;
        self.val_metrics.update(total_value, &per_stream);
        let snapshot = self.val_metrics.snapshot();
        log::debug!("evaluation {snapshot}");
        Ok(snapshot)
    }

    pub fn predict_probs(&self, x: &Tensor) -> Result<Vec<Tensor>, TrainingError> {
        Ok(self.model.predict_probs(x)?)
    }

    pub fn predict_argmax(&self, x: &Tensor) -> Result<Vec<Tensor>, TrainingError> {
        Ok(self.model.predict_argmax(x)?)
    }

    pub fn train_metrics(&self) -> MetricSnapshot {
        self.train_metrics.snapshot()
    }

    pub fn val_metrics(&self) -> MetricSnapshot {
        self.val_metrics.snapshot()
    }

    /// Clears both running metric sets, typically at an epoch boundary.
    pub fn reset_metrics(&mut self) {
        self.train_metrics.reset();
        self.val_metrics.reset();
    }

    fn check_streams(&self, ys: &[Tensor]) -> Result<(), TrainingError> {
        if ys.len() != self.model.num_streams() {
            return Err(TrainingError::runtime(format!(
                "expected {} target streams, got {}",
                self.model.num_streams(),
                ys.len()
            )));
        }
        Ok(())
    }

    /// Sum of per-stream masked losses, plus each stream's metrics.
    fn stream_losses(
        &self,
        probs: &[Tensor],
        ys: &[Tensor],
    ) -> Result<(Tensor, Vec<LossMetrics>), TrainingError> {
        let mut total: Option<Tensor> = None;
        let mut per_stream = Vec::with_capacity(probs.len());
        for (stream_probs, targets) in probs.iter().zip(ys) {
            let output = self.loss.compute(stream_probs, targets)?;
            total = Some(match total {
                Some(acc) => (acc + output.loss)?,
                None => output.loss,
            });
            per_stream.push(output.metrics);
        }
        let total = total.ok_or_else(|| TrainingError::runtime("model has no output streams"))?;
        Ok((total, per_stream))
    }
}
