use candle_core::{DType, Tensor, D};
use transducer::PAD_TOKEN_ID;

use crate::TrainingError;

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before the log.
pub const PROBABILITY_EPSILON: f64 = 1e-7;

/// Cross entropy over softmax outputs that ignores padded targets.
///
/// Per-position losses are multiplied by a mask that is zero wherever the
/// target equals the padding id, summed, and divided by the number of
/// unpadded positions. A batch without any unpadded target is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskedCrossEntropy;

impl MaskedCrossEntropy {
    pub fn new() -> Self {
        Self
    }

    /// `probs` is `(batch, seq, vocab)`, `targets` is `(batch, seq)`.
    pub fn compute(&self, probs: &Tensor, targets: &Tensor) -> Result<LossOutput, TrainingError> {
        let (probs_flat, targets_flat) = flatten_pair(probs, targets)?;
        let valid_mask = targets_flat.ne(PAD_TOKEN_ID)?.to_dtype(DType::F32)?;
        let total_tokens = count_valid(&valid_mask)?;

        let clipped = probs_flat.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON)?;
        let nll = clipped
            .gather(&targets_flat.unsqueeze(1)?, 1)?
            .squeeze(1)?
            .log()?
            .neg()?;

        let loss = (nll * &valid_mask)?
            .sum_all()?
            .affine(1.0 / total_tokens as f64, 0.0)?;
        let average_loss = loss.to_vec0::<f32>()?;
        let correct_tokens = count_correct(&probs_flat, &targets_flat, &valid_mask)?;

        Ok(LossOutput {
            loss,
            metrics: LossMetrics {
                average_loss,
                total_tokens,
                correct_tokens,
            },
        })
    }
}

/// Fraction of unpadded positions whose arg-max matches the target.
pub fn masked_accuracy(probs: &Tensor, targets: &Tensor) -> Result<f32, TrainingError> {
    let (probs_flat, targets_flat) = flatten_pair(probs, targets)?;
    let valid_mask = targets_flat.ne(PAD_TOKEN_ID)?.to_dtype(DType::F32)?;
    let total = count_valid(&valid_mask)?;
    let correct = count_correct(&probs_flat, &targets_flat, &valid_mask)?;
    Ok(correct as f32 / total as f32)
}

fn flatten_pair(probs: &Tensor, targets: &Tensor) -> Result<(Tensor, Tensor), TrainingError> {
    let (batch, seq, vocab) = probs.dims3()?;
    if targets.dims() != [batch, seq] {
        return Err(TrainingError::runtime(format!(
            "targets shaped {:?} do not match probabilities {:?}",
            targets.dims(),
            probs.dims()
        )));
    }
    if !targets.dtype().is_int() {
        return Err(TrainingError::runtime(format!(
            "targets must be integer ids, got {:?}",
            targets.dtype()
        )));
    }
    let probs_flat = probs.reshape((batch * seq, vocab))?;
    let targets_flat = targets
        .to_device(probs.device())?
        .reshape(batch * seq)?
        .to_dtype(DType::U32)?;
    Ok((probs_flat, targets_flat))
}

fn count_valid(valid_mask: &Tensor) -> Result<usize, TrainingError> {
    let total = valid_mask.sum_all()?.to_vec0::<f32>()?.round() as usize;
    if total == 0 {
        return Err(TrainingError::runtime(
            "batch has no unpadded target positions",
        ));
    }
    Ok(total)
}

fn count_correct(
    probs_flat: &Tensor,
    targets_flat: &Tensor,
    valid_mask: &Tensor,
) -> Result<usize, TrainingError> {
    let predictions = probs_flat.argmax(D::Minus1)?;
    let correct = predictions.eq(targets_flat)?.to_dtype(DType::F32)?;
    let correct = (correct * valid_mask)?.sum_all()?.to_vec0::<f32>()?;
    Ok(correct.round() as usize)
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Differentiable scalar.
    pub loss: Tensor,
    pub metrics: LossMetrics,
}

#[derive(Debug, Clone)]
pub struct LossMetrics {
    average_loss: f32,
    total_tokens: usize,
    correct_tokens: usize,
}

impl LossMetrics {
    pub fn average_loss(&self) -> f32 {
        self.average_loss
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn correct_tokens(&self) -> usize {
        self.correct_tokens
    }

    pub fn accuracy(&self) -> f32 {
        if self.total_tokens == 0 {
            0.0
        } else {
            self.correct_tokens as f32 / self.total_tokens as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn one_hot_rows(rows: &[(usize, f32)], vocab: usize) -> Vec<f32> {
        let mut data = Vec::with_capacity(rows.len() * vocab);
        for &(hot, mass) in rows {
            let rest = (1.0 - mass) / (vocab - 1) as f32;
            for column in 0..vocab {
                data.push(if column == hot { mass } else { rest });
            }
        }
        data
    }

    #[test]
    fn unpadded_batch_matches_plain_mean() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let probs = Tensor::from_vec(
            one_hot_rows(&[(1, 0.5), (2, 0.4), (3, 0.8), (1, 0.1)], 4),
            (2, 2, 4),
            &device,
        )?;
        let targets = Tensor::from_slice(&[1u32, 2, 3, 1], (2, 2), &device)?;
        let output = MaskedCrossEntropy::new().compute(&probs, &targets)?;

        let expected = -(0.5f32.ln() + 0.4f32.ln() + 0.8f32.ln() + 0.1f32.ln()) / 4.0;
        assert!((output.metrics.average_loss() - expected).abs() < 1e-5);
        assert_eq!(output.metrics.total_tokens(), 4);
        assert_eq!(output.metrics.correct_tokens(), 3);
        Ok(())
    }

    #[test]
    fn padded_positions_do_not_contribute() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let targets = Tensor::from_slice(&[1u32, 2, 0, 0], (1, 4), &device)?;
        let confident = Tensor::from_vec(
            one_hot_rows(&[(1, 0.7), (2, 0.6), (0, 0.9), (0, 0.9)], 3),
            (1, 4, 3),
            &device,
        )?;
        // Same valid rows, padded rows put all mass away from the target.
        let wrong = Tensor::from_vec(
            [
                one_hot_rows(&[(1, 0.7), (2, 0.6)], 3),
                vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            ]
            .concat(),
            (1, 4, 3),
            &device,
        )?;
        let loss = MaskedCrossEntropy::new();
        let a = loss.compute(&confident, &targets)?.metrics.average_loss();
        let b = loss.compute(&wrong, &targets)?.metrics.average_loss();
        assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        assert!(b.is_finite());

        let expected = -(0.7f32.ln() + 0.6f32.ln()) / 2.0;
        assert!((a - expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn zero_probability_is_clipped() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let probs = Tensor::from_slice(&[1f32, 0.0], (1, 1, 2), &device)?;
        let targets = Tensor::from_slice(&[1u32], (1, 1), &device)?;
        let loss = MaskedCrossEntropy::new().compute(&probs, &targets)?;
        let expected = -(PROBABILITY_EPSILON as f32).ln();
        assert!((loss.metrics.average_loss() - expected).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn all_padding_is_rejected() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let probs = Tensor::from_slice(&[0.5f32, 0.5, 0.5, 0.5], (1, 2, 2), &device)?;
        let targets = Tensor::from_slice(&[0u32, 0], (1, 2), &device)?;
        let err = MaskedCrossEntropy::new()
            .compute(&probs, &targets)
            .unwrap_err();
        assert!(matches!(err, TrainingError::Runtime(_)));
        assert!(masked_accuracy(&probs, &targets).is_err());
        Ok(())
    }

    #[test]
    fn accuracy_ignores_padding() -> Result<(), TrainingError> {
        let device = Device::Cpu;
        let probs = Tensor::from_vec(
            one_hot_rows(&[(1, 0.9), (1, 0.9), (2, 0.9), (2, 0.9)], 3),
            (2, 2, 3),
            &device,
        )?;
        let targets = Tensor::from_slice(&[1u32, 2, 2, 0], (2, 2), &device)?;
        let accuracy = masked_accuracy(&probs, &targets)?;
        assert!((accuracy - 2.0 / 3.0).abs() < 1e-6);
        Ok(())
    }
}
