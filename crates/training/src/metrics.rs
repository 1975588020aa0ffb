use std::fmt;

use crate::loss::LossMetrics;

/// Running weighted mean, reset at epoch boundaries.
#[derive(Debug, Clone, Default)]
pub struct Mean {
    total: f64,
    weight: f64,
}

impl Mean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        self.update_weighted(sample, 1.0)
    }

    pub fn update_weighted(&mut self, sample: f64, weight: f64) -> f64 {
        self.total += sample * weight;
        self.weight += weight;
        self.total / self.weight
    }

    pub fn value(&self) -> Option<f64> {
        if self.weight > 0.0 {
            Some(self.total / self.weight)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default)]
struct StreamMeans {
    loss: Mean,
    accuracy: Mean,
}

/// Total loss plus per-stream loss and accuracy, averaged per batch.
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    prefix: &'static str,
    loss: Mean,
    streams: Vec<StreamMeans>,
}

impl StreamMetrics {
    pub fn training(num_streams: usize) -> Self {
        Self::with_prefix("", num_streams)
    }

    /// Names every value with a `val_` prefix.
    pub fn validation(num_streams: usize) -> Self {
        Self::with_prefix("val_", num_streams)
    }

    fn with_prefix(prefix: &'static str, num_streams: usize) -> Self {
        Self {
            prefix,
            loss: Mean::new(),
            streams: vec![StreamMeans::default(); num_streams],
        }
    }

    pub fn update(&mut self, total_loss: f64, per_stream: &[LossMetrics]) {
        self.loss.update(total_loss);
        for (means, metrics) in self.streams.iter_mut().zip(per_stream) {
            means.loss.update(metrics.average_loss() as f64);
            means.accuracy.update(metrics.accuracy() as f64);
        }
    }

    pub fn reset(&mut self) {
        self.loss.reset();
        self.streams.iter_mut().for_each(|means| {
            means.loss.reset();
            means.accuracy.reset();
        });
    }

    /// Current means; metrics with no samples yet are omitted.
    pub fn snapshot(&self) -> MetricSnapshot {
        let mut values = Vec::with_capacity(1 + 2 * self.streams.len());
        if let Some(loss) = self.loss.value() {
            values.push((format!("{}loss", self.prefix), loss));
        }
        for (index, means) in self.streams.iter().enumerate() {
            if let Some(loss) = means.loss.value() {
                values.push((format!("{}stream{index}_loss", self.prefix), loss));
            }
            if let Some(accuracy) = means.accuracy.value() {
                values.push((format!("{}stream{index}_accuracy", self.prefix), accuracy));
            }
        }
        MetricSnapshot { values }
    }
}

/// Named metric values in a stable order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    values: Vec<(String, f64)>,
}

impl MetricSnapshot {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for MetricSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.values.iter().enumerate() {
            if index > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{key} {value:.4}")?;
        }
        Ok(())
    }
}
