pub mod config;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use config::{TrainingConfig, TrainingError};
pub use loss::{masked_accuracy, LossMetrics, LossOutput, MaskedCrossEntropy};
pub use metrics::{Mean, MetricSnapshot, StreamMetrics};
pub use optimizer::{OptimizerConfig, TrainerOptimizer, TrainerOptimizerOptions};
pub use scheduler::{InverseSqrtWarmup, LRScheduler, SchedulerConfig};
pub use trainer::Seq2SeqTrainer;
