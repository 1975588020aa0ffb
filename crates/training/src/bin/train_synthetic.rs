use std::path::PathBuf;

use candle_core::{Device, Tensor};
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use training::{
    config::{OptimizerConfig, RuntimeConfig, SchedulerConfig},
    Seq2SeqTrainer, TrainingConfig, TrainingError,
};
use transducer::TransformerConfig;

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("training failed: {err}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the transducer on synthetic aligned streams", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Path to a TOML or JSON training config")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 200, help = "Number of optimizer steps")]
    steps: usize,

    #[arg(long, default_value_t = 16)]
    batch_size: usize,

    #[arg(long, default_value_t = 12, help = "Source (and target) length, padding included")]
    seq_len: usize,

    #[arg(long, help = "Seed for the synthetic data; defaults to runtime.seed")]
    seed: Option<u64>,
}

fn run() -> Result<(), TrainingError> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => TrainingConfig::from_path(path)?,
        None => default_config(),
    };
    check_args(&args, &config)?;

    let device = Device::Cpu;
    let mut trainer = Seq2SeqTrainer::from_config(&config, &device)?;
    trainer.model().warm_up(args.seq_len, args.seq_len)?;

    let seed = args.seed.unwrap_or(config.runtime.seed);
    let mut rng = StdRng::seed_from_u64(seed);
    let task = SyntheticTask::new(&config.model);

    for _ in 0..args.steps {
        let (x, ys) = task.batch(&mut rng, args.batch_size, args.seq_len, &device)?;
        trainer.train_step(&x, &ys)?;
    }
    println!("train  | {}", trainer.train_metrics());

    let (x, ys) = task.batch(&mut rng, args.batch_size, args.seq_len, &device)?;
    let snapshot = trainer.evaluate_step(&x, &ys)?;
    println!("eval   | {snapshot}");

    let decoded = trainer.predict_argmax(&x.narrow(0, 0, 1)?)?;
    println!("source | {:?}", x.get(0)?.to_vec1::<u32>()?);
    for (stream, (predicted, truth)) in decoded.iter().zip(&ys).enumerate() {
        println!("stream {stream} truth     | {:?}", truth.get(0)?.to_vec1::<u32>()?);
        println!("stream {stream} predicted | {:?}", predicted.get(0)?.to_vec1::<u32>()?);
    }
    Ok(())
}

fn check_args(args: &Args, config: &TrainingConfig) -> Result<(), TrainingError> {
    let mut errors = Vec::new();
    if args.batch_size == 0 {
        errors.push("--batch-size must be greater than 0".to_string());
    }
    if args.seq_len < 2 {
        errors.push("--seq-len must be at least 2".to_string());
    }
    let max_len = config
        .model
        .max_position_input
        .min(config.model.max_position_target);
    if args.seq_len > max_len {
        errors.push(format!("--seq-len {} exceeds max positions {max_len}", args.seq_len));
    }
    if config.model.input_vocab_size < 3 {
        errors.push("model.input_vocab_size must be at least 3 for synthetic data".to_string());
    }
    if config.model.output_sizes.iter().any(|&size| size < 2) {
        errors.push("every output size must be at least 2 for synthetic data".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TrainingError::validation(errors))
    }
}

fn default_config() -> TrainingConfig {
    TrainingConfig {
        model: TransformerConfig {
            num_layers: 2,
            d_model: 32,
            num_heads: 4,
            dff: 64,
            input_vocab_size: 24,
            output_sizes: vec![8, 4, 3],
            max_position_input: 32,
            max_position_target: 32,
            dropout_rate: 0.1,
        },
        optimizer: OptimizerConfig {
            max_grad_norm: Some(1.0),
            ..OptimizerConfig::default()
        },
        scheduler: SchedulerConfig {
            warmup_steps: 100,
            ..SchedulerConfig::default()
        },
        runtime: RuntimeConfig {
            log_every_n_steps: 20,
            ..RuntimeConfig::default()
        },
    }
}

/// Each output stream is a fixed per-token function of the source, so the
/// streams are aligned with it and share its trailing padding.
struct SyntheticTask {
    input_vocab: u32,
    output_sizes: Vec<u32>,
}

impl SyntheticTask {
    fn new(model: &TransformerConfig) -> Self {
        Self {
            input_vocab: model.input_vocab_size as u32,
            output_sizes: model.output_sizes.iter().map(|&size| size as u32).collect(),
        }
    }

    fn label(&self, stream: usize, token: u32) -> u32 {
        let vocab = self.output_sizes[stream];
        1 + (token * (stream as u32 + 1) + stream as u32) % (vocab - 1)
    }

    fn batch(
        &self,
        rng: &mut StdRng,
        batch: usize,
        seq_len: usize,
        device: &Device,
    ) -> Result<(Tensor, Vec<Tensor>), TrainingError> {
        let mut source = vec![0u32; batch * seq_len];
        let mut streams = vec![vec![0u32; batch * seq_len]; self.output_sizes.len()];
        for row in 0..batch {
            let length = rng.gen_range(seq_len / 2..=seq_len).max(1);
            for column in 0..length {
                let token = rng.gen_range(2..self.input_vocab);
                let index = row * seq_len + column;
                source[index] = token;
                for (stream, buffer) in streams.iter_mut().enumerate() {
                    buffer[index] = self.label(stream, token);
                }
            }
        }
        let x = Tensor::from_vec(source, (batch, seq_len), device)?;
        let ys = streams
            .into_iter()
            .map(|buffer| Tensor::from_vec(buffer, (batch, seq_len), device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok((x, ys))
    }
}
