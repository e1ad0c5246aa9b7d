use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use neural::data::synthetic_blobs;
use neural::{
    CrossEntropyLoss, Dataset, Linear, MeanSquaredErrorLoss, MnistDataset, ReLU, Sequential,
    Softmax, Tensor, TrainConfig, Trainer,
};

#[derive(Parser)]
#[command(name = "neural")]
#[command(about = "Train small feedforward networks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a 784-300-10 ReLU network on MNIST with mean squared error
    Train {
        /// Directory holding the four MNIST IDX files
        #[arg(long)]
        data_dir: PathBuf,

        /// Hidden layer width
        #[arg(long, default_value_t = 300)]
        hidden: usize,

        /// Weights are drawn from U[-init_scale, init_scale]
        #[arg(long, default_value_t = 0.01)]
        init_scale: f32,

        #[command(flatten)]
        training: TrainingArgs,
    },
    /// Train a softmax classifier on synthetic clusters
    Demo {
        #[arg(long, default_value_t = 600)]
        examples: usize,

        #[arg(long, default_value_t = 8)]
        features: usize,

        #[arg(long, default_value_t = 4)]
        classes: usize,

        /// Per-feature jitter around each class center
        #[arg(long, default_value_t = 0.2)]
        noise: f32,

        #[command(flatten)]
        training: TrainingArgs,
    },
}

/// Overrides for [`TrainConfig`]; anything unset keeps its default
#[derive(Args)]
struct TrainingArgs {
    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    /// Learning-rate multiplier applied after each epoch
    #[arg(long)]
    lr_decay: Option<f32>,

    /// Log progress every N examples (0 disables)
    #[arg(long)]
    log_every: Option<usize>,

    /// Evaluate on the test set every N examples (0 disables)
    #[arg(long)]
    eval_every: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,
}

impl TrainingArgs {
    fn apply(&self, mut config: TrainConfig) -> TrainConfig {
        if let Some(epochs) = self.epochs {
            config = config.epochs(epochs);
        }
        if let Some(lr) = self.learning_rate {
            config = config.learning_rate(lr);
        }
        if let Some(decay) = self.lr_decay {
            config = config.lr_decay(decay);
        }
        if let Some(n) = self.log_every {
            config = config.log_every(n);
        }
        if let Some(n) = self.eval_every {
            config = config.eval_every(n);
        }
        if let Some(seed) = self.seed {
            config = config.seed(seed);
        }
        config
    }
}

fn uniform_linear(
    in_features: usize,
    out_features: usize,
    scale: f32,
    rng: &mut StdRng,
) -> Result<Linear> {
    let weight =
        Tensor::random_uniform_with(vec![in_features, out_features], -scale, scale, rng)?;
    Ok(Linear::new(weight)?)
}

fn train_mnist(
    data_dir: PathBuf,
    hidden: usize,
    init_scale: f32,
    config: TrainConfig,
) -> Result<()> {
    let train = MnistDataset::load(&data_dir, true)
        .with_context(|| format!("loading MNIST training set from {}", data_dir.display()))?;
    let test = MnistDataset::load(&data_dir, false)
        .with_context(|| format!("loading MNIST test set from {}", data_dir.display()))?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut model = Sequential::default()
        .push(uniform_linear(train.image_size(), hidden, init_scale, &mut rng)?)
        .push(ReLU)
        .push(uniform_linear(hidden, 10, init_scale, &mut rng)?);
    info!(layers = ?model.layer_names(), ?config, "training on MNIST");

    let history = Trainer::new(config).fit(
        &mut model,
        &MeanSquaredErrorLoss,
        &train,
        Some(&test),
    )?;
    if let Some(last) = history.last() {
        info!(test_accuracy = ?last.test_accuracy, "finished");
    }
    Ok(())
}

fn run_demo(
    examples: usize,
    features: usize,
    classes: usize,
    noise: f32,
    config: TrainConfig,
) -> Result<()> {
    let held_out = (examples / 5).max(classes);
    let (train, test) =
        synthetic_blobs(examples + held_out, features, classes, noise, config.seed)?.split(examples);

    let mut model = Sequential::default()
        .push(Linear::new(Tensor::zeros(vec![features, classes]))?)
        .push(Softmax);
    info!(layers = ?model.layer_names(), examples = train.len(), ?config, "training demo");

    let history = Trainer::new(config).fit(&mut model, &CrossEntropyLoss, &train, Some(&test))?;
    for stats in &history {
        println!(
            "epoch {:>3}  loss {:.4}  train {:>6.2}%  test {:>6.2}%",
            stats.epoch,
            stats.mean_loss,
            stats.train_accuracy,
            stats.test_accuracy.unwrap_or(f32::NAN)
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train {
            data_dir,
            hidden,
            init_scale,
            training,
        } => train_mnist(data_dir, hidden, init_scale, training.apply(TrainConfig::default())),
        Commands::Demo {
            examples,
            features,
            classes,
            noise,
            training,
        } => {
            let defaults = TrainConfig::default()
                .epochs(10)
                .learning_rate(0.1)
                .lr_decay(0.9)
                .log_every(100)
                .eval_every(0)
                .with_env_overrides(|key| std::env::var(key).ok());
            run_demo(examples, features, classes, noise, training.apply(defaults))
        }
    }
}
