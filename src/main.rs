//! Soybean quality fine-tuning CLI
//!
//! Entry point for two-stage MobileNetV2 transfer learning on the soybean
//! dataset with the Burn framework.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use soybean_finetune::backend::{backend_name, default_device, TrainingBackend};
use soybean_finetune::dataset::{DatasetSplits, SoybeanDataset};
use soybean_finetune::model::layers::LayerPlan;
use soybean_finetune::model::RunConfig;
use soybean_finetune::training::run_training;
use soybean_finetune::utils::logging::{init_logging, LogConfig};
use soybean_finetune::VERSION;

/// Soybean Quality Classification
///
/// Fine-tunes an ImageNet-pretrained MobileNetV2 on a folder-per-class
/// soybean image dataset: first the new head with a frozen backbone, then
/// the last backbone layers at a lower learning rate.
#[derive(Parser, Debug)]
#[command(name = "soybean_finetune")]
#[command(version)]
#[command(about = "Two-stage MobileNetV2 fine-tuning for soybean classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the classifier and save the model
    Train(TrainArgs),

    /// Print dataset statistics and the training/validation split
    Dataset {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "../dataset")]
        data_dir: PathBuf,

        /// Fraction of images held out for validation
        #[arg(long, default_value = "0.2")]
        validation_split: f64,

        /// Random seed of the split
        #[arg(long, default_value = "123")]
        seed: u64,
    },

    /// Print the backbone layer plan with trainable flags
    Layers {
        /// Number of trailing layers to unfreeze
        #[arg(short, long, default_value = "100")]
        unfreeze_last: usize,

        /// Only list layers that carry weights
        #[arg(long, default_value = "false")]
        weights_only: bool,
    },
}

/// Options of the `train` command
///
/// Flags left unset keep the value from `--config`, or the built-in default.
#[derive(Args, Debug)]
struct TrainArgs {
    /// TOML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the dataset directory [default: ../dataset]
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Model output path, without extension [default: model]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// ImageNet weights in safetensors format [default: weights/mobilenet_v2_imagenet.safetensors]
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Skip the ImageNet weights and start from random initialization
    #[arg(long, default_value = "false")]
    from_scratch: bool,

    /// Input image size [default: 224]
    #[arg(long)]
    image_size: Option<u32>,

    /// Batch size [default: 32]
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Fraction of images held out for validation [default: 0.2]
    #[arg(long)]
    validation_split: Option<f64>,

    /// Random seed for the split, shuffling and augmentation [default: 123]
    #[arg(long)]
    seed: Option<u64>,

    /// Epochs with the backbone frozen [default: 30]
    #[arg(long)]
    frozen_epochs: Option<usize>,

    /// Learning rate with the backbone frozen [default: 1e-4]
    #[arg(long)]
    frozen_lr: Option<f64>,

    /// Fine-tuning epochs [default: 15]
    #[arg(long)]
    fine_tune_epochs: Option<usize>,

    /// Fine-tuning learning rate [default: 1e-5]
    #[arg(long)]
    fine_tune_lr: Option<f64>,

    /// Backbone layers unfrozen for fine-tuning [default: 100]
    #[arg(long)]
    unfreeze_last: Option<usize>,

    /// Dropout before the dense layer [default: 0.3]
    #[arg(long)]
    dropout: Option<f64>,

    /// Number of classes [default: 5]
    #[arg(long)]
    num_classes: Option<usize>,

    /// Disable training augmentation
    #[arg(long, default_value = "false")]
    no_augmentation: bool,

    /// Validate and print the configuration without training
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train(args) => cmd_train(args)?,
        Commands::Dataset {
            data_dir,
            validation_split,
            seed,
        } => cmd_dataset(data_dir, validation_split, seed)?,
        Commands::Layers {
            unfreeze_last,
            weights_only,
        } => cmd_layers(unfreeze_last, weights_only),
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════╗
 ║   Soybean Quality Classification                         ║
 ║   MobileNetV2 Transfer Learning with Burn + Rust         ║
 ╚══════════════════════════════════════════════════════════╝
  "#
        .green()
    );
    println!("  v{}\n", VERSION);
}

fn apply_overrides(config: &mut RunConfig, args: &TrainArgs) {
    if let Some(ref data_dir) = args.data_dir {
        config.dataset.data_dir = data_dir.clone();
    }
    if let Some(ref output) = args.output {
        config.output.model_path = output.clone();
    }
    if let Some(ref weights) = args.weights {
        config.model.weights = weights.clone();
    }
    if args.from_scratch {
        config.model.from_scratch = true;
    }
    if let Some(image_size) = args.image_size {
        config.dataset.image_size = image_size;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(split) = args.validation_split {
        config.dataset.validation_split = split;
    }
    if let Some(seed) = args.seed {
        config.dataset.seed = seed;
    }
    if let Some(epochs) = args.frozen_epochs {
        config.training.frozen_epochs = epochs;
    }
    if let Some(lr) = args.frozen_lr {
        config.training.frozen_lr = lr;
    }
    if let Some(epochs) = args.fine_tune_epochs {
        config.training.fine_tune_epochs = epochs;
    }
    if let Some(lr) = args.fine_tune_lr {
        config.training.fine_tune_lr = lr;
    }
    if let Some(n) = args.unfreeze_last {
        config.training.unfreeze_last = n;
    }
    if let Some(dropout) = args.dropout {
        config.model.dropout = dropout;
    }
    if let Some(num_classes) = args.num_classes {
        config.model.num_classes = num_classes;
    }
    if args.no_augmentation {
        config.dataset.augmentation = soybean_finetune::dataset::AugmentationConfig::none();
    }
}

fn print_config_summary(config: &RunConfig) {
    println!("{}", "Run Configuration:".cyan().bold());
    println!("  Backend:         {}", backend_name());
    for line in config.summary() {
        println!("  {}", line);
    }
    println!();
}

/// Config file (or defaults) with the explicit flags applied on top
fn resolve_config(args: &TrainArgs) -> Result<RunConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            info!("Loading configuration from: {}", path.display());
            RunConfig::load(path).context("Failed to load run configuration")?
        }
        None => RunConfig::default(),
    };

    apply_overrides(&mut config, args);
    config.validate().context("Invalid run configuration")?;
    Ok(config)
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    if args.dry_run {
        print_config_summary(&config);
        info!("Configuration validated successfully (dry run)");
        return Ok(());
    }

    print_config_summary(&config);

    let device = default_device();
    let report = run_training::<TrainingBackend>(&config, device).context("Training failed")?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!(
        "  Final validation accuracy: {:.2}%",
        report.metrics.accuracy * 100.0
    );
    println!("  Model:   {}", report.record_path.display());
    println!("  Config:  {}", report.config_path.display());
    println!("  History: {}", report.history_path.display());

    Ok(())
}

fn cmd_dataset(data_dir: PathBuf, validation_split: f64, seed: u64) -> Result<()> {
    println!("{}", "Dataset Statistics".cyan().bold());

    let dataset = SoybeanDataset::new(&data_dir)
        .with_context(|| format!("Failed to load dataset from {}", data_dir.display()))?;
    dataset.get_stats().print();

    let split_config = soybean_finetune::dataset::SplitConfig::new(validation_split, seed)?;
    let splits = DatasetSplits::from_samples(
        dataset.samples.clone(),
        dataset.class_names.clone(),
        split_config,
    )?;

    println!();
    println!("{}", splits.stats());

    Ok(())
}

fn cmd_layers(unfreeze_last: usize, weights_only: bool) {
    let plan = LayerPlan::mobilenet_v2();
    let mask = plan.trainable_mask(unfreeze_last);

    println!(
        "{}",
        format!("MobileNetV2 Layer Plan ({} layers)", plan.len()).cyan().bold()
    );
    println!();

    for (layer, &trainable) in plan.layers().iter().zip(&mask) {
        if weights_only && !layer.kind.has_weights() {
            continue;
        }
        let flag = if trainable {
            "trainable".green()
        } else {
            "frozen".dimmed()
        };
        println!(
            "  {:>3}  {:<28} {:<15} {:<10} {}",
            layer.index,
            layer.name,
            format!("{:?}", layer.kind),
            layer.group.to_string(),
            flag
        );
    }

    let first = plan.first_trainable(unfreeze_last);
    println!();
    println!(
        "  {} of {} layers trainable ({} with weights), first trainable: {}",
        plan.len() - first,
        plan.len(),
        plan.trainable_weight_layers(&mask),
        plan.get(first).map(|l| l.name.as_str()).unwrap_or("none")
    );
}
