//! End-to-end training run
//!
//! load dataset -> split -> decode -> build model -> import weights
//! -> frozen stage -> fine-tune stage -> report -> save

use std::path::PathBuf;

use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::{info, warn};

use crate::dataset::burn_dataset::ImageCache;
use crate::dataset::{class_index, DatasetSplits, SoybeanDataset};
use crate::model::{PretrainedWeights, RunConfig};
use crate::training::history::TrainingHistory;
use crate::training::schedule::TrainingSchedule;
use crate::training::trainer::{Trainer, TrainerConfig};
use crate::utils::error::{Result, SoybeanError};
use crate::utils::metrics::Metrics;
use crate::utils::{format_duration, format_number};

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub history: TrainingHistory,
    /// Validation metrics of the final model
    pub metrics: Metrics,
    /// Number of backbone tensors imported, `None` when trained from scratch
    pub pretrained_tensors: Option<usize>,
    pub record_path: PathBuf,
    pub config_path: PathBuf,
    pub history_path: PathBuf,
    pub split_path: PathBuf,
    pub run_config_path: PathBuf,
}

/// Run both training stages and save the model
pub fn run_training<B: AutodiffBackend>(config: &RunConfig, device: B::Device) -> Result<TrainingReport> {
    config.validate()?;
    let start = std::time::Instant::now();

    println!("{}", "Initializing Training...".green().bold());
    println!("  Device: {:?}", device);

    if let Some(parent) = config.output.model_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Dataset
    println!("{}", "Loading Dataset...".cyan());
    let dataset = SoybeanDataset::new(&config.dataset.data_dir)?;
    if dataset.num_classes() != config.model.num_classes {
        return Err(SoybeanError::Dataset(format!(
            "Found {} class directories in {}, expected {}",
            dataset.num_classes(),
            config.dataset.data_dir.display(),
            config.model.num_classes
        )));
    }
    for name in &dataset.class_names {
        if class_index(name).is_none() {
            warn!("Unexpected class directory '{}'; labels follow directory order", name);
        }
    }
    dataset.get_stats().print();

    let splits = DatasetSplits::from_samples(
        dataset.samples.clone(),
        dataset.class_names.clone(),
        config.split_config(),
    )?;
    println!();
    println!("{}", splits.stats());

    println!("{}", "Pre-loading Training Data...".cyan().bold());
    let train_data = ImageCache::new_cached(&splits.training, config.dataset.image_size, "training")?;
    println!("{}", "Pre-loading Validation Data...".cyan().bold());
    let val_data = ImageCache::new_cached(&splits.validation, config.dataset.image_size, "validation")?;

    // Model
    println!();
    println!("{}", "Creating Model...".cyan());
    let classifier_config = config.classifier_config(splits.class_names.clone());
    let mut model = classifier_config.init::<B>(&device);

    let pretrained_tensors = if config.model.from_scratch {
        println!("  Backbone initialized randomly (--from-scratch)");
        None
    } else {
        let weights = PretrainedWeights::from_safetensors(&config.model.weights)?;
        let loaded = model.load_pretrained(&weights, &device)?;
        println!(
            "  Loaded {} ImageNet tensors from {}",
            loaded,
            config.model.weights.display()
        );
        Some(loaded)
    };

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    for line in config.summary() {
        println!("  {}", line);
    }
    println!();

    let trainer_config = TrainerConfig {
        batch_size: config.training.batch_size,
        seed: config.dataset.seed,
        augmentation: config.dataset.augmentation.clone(),
        input_scaling: config.model.input_scaling,
    };
    let mut trainer = Trainer::new(model, train_data, val_data, &trainer_config, device);

    // Stages
    let schedule = TrainingSchedule::from_settings(&config.training);
    let mut history = TrainingHistory::new();

    println!(
        "{} ({} epochs in {} stages)",
        "Starting Training...".green().bold(),
        schedule.total_epochs(),
        schedule.stages.len()
    );
    for (i, stage) in schedule.stages.iter().enumerate() {
        println!();
        println!(
            "{}",
            format!("Stage {}/{}: {} ({})", i + 1, schedule.stages.len(), stage.name, stage.backbone)
                .yellow()
                .bold()
        );
        if stage.epochs == 0 {
            info!("Skipping stage '{}' with 0 epochs", stage.name);
            continue;
        }
        history.extend(trainer.run_stage(stage)?);
    }
    history.finish();

    // Final report
    let evaluation = trainer.validate()?;
    let metrics = evaluation.metrics(&splits.class_names)?;
    println!();
    println!("{}", "Validation Report".cyan().bold());
    println!("{}", metrics.display());
    for stage in &schedule.stages {
        if let Some(last) = history.stage(&stage.name).last() {
            println!(
                "  {}: {} epochs, final validation accuracy {:.2}%",
                stage.name,
                last.epoch,
                last.val_accuracy * 100.0
            );
        }
    }
    if let Some(best) = history.best() {
        println!(
            "  Best epoch: {} #{} with {:.2}% validation accuracy",
            best.stage,
            best.epoch,
            best.val_accuracy * 100.0
        );
    }

    // Artifacts
    let record_path = config.output.record_path();
    let config_path = config.output.config_path();
    let history_path = config.output.history_path();
    let split_path = config.output.split_path();
    let run_config_path = config.output.run_config_path();

    trainer.model.save(&config.output.model_path)?;
    classifier_config
        .save(&config_path)
        .map_err(|e| SoybeanError::Serialization(format!("Failed to save model config: {}", e)))?;
    history.save(&history_path)?;
    splits.save(&split_path)?;
    config.save(&run_config_path)?;
    info!("Configuration saved to {}", run_config_path.display());

    info!("Saved model to {}", record_path.display());
    println!();
    println!(
        "{} {} ({} training images, {})",
        "Saved model to".green().bold(),
        record_path.display(),
        format_number(splits.training.len()),
        format_duration(start.elapsed().as_secs_f64())
    );

    Ok(TrainingReport {
        history,
        metrics,
        pretrained_tensors,
        record_path,
        config_path,
        history_path,
        split_path,
        run_config_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SoybeanClassifierConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type TestBackend = Autodiff<NdArray>;

    fn write_dataset(root: &Path, classes: &[&str], per_class: usize) {
        for (c, class) in classes.iter().enumerate() {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let shade = (c * 40 + i * 5) as u8;
                RgbImage::from_pixel(40, 30, Rgb([shade, 100, 255 - shade]))
                    .save(dir.join(format!("{}.png", i)))
                    .unwrap();
            }
        }
    }

    fn tiny_config(data_dir: &Path, output: &Path) -> RunConfig {
        let mut config = RunConfig::default();
        config.dataset.data_dir = data_dir.to_path_buf();
        config.dataset.image_size = 32;
        config.model.from_scratch = true;
        config.training.batch_size = 4;
        config.training.frozen_epochs = 1;
        config.training.fine_tune_epochs = 1;
        config.output.model_path = output.join("model");
        config
    }

    #[test]
    fn test_run_training_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("dataset");
        write_dataset(&data_dir, &crate::dataset::CLASS_NAMES, 3);

        let config = tiny_config(&data_dir, &dir.path().join("out"));
        let report = run_training::<TestBackend>(&config, Default::default()).unwrap();

        assert_eq!(report.history.epochs.len(), 2);
        assert_eq!(report.history.epochs[0].stage, "frozen");
        assert_eq!(report.history.epochs[1].stage, "fine_tune");
        assert!(report.pretrained_tensors.is_none());
        // 15 images, 20% validation
        assert_eq!(report.metrics.total_samples, 3);

        assert!(report.record_path.exists());
        assert!(report.history_path.exists());
        let saved = SoybeanClassifierConfig::load(&report.config_path).unwrap();
        assert_eq!(saved.num_classes, 5);
        assert_eq!(saved.image_size, 32);
        assert_eq!(saved.class_names[0], "Broken soybeans");

        let history = TrainingHistory::load(&report.history_path).unwrap();
        assert_eq!(history.epochs, report.history.epochs);

        let splits: DatasetSplits =
            serde_json::from_str(&std::fs::read_to_string(&report.split_path).unwrap()).unwrap();
        assert_eq!(splits.training.len(), 12);
        assert_eq!(splits.validation.len(), 3);
        assert_eq!(RunConfig::load(&report.run_config_path).unwrap(), config);
    }

    #[test]
    fn test_class_count_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("dataset");
        write_dataset(&data_dir, &["a", "b", "c"], 2);

        let config = tiny_config(&data_dir, &dir.path().join("out"));
        let err = run_training::<TestBackend>(&config, Default::default()).unwrap_err();
        assert!(matches!(err, SoybeanError::Dataset(_)));
    }

    #[test]
    fn test_missing_weights_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("dataset");
        write_dataset(&data_dir, &crate::dataset::CLASS_NAMES, 2);

        let mut config = tiny_config(&data_dir, &dir.path().join("out"));
        config.model.from_scratch = false;
        config.model.weights = dir.path().join("missing.safetensors");

        let err = run_training::<TestBackend>(&config, Default::default()).unwrap_err();
        assert!(matches!(err, SoybeanError::PathNotFound(_)));
    }
}
