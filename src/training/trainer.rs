//! Stage Training Loop
//!
//! This module implements the epoch loop using the Burn framework:
//! - Forward/backward passes with automatic differentiation
//! - Cross-entropy loss on the classifier logits
//! - A fresh Adam optimizer per stage
//! - Validation with the non-autodiff model after every epoch

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::burn_dataset::{batch_indices, ImageCache, InputScaling, SoybeanBatch, SoybeanBatcher};
use crate::model::SoybeanClassifier;
use crate::training::history::EpochMetrics;
use crate::training::schedule::{BackboneMode, StageConfig};
use crate::utils::error::{Result, SoybeanError};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{AccuracyTracker, Metrics, RunningAverage};

/// Adam settings shared by all stages
pub const ADAM_BETA_1: f32 = 0.9;
pub const ADAM_BETA_2: f32 = 0.999;
pub const ADAM_EPSILON: f32 = 1e-7;

/// Settings of the batch pipeline
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub batch_size: usize,
    pub seed: u64,
    pub augmentation: AugmentationConfig,
    pub input_scaling: InputScaling,
}

/// Result of one pass over a dataset without gradient updates
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

impl Evaluation {
    pub fn metrics(&self, class_names: &[String]) -> Result<Metrics> {
        let mut metrics = Metrics::from_predictions(&self.predictions, &self.targets, class_names)?;
        metrics.loss = Some(self.loss);
        Ok(metrics)
    }
}

/// Trainer for the SoybeanClassifier
pub struct Trainer<B: AutodiffBackend> {
    /// Model being trained
    pub model: SoybeanClassifier<B>,
    train_data: ImageCache,
    val_data: ImageCache,
    batcher: SoybeanBatcher,
    augmenter: Option<Augmenter>,
    batch_size: usize,
    rng: ChaCha8Rng,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        model: SoybeanClassifier<B>,
        train_data: ImageCache,
        val_data: ImageCache,
        config: &TrainerConfig,
        device: B::Device,
    ) -> Self {
        let augmenter = if config.augmentation.is_identity() {
            None
        } else {
            Some(Augmenter::new(config.augmentation.clone()))
        };

        let batcher = SoybeanBatcher::new(train_data.image_size() as usize, config.input_scaling);

        Self {
            model,
            train_data,
            val_data,
            batcher,
            augmenter,
            batch_size: config.batch_size.max(1),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            device,
        }
    }

    /// Apply the stage's backbone mode and train for `stage.epochs` epochs
    pub fn run_stage(&mut self, stage: &StageConfig) -> Result<Vec<EpochMetrics>> {
        use burn::data::dataset::Dataset;

        if self.train_data.is_empty() {
            return Err(SoybeanError::Training(
                "No training images to train on".to_string(),
            ));
        }
        if self.val_data.is_empty() {
            warn!("Validation set is empty; validation metrics will read 0");
        }

        let model = self.model.clone();
        let mut model = match stage.backbone {
            BackboneMode::Frozen => model.freeze_backbone(),
            BackboneMode::UnfreezeLast(n) => model.unfreeze_backbone_last(n),
        };

        let trainable = model.backbone.trainable_layers().len();
        info!(
            "Stage '{}': {} epochs, lr {:e}, {} ({} backbone weight layers trainable)",
            stage.name, stage.epochs, stage.learning_rate, stage.backbone, trainable
        );

        let mut optimizer = AdamConfig::new()
            .with_beta_1(ADAM_BETA_1)
            .with_beta_2(ADAM_BETA_2)
            .with_epsilon(ADAM_EPSILON)
            .init::<B, SoybeanClassifier<B>>();

        let mut logger = TrainingLogger::new(&stage.name, stage.epochs);
        let mut history = Vec::with_capacity(stage.epochs);
        let mut best_accuracy = 0.0f64;

        for epoch in 0..stage.epochs {
            logger.start_epoch(epoch);

            let (trained, train_loss, train_accuracy) =
                self.train_epoch(model, &mut optimizer, stage.learning_rate)?;
            model = trained;

            let eval = self.evaluate(&model.valid(), &self.val_data)?;
            best_accuracy = best_accuracy.max(eval.accuracy);

            logger.end_epoch(train_loss, train_accuracy, eval.loss, eval.accuracy);
            history.push(EpochMetrics {
                stage: stage.name.clone(),
                epoch: epoch + 1,
                train_loss,
                train_accuracy,
                val_loss: eval.loss,
                val_accuracy: eval.accuracy,
                learning_rate: stage.learning_rate,
                seconds: logger.epoch_seconds(),
            });
        }

        logger.log_complete(best_accuracy);
        self.model = model;
        Ok(history)
    }

    /// One pass over the shuffled, augmented training set
    fn train_epoch<O>(
        &mut self,
        mut model: SoybeanClassifier<B>,
        optimizer: &mut O,
        learning_rate: f64,
    ) -> Result<(SoybeanClassifier<B>, f64, f64)>
    where
        O: Optimizer<SoybeanClassifier<B>, B>,
    {
        use burn::data::dataset::Dataset;

        let batches = batch_indices(self.train_data.len(), self.batch_size, Some(&mut self.rng));
        let num_batches = batches.len();

        let pb = ProgressBar::new(num_batches as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  [{elapsed_precise}] [{bar:30.green/white}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let loss_fn = CrossEntropyLossConfig::new().init(&self.device);
        let mut losses = RunningAverage::new();
        let mut accuracy = AccuracyTracker::new();

        for (batch_idx, indices) in batches.iter().enumerate() {
            let seed: u64 = self.rng.gen();
            let items = self.train_data.items(indices, self.augmenter.as_ref(), seed);
            let batch: SoybeanBatch<B> = self.batcher.batch(items, &self.device);

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                pb.abandon();
                return Err(SoybeanError::Training(format!(
                    "Loss became {} at batch {}",
                    loss_value,
                    batch_idx + 1
                )));
            }
            losses.add(loss_value);

            let correct: i64 = output
                .argmax(1)
                .squeeze::<1>(1)
                .equal(batch.targets.clone())
                .int()
                .sum()
                .into_scalar()
                .elem();
            accuracy.add(correct as usize, batch.targets.dims()[0]);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            pb.inc(1);
            pb.set_message(format!(
                "loss {:.4} acc {:.2}%",
                losses.average(),
                accuracy.accuracy() * 100.0
            ));
            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "  Batch {}/{}: loss = {:.4}, acc = {:.2}%",
                    batch_idx + 1,
                    num_batches,
                    loss_value,
                    accuracy.accuracy() * 100.0
                );
            }
        }
        pb.finish_and_clear();

        Ok((model, losses.average(), accuracy.accuracy()))
    }

    /// Loss, accuracy and predictions of `model` over `data`, in cache order
    pub fn evaluate(
        &self,
        model: &SoybeanClassifier<B::InnerBackend>,
        data: &ImageCache,
    ) -> Result<Evaluation> {
        evaluate_model(model, data, &self.batcher, self.batch_size, &self.device)
    }

    /// Evaluate the current model on the validation set
    pub fn validate(&self) -> Result<Evaluation> {
        self.evaluate(&self.model.valid(), &self.val_data)
    }
}

/// Run `model` over `data` without augmentation
pub fn evaluate_model<B: Backend>(
    model: &SoybeanClassifier<B>,
    data: &ImageCache,
    batcher: &SoybeanBatcher,
    batch_size: usize,
    device: &B::Device,
) -> Result<Evaluation> {
    use burn::data::dataset::Dataset;

    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut losses = RunningAverage::new();
    let mut predictions = Vec::with_capacity(data.len());
    let mut targets = Vec::with_capacity(data.len());

    for indices in batch_indices(data.len(), batch_size, None) {
        let items = data.items(&indices, None, 0);
        targets.extend(items.iter().map(|item| item.label));

        let batch: SoybeanBatch<B> = batcher.batch(items, device);
        let output = model.forward(batch.images);

        let loss_value: f64 = loss_fn
            .forward(output.clone(), batch.targets)
            .into_scalar()
            .elem();
        losses.add(loss_value);

        let predicted = output
            .argmax(1)
            .squeeze::<1>(1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| SoybeanError::Training(format!("Failed to read predictions: {:?}", e)))?;
        predictions.extend(predicted.into_iter().map(|p| p as usize));
    }

    let correct = predictions
        .iter()
        .zip(&targets)
        .filter(|(p, t)| p == t)
        .count();
    let accuracy = if targets.is_empty() {
        0.0
    } else {
        correct as f64 / targets.len() as f64
    };

    Ok(Evaluation {
        loss: losses.average(),
        accuracy,
        predictions,
        targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::burn_dataset::DecodedImage;
    use crate::model::SoybeanClassifierConfig;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    type TestBackend = Autodiff<NdArray>;

    fn cache(n: usize) -> ImageCache {
        let images = (0..n)
            .map(|i| {
                let label = i % 5;
                let shade = (label * 50) as u8;
                DecodedImage {
                    image: RgbImage::from_pixel(32, 32, Rgb([shade, 255 - shade, shade / 2])),
                    label,
                    path: PathBuf::from(format!("{}.png", i)),
                }
            })
            .collect();
        ImageCache::from_images(images, 32)
    }

    fn trainer() -> Trainer<TestBackend> {
        let device = Default::default();
        let names = crate::dataset::CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        let model = SoybeanClassifierConfig::new(names)
            .with_image_size(32)
            .init::<TestBackend>(&device);

        let config = TrainerConfig {
            batch_size: 4,
            seed: 123,
            augmentation: AugmentationConfig::default(),
            input_scaling: InputScaling::Imagenet,
        };
        Trainer::new(model, cache(10), cache(5), &config, device)
    }

    #[test]
    fn test_run_stage_records_each_epoch() {
        let mut trainer = trainer();
        let stage = StageConfig::new("frozen", 2, 1e-3, BackboneMode::Frozen);

        let history = trainer.run_stage(&stage).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].epoch, 1);
        assert_eq!(history[1].stage, "frozen");
        assert!(history.iter().all(|m| m.train_loss.is_finite() && m.val_loss.is_finite()));
        assert!(history.iter().all(|m| (0.0..=1.0).contains(&m.val_accuracy)));
    }

    #[test]
    fn test_stage_applies_backbone_mode() {
        let mut trainer = trainer();
        let stage = StageConfig::new("fine_tune", 1, 1e-4, BackboneMode::UnfreezeLast(100));
        trainer.run_stage(&stage).unwrap();

        let trainable = trainer.model.backbone.trainable_layers();
        assert_eq!(trainable.first().map(String::as_str), Some("block_6_expand"));
    }

    #[test]
    fn test_validate_reports_every_sample() {
        let trainer = trainer();
        let eval = trainer.validate().unwrap();

        assert_eq!(eval.predictions.len(), 5);
        assert_eq!(eval.targets, vec![0, 1, 2, 3, 4]);
        assert!(eval.predictions.iter().all(|&p| p < 5));

        let names: Vec<String> = crate::dataset::CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        let metrics = eval.metrics(&names).unwrap();
        assert_eq!(metrics.total_samples, 5);
        assert!(metrics.loss.is_some());
    }

    #[test]
    fn test_empty_training_set_fails() {
        let device = Default::default();
        let names = crate::dataset::CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        let model = SoybeanClassifierConfig::new(names).init::<TestBackend>(&device);
        let config = TrainerConfig {
            batch_size: 4,
            seed: 1,
            augmentation: AugmentationConfig::none(),
            input_scaling: InputScaling::Symmetric,
        };
        let mut trainer = Trainer::new(model, cache(0), cache(2), &config, device);

        let stage = StageConfig::new("frozen", 1, 1e-4, BackboneMode::Frozen);
        assert!(matches!(trainer.run_stage(&stage), Err(SoybeanError::Training(_))));
    }
}
