//! Run Configuration Module
//!
//! Everything a training run needs, grouped the way the TOML file is laid
//! out. Every field has a default, so a config file only needs to name the
//! values it changes:
//!
//! ```toml
//! [dataset]
//! data_dir = "../dataset"
//!
//! [training]
//! frozen_epochs = 10
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::burn_dataset::InputScaling;
use crate::dataset::split::SplitConfig;
use crate::dataset::{DEFAULT_IMAGE_SIZE, NUM_CLASSES};
use crate::model::classifier::SoybeanClassifierConfig;
use crate::model::{DEFAULT_DROPOUT, DEFAULT_UNFREEZE_LAST};
use crate::utils::error::{Result, SoybeanError};

/// Full configuration of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub dataset: DatasetSettings,
    pub model: ModelSettings,
    pub training: TrainingSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// Class-per-directory image tree
    pub data_dir: PathBuf,
    /// Square input size images are resized to
    pub image_size: u32,
    /// Fraction of images held out for validation
    pub validation_split: f64,
    /// Seed for the split shuffle and training batch order
    pub seed: u64,
    /// Training-time augmentation
    pub augmentation: AugmentationConfig,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("../dataset"),
            image_size: DEFAULT_IMAGE_SIZE,
            validation_split: 0.2,
            seed: 123,
            augmentation: AugmentationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub num_classes: usize,
    pub dropout: f64,
    pub bn_epsilon: f64,
    /// ImageNet weights in torchvision safetensors layout
    pub weights: PathBuf,
    /// Skip the ImageNet weights and start from random initialization
    pub from_scratch: bool,
    pub input_scaling: InputScaling,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            num_classes: NUM_CLASSES,
            dropout: DEFAULT_DROPOUT,
            bn_epsilon: 1e-5,
            weights: PathBuf::from("weights/mobilenet_v2_imagenet.safetensors"),
            from_scratch: false,
            input_scaling: InputScaling::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub batch_size: usize,
    /// Epochs with the whole backbone frozen
    pub frozen_epochs: usize,
    pub frozen_lr: f64,
    /// Epochs with the last `unfreeze_last` backbone layers trainable
    pub fine_tune_epochs: usize,
    pub fine_tune_lr: f64,
    pub unfreeze_last: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            batch_size: 32,
            frozen_epochs: 30,
            frozen_lr: 1e-4,
            fine_tune_epochs: 15,
            fine_tune_lr: 1e-5,
            unfreeze_last: DEFAULT_UNFREEZE_LAST,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Artifact path without extension (`model` -> `model.mpk`, `model.json`)
    pub model_path: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model"),
        }
    }
}

impl OutputSettings {
    /// `<model_path>.mpk`
    pub fn record_path(&self) -> PathBuf {
        self.model_path.with_extension("mpk")
    }

    /// `<model_path>.json`
    pub fn config_path(&self) -> PathBuf {
        self.model_path.with_extension("json")
    }

    /// `<model_path>.history.json`
    pub fn history_path(&self) -> PathBuf {
        self.model_path.with_extension("history.json")
    }

    /// `<model_path>.split.json`
    pub fn split_path(&self) -> PathBuf {
        self.model_path.with_extension("split.json")
    }

    /// `<model_path>.toml`, the resolved run configuration
    pub fn run_config_path(&self) -> PathBuf {
        self.model_path.with_extension("toml")
    }
}

impl RunConfig {
    /// Read a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SoybeanError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            SoybeanError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Write the config as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SoybeanError::Config(msg));

        if self.dataset.image_size == 0 {
            return fail("image_size must be greater than 0".to_string());
        }
        if !(self.dataset.validation_split > 0.0 && self.dataset.validation_split < 1.0) {
            return fail(format!(
                "validation_split must be in (0, 1), got {}",
                self.dataset.validation_split
            ));
        }
        if self.model.num_classes == 0 {
            return fail("num_classes must be greater than 0".to_string());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return fail(format!("dropout must be in [0, 1), got {}", self.model.dropout));
        }
        if self.training.batch_size == 0 {
            return fail("batch_size must be greater than 0".to_string());
        }
        for (name, lr) in [
            ("frozen_lr", self.training.frozen_lr),
            ("fine_tune_lr", self.training.fine_tune_lr),
        ] {
            if lr.is_nan() || lr <= 0.0 {
                return fail(format!("{} must be positive, got {}", name, lr));
            }
        }
        let aug = &self.dataset.augmentation;
        if !(0.0..=1.0).contains(&aug.horizontal_flip_prob) {
            return fail("horizontal_flip_prob must be in [0, 1]".to_string());
        }
        if aug.rotation_factor < 0.0 || aug.zoom_factor < 0.0 || aug.contrast_factor < 0.0 {
            return fail("augmentation factors must not be negative".to_string());
        }
        if aug.zoom_factor >= 1.0 || aug.contrast_factor >= 1.0 {
            return fail("zoom_factor and contrast_factor must be below 1".to_string());
        }

        Ok(())
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            validation_fraction: self.dataset.validation_split,
            seed: self.dataset.seed,
        }
    }

    pub fn classifier_config(&self, class_names: Vec<String>) -> SoybeanClassifierConfig {
        SoybeanClassifierConfig::new(class_names)
            .with_num_classes(self.model.num_classes)
            .with_image_size(self.dataset.image_size as usize)
            .with_dropout(self.model.dropout)
            .with_bn_epsilon(self.model.bn_epsilon)
    }

    /// Human-readable summary lines
    pub fn summary(&self) -> Vec<String> {
        let t = &self.training;
        vec![
            format!("Data dir:        {}", self.dataset.data_dir.display()),
            format!("Image size:      {}x{}", self.dataset.image_size, self.dataset.image_size),
            format!(
                "Split:           {:.0}% validation (seed {})",
                self.dataset.validation_split * 100.0,
                self.dataset.seed
            ),
            format!("Batch size:      {}", t.batch_size),
            format!("Classes:         {}", self.model.num_classes),
            format!("Dropout:         {}", self.model.dropout),
            format!("Input scaling:   {}", self.model.input_scaling),
            format!(
                "Weights:         {}",
                if self.model.from_scratch {
                    "none (from scratch)".to_string()
                } else {
                    self.model.weights.display().to_string()
                }
            ),
            format!("Stage 1:         {} epochs, lr {:e}, backbone frozen", t.frozen_epochs, t.frozen_lr),
            format!(
                "Stage 2:         {} epochs, lr {:e}, last {} layers trainable",
                t.fine_tune_epochs, t.fine_tune_lr, t.unfreeze_last
            ),
            format!("Output:          {}", self.output.record_path().display()),
        ]
    }
}
