//! Training/validation split
//!
//! All samples are shuffled once with a seeded ChaCha8 generator; the last
//! `floor(n * validation_fraction)` shuffled samples form the validation
//! subset and the rest form the training subset. Two runs with the same seed
//! over the same directory tree select identical subsets.

use std::path::Path;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::loader::ImageSample;
use crate::utils::error::{Result, SoybeanError};

/// Configuration for dataset splitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of all samples held out for validation
    pub validation_fraction: f64,
    /// Seed for the shuffle that precedes the split
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 123,
        }
    }
}

impl SplitConfig {
    /// Create a validated split configuration
    pub fn new(validation_fraction: f64, seed: u64) -> Result<Self> {
        let config = Self {
            validation_fraction,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    /// The validation fraction must lie strictly between 0 and 1
    pub fn validate(&self) -> Result<()> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(SoybeanError::Config(format!(
                "Validation fraction must be between 0.0 and 1.0 (exclusive), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }

    /// Number of validation samples for a dataset of `total` samples
    pub fn validation_count(&self, total: usize) -> usize {
        (total as f64 * self.validation_fraction).floor() as usize
    }
}

/// Training and validation subsets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSplits {
    /// Training subset (augmented during training)
    pub training: Vec<ImageSample>,
    /// Validation subset (never augmented)
    pub validation: Vec<ImageSample>,
    /// Class names indexed by label
    pub class_names: Vec<String>,
    /// Configuration used to create these splits
    pub config: SplitConfig,
}

impl DatasetSplits {
    /// Split samples into training and validation subsets
    pub fn from_samples(
        samples: Vec<ImageSample>,
        class_names: Vec<String>,
        config: SplitConfig,
    ) -> Result<Self> {
        config.validate()?;

        if samples.is_empty() {
            return Err(SoybeanError::Dataset(
                "No images provided for splitting".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut shuffled = samples;
        shuffled.shuffle(&mut rng);

        let num_val = config.validation_count(shuffled.len());
        let validation = shuffled.split_off(shuffled.len() - num_val);

        Ok(Self {
            training: shuffled,
            validation,
            class_names,
            config,
        })
    }

    /// Total number of samples across both subsets
    pub fn total(&self) -> usize {
        self.training.len() + self.validation.len()
    }

    /// Get statistics about the splits
    pub fn stats(&self) -> SplitStats {
        let count = |samples: &[ImageSample]| {
            let mut counts = vec![0usize; self.class_names.len()];
            for s in samples {
                if s.label < counts.len() {
                    counts[s.label] += 1;
                }
            }
            counts
        };

        SplitStats {
            total_images: self.total(),
            training_size: self.training.len(),
            validation_size: self.validation.len(),
            training_per_class: count(&self.training),
            validation_per_class: count(&self.validation),
            class_names: self.class_names.clone(),
        }
    }

    /// Save splits to a JSON file for reproducibility
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Statistics about dataset splits
#[derive(Debug, Clone)]
pub struct SplitStats {
    pub total_images: usize,
    pub training_size: usize,
    pub validation_size: usize,
    pub training_per_class: Vec<usize>,
    pub validation_per_class: Vec<usize>,
    pub class_names: Vec<String>,
}

impl std::fmt::Display for SplitStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pct = |n: usize| 100.0 * n as f64 / self.total_images.max(1) as f64;

        writeln!(f, "Dataset Split Statistics:")?;
        writeln!(f, "  Total images: {}", self.total_images)?;
        writeln!(f, "  Training:   {} ({:.1}%)", self.training_size, pct(self.training_size))?;
        writeln!(f, "  Validation: {} ({:.1}%)", self.validation_size, pct(self.validation_size))?;
        writeln!(f, "  Per class (train / val):")?;
        for (idx, name) in self.class_names.iter().enumerate() {
            writeln!(
                f,
                "    {:28} {:6} / {}",
                name, self.training_per_class[idx], self.validation_per_class[idx]
            )?;
        }
        Ok(())
    }
}
