//! # Soybean Fine-Tune
//!
//! Soybean quality classification by transfer learning with the Burn framework.
//!
//! A MobileNetV2 backbone pretrained on ImageNet is topped with a small
//! classification head and trained in two stages: first with the backbone
//! frozen, then with its last layers unfrozen at a lower learning rate.
//!
//! ## Modules
//!
//! - `dataset`: Folder-per-class loading, the seeded split, augmentation and batching
//! - `model`: MobileNetV2 backbone, layer plan, weight import and the classifier
//! - `training`: Stage schedule, epoch loop, history and the full run
//! - `utils`: Logging, metrics, errors and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use soybean_finetune::backend::{default_device, TrainingBackend};
//! use soybean_finetune::model::RunConfig;
//! use soybean_finetune::training::run_training;
//!
//! let config = RunConfig::default();
//! let report = run_training::<TrainingBackend>(&config, default_device())?;
//! println!("{}", report.metrics.display());
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::loader::SoybeanDataset;
pub use dataset::split::{DatasetSplits, SplitConfig};
pub use dataset::{ImageCache, SoybeanBatch, SoybeanBatcher, SoybeanItem};
pub use model::classifier::{SoybeanClassifier, SoybeanClassifierConfig};
pub use model::config::RunConfig;
pub use model::layers::LayerPlan;
pub use training::pipeline::{run_training, TrainingReport};
pub use training::trainer::Trainer;
pub use utils::error::{Result, SoybeanError};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
