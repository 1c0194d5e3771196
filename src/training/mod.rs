//! Training module for two-stage transfer learning
//!
//! This module provides:
//! - The stage schedule (frozen backbone, then partial fine-tuning)
//! - The epoch loop with Burn autodiff and Adam
//! - Per-epoch history
//! - The end-to-end run that produces the saved model
//!
//! ## Approach
//!
//! 1. Load ImageNet weights into the MobileNetV2 backbone
//! 2. Train only the new head with the backbone frozen
//! 3. Unfreeze the last layers of the backbone
//! 4. Continue training everything trainable at a lower learning rate

pub mod history;
pub mod pipeline;
pub mod schedule;
pub mod trainer;

// Re-export main types for convenience
pub use history::{EpochMetrics, TrainingHistory};
pub use pipeline::{run_training, TrainingReport};
pub use schedule::{BackboneMode, StageConfig, TrainingSchedule};
pub use trainer::{Evaluation, Trainer, TrainerConfig};
