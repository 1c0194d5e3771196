//! Model module for the MobileNetV2 transfer-learning classifier
//!
//! This module provides:
//! - The MobileNetV2 backbone with per-layer freezing
//! - ImageNet weight import from safetensors
//! - The classification head and model (de)serialization
//! - Run configuration
//!
//! ## Architecture
//!
//! input [N, 3, 224, 224] -> MobileNetV2 features [N, 1280, 7, 7]
//! -> global average pool -> dropout(0.3) -> dense(5) -> softmax

pub mod batch_norm;
pub mod classifier;
pub mod config;
pub mod layers;
pub mod mobilenet;
pub mod pretrained;

// Re-export main types for convenience
pub use classifier::{SoybeanClassifier, SoybeanClassifierConfig};
pub use config::RunConfig;
pub use layers::LayerPlan;
pub use mobilenet::{MobileNetV2, MobileNetV2Config};
pub use pretrained::PretrainedWeights;

/// Default dropout rate before the dense layer
pub const DEFAULT_DROPOUT: f64 = 0.3;

/// Number of backbone layers trained during fine-tuning
pub const DEFAULT_UNFREEZE_LAST: usize = 100;
