//! Two-stage transfer learning schedule
//!
//! Stage 1 trains only the head on top of a frozen backbone. Stage 2 keeps
//! the learned head, unfreezes the tail of the backbone and continues at a
//! lower learning rate. Every stage starts with a fresh Adam optimizer.

use serde::{Deserialize, Serialize};

use crate::model::config::TrainingSettings;

/// Which backbone layers receive gradient updates during a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackboneMode {
    /// Only the head trains
    Frozen,
    /// The last `n` layers of the backbone layer plan train
    UnfreezeLast(usize),
}

impl std::fmt::Display for BackboneMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneMode::Frozen => write!(f, "backbone frozen"),
            BackboneMode::UnfreezeLast(n) => write!(f, "last {} backbone layers trainable", n),
        }
    }
}

/// One training stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub epochs: usize,
    pub learning_rate: f64,
    pub backbone: BackboneMode,
}

impl StageConfig {
    pub fn new(name: &str, epochs: usize, learning_rate: f64, backbone: BackboneMode) -> Self {
        Self {
            name: name.to_string(),
            epochs,
            learning_rate,
            backbone,
        }
    }
}

/// Ordered list of stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSchedule {
    pub stages: Vec<StageConfig>,
}

impl Default for TrainingSchedule {
    fn default() -> Self {
        Self::from_settings(&TrainingSettings::default())
    }
}

impl TrainingSchedule {
    /// Frozen stage followed by a partial-unfreeze stage
    pub fn from_settings(settings: &TrainingSettings) -> Self {
        Self {
            stages: vec![
                StageConfig::new(
                    "frozen",
                    settings.frozen_epochs,
                    settings.frozen_lr,
                    BackboneMode::Frozen,
                ),
                StageConfig::new(
                    "fine_tune",
                    settings.fine_tune_epochs,
                    settings.fine_tune_lr,
                    BackboneMode::UnfreezeLast(settings.unfreeze_last),
                ),
            ],
        }
    }

    pub fn total_epochs(&self) -> usize {
        self.stages.iter().map(|s| s.epochs).sum()
    }
}
