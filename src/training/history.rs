//! Training history
//!
//! One record per epoch across all stages, exported as JSON next to the
//! saved model.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// Metrics of a single epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub stage: String,
    /// 1-based epoch within the stage
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
    pub seconds: f64,
}

/// Per-epoch history of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub epochs: Vec<EpochMetrics>,
}

impl Default for TrainingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            epochs: Vec::new(),
        }
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn extend(&mut self, metrics: impl IntoIterator<Item = EpochMetrics>) {
        self.epochs.extend(metrics);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Epoch with the highest validation accuracy (earliest on ties)
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().fold(None, |best: Option<&EpochMetrics>, m| match best {
            Some(b) if b.val_accuracy >= m.val_accuracy => Some(b),
            _ => Some(m),
        })
    }

    /// Epochs of one stage
    pub fn stage(&self, name: &str) -> Vec<&EpochMetrics> {
        self.epochs.iter().filter(|m| m.stage == name).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
