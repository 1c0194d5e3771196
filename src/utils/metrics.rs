//! Evaluation metrics: accuracy, per-class precision/recall/F1 and the
//! confusion matrix reported after fine-tuning.

use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, SoybeanError};

/// Metrics for one evaluation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Mean batch loss, when the caller computed one
    pub loss: Option<f64>,

    /// Macro-averaged precision over classes with support
    pub macro_precision: f64,

    /// Macro-averaged recall over classes with support
    pub macro_recall: f64,

    /// Macro-averaged F1-score over classes with support
    pub macro_f1: f64,

    /// Per-class metrics
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Build metrics from predicted and true labels
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        class_names: &[String],
    ) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(SoybeanError::Training(format!(
                "{} predictions for {} labels",
                predictions.len(),
                ground_truth.len()
            )));
        }

        let num_classes = class_names.len();
        let total_samples = predictions.len();
        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let correct_predictions = confusion_matrix.correct();
        let accuracy = confusion_matrix.accuracy();

        let per_class: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| ClassMetrics::from_confusion_matrix(&confusion_matrix, idx).with_name(name))
            .collect();

        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let macro_avg = |f: fn(&ClassMetrics) -> f64| {
            if supported.is_empty() {
                0.0
            } else {
                supported.iter().map(|m| f(m)).sum::<f64>() / supported.len() as f64
            }
        };

        let macro_precision = macro_avg(|m| m.precision);
        let macro_recall = macro_avg(|m| m.recall);
        let macro_f1 = macro_avg(|m| m.f1);

        Ok(Self {
            total_samples,
            correct_predictions,
            accuracy,
            loss: None,
            macro_precision,
            macro_recall,
            macro_f1,
            per_class,
            confusion_matrix,
        })
    }

    /// Render the per-class table followed by the confusion matrix
    pub fn display(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "Accuracy: {:.2}% ({}/{})\n",
            self.accuracy * 100.0,
            self.correct_predictions,
            self.total_samples
        ));
        if let Some(loss) = self.loss {
            output.push_str(&format!("Loss:     {:.4}\n", loss));
        }
        output.push_str(&format!(
            "Macro P/R/F1: {:.3} / {:.3} / {:.3}\n\n",
            self.macro_precision, self.macro_recall, self.macro_f1
        ));

        output.push_str(&format!(
            "  {:<28} {:>9} {:>9} {:>9} {:>8}\n",
            "class", "precision", "recall", "f1", "support"
        ));
        for m in &self.per_class {
            let name = m.class_name.as_deref().unwrap_or("?");
            output.push_str(&format!(
                "  {:<28} {:>9.3} {:>9.3} {:>9.3} {:>8}\n",
                name, m.precision, m.recall, m.f1, m.support
            ));
        }

        let names: Vec<String> = self
            .per_class
            .iter()
            .map(|m| m.class_name.clone().unwrap_or_else(|| m.class_idx.to_string()))
            .collect();
        output.push('\n');
        output.push_str(&self.confusion_matrix.display(&names));

        output
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// TP / (TP + FP)
    pub precision: f64,
    /// TP / (TP + FN)
    pub recall: f64,
    pub f1: f64,
    /// Number of samples whose true label is this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from the confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);
        let false_positives = cm.col_sums()[class_idx].saturating_sub(true_positives);
        let false_negatives = cm.row_sums()[class_idx].saturating_sub(true_positives);
        let support = true_positives + false_negatives;

        let ratio = |num: usize, den: usize| if den > 0 { num as f64 / den as f64 } else { 0.0 };
        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }

    /// Set the class name
    pub fn with_name(mut self, name: &str) -> Self {
        self.class_name = Some(name.to_string());
        self
    }
}

/// Confusion matrix, row = actual, column = predicted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    /// Row-major counts
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create an empty matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create a confusion matrix from predictions and ground truth
    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Add a single prediction; out-of-range labels are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    /// Count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Actual class counts
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Predicted class counts
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Pretty print the matrix with abbreviated class names
    pub fn display(&self, class_names: &[String]) -> String {
        let mut output = String::from("Confusion Matrix (rows=actual, cols=predicted):\n\n");
        let short = |idx: usize, width: usize| -> String {
            class_names
                .get(idx)
                .map(|n| n.chars().take(width).collect())
                .unwrap_or_else(|| idx.to_string())
        };

        output.push_str(&format!("{:>14} ", ""));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>8}", short(col, 7)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>14} ", short(row, 14)));
            for col in 0..self.num_classes {
                let count = self.get(row, col);
                if row == col {
                    output.push_str(&format!("  [{:>4}]", count));
                } else if count > 0 {
                    output.push_str(&format!("   {:>4} ", count));
                } else {
                    output.push_str("      . ");
                }
            }
            output.push('\n');
        }

        output
    }
}

/// Running mean of per-batch values
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }
}

/// Correct/seen counter for training accuracy
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `correct` hits out of `seen` samples
    pub fn add(&mut self, correct: usize, seen: usize) {
        self.correct += correct;
        self.total += seen;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("class_{}", i)).collect()
    }

    #[test]
    fn test_confusion_matrix() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 3);

        assert_eq!(cm.get(0, 0), 3);
        assert_eq!(cm.get(1, 1), 1);
        assert_eq!(cm.get(2, 2), 3);
        assert_eq!(cm.get(2, 1), 1);
        assert_eq!(cm.total(), 10);
        assert_eq!(cm.correct(), 7);
        assert!((cm.accuracy() - 0.7).abs() < 1e-9);
        assert_eq!(cm.row_sums(), vec![3, 3, 4]);
        assert_eq!(cm.col_sums(), vec![4, 2, 4]);
    }

    #[test]
    fn test_metrics_from_predictions() {
        let predictions = vec![0, 1, 2, 0, 1, 2, 0, 0, 2, 2];
        let ground_truth = vec![0, 1, 2, 0, 2, 2, 1, 0, 1, 2];

        let metrics = Metrics::from_predictions(&predictions, &ground_truth, &names(3)).unwrap();

        assert_eq!(metrics.total_samples, 10);
        assert_eq!(metrics.correct_predictions, 7);
        assert!((metrics.accuracy - 0.7).abs() < 1e-9);
        assert_eq!(metrics.per_class.len(), 3);
        assert_eq!(metrics.per_class[2].class_name.as_deref(), Some("class_2"));
    }

    #[test]
    fn test_metrics_length_mismatch() {
        let result = Metrics::from_predictions(&[0, 1], &[0], &names(2));
        assert!(result.is_err());
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert_eq!(class0.support, 3);
        assert!((class0.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((class0.recall - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_class_excluded_from_macro() {
        // class 2 never occurs and is never predicted
        let metrics = Metrics::from_predictions(&[0, 1], &[0, 1], &names(3)).unwrap();
        assert!((metrics.macro_f1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_display_lists_classes() {
        let metrics = Metrics::from_predictions(&[0, 1], &[0, 1], &names(2)).unwrap();
        let text = metrics.display();
        assert!(text.contains("class_0"));
        assert!(text.contains("100.00%"));

        let cm_text = metrics.confusion_matrix.display(&names(2));
        assert!(cm_text.contains("[   1]"));
    }

    #[test]
    fn test_display_includes_confusion_matrix() {
        let metrics = Metrics::from_predictions(&[0, 1, 1], &[0, 0, 1], &names(2)).unwrap();
        let text = metrics.display();

        assert!(text.contains("Confusion Matrix"));
        let rows: Vec<&str> = text
            .lines()
            .skip_while(|l| !l.starts_with("Confusion Matrix"))
            .filter(|l| l.contains('['))
            .collect();
        assert_eq!(rows.len(), 2);
        // actual class_0: one correct, one predicted as class_1
        assert!(rows[0].contains("[   1]") && rows[0].contains("    1 "));
        assert!(rows[1].contains("      . ") && rows[1].contains("[   1]"));
    }

    #[test]
    fn test_running_average_and_tracker() {
        let mut avg = RunningAverage::new();
        avg.add(1.0);
        avg.add(2.0);
        avg.add(3.0);
        assert!((avg.average() - 2.0).abs() < 1e-9);

        let mut tracker = AccuracyTracker::new();
        tracker.add(2, 3);
        tracker.add(1, 1);
        assert!((tracker.accuracy() - 0.75).abs() < 1e-9);
    }
}
