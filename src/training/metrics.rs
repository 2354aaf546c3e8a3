//! Evaluation metrics

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-class precision/recall/F1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Metrics computed on the held-out split
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Evaluation {
    /// Accuracy (classification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Support-weighted precision (classification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    /// Support-weighted recall (classification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    /// Support-weighted F1 (classification)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f1_score: Option<f64>,
    /// Cross-entropy on the test split (networks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2: Option<f64>,
    /// Keyed by class label
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub classification_report: BTreeMap<String, ClassReport>,
    /// Rows are true classes, columns predicted classes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub confusion_matrix: Vec<Vec<usize>>,
    pub n_samples: usize,
}

impl Evaluation {
    /// Classification metrics over integer class labels `0..n_classes`.
    ///
    /// `labels` names each class in the report; classes without a name are
    /// reported by index.
    pub fn classification(
        y_true: &Array1<f64>,
        y_pred: &Array1<f64>,
        n_classes: usize,
        labels: &[String],
    ) -> Self {
        let n = y_true.len();
        let k = n_classes
            .max(max_class(y_true) + 1)
            .max(max_class(y_pred) + 1);

        let mut matrix = vec![vec![0usize; k]; k];
        for (t, p) in y_true.iter().zip(y_pred.iter()) {
            matrix[to_class(*t)][to_class(*p)] += 1;
        }

        let correct: usize = (0..k).map(|i| matrix[i][i]).sum();
        let mut report = BTreeMap::new();
        let (mut w_precision, mut w_recall, mut w_f1) = (0.0, 0.0, 0.0);

        for class in 0..k {
            let tp = matrix[class][class] as f64;
            let support: usize = matrix[class].iter().sum();
            let predicted: usize = (0..k).map(|row| matrix[row][class]).sum();

            let precision = if predicted > 0 { tp / predicted as f64 } else { 0.0 };
            let recall = if support > 0 { tp / support as f64 } else { 0.0 };
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            if n > 0 {
                let weight = support as f64 / n as f64;
                w_precision += weight * precision;
                w_recall += weight * recall;
                w_f1 += weight * f1;
            }

            if support > 0 || predicted > 0 {
                let name = labels
                    .get(class)
                    .cloned()
                    .unwrap_or_else(|| class.to_string());
                report.insert(
                    name,
                    ClassReport {
                        precision,
                        recall,
                        f1_score: f1,
                        support,
                    },
                );
            }
        }

        Self {
            accuracy: Some(if n > 0 { correct as f64 / n as f64 } else { 0.0 }),
            precision: Some(w_precision),
            recall: Some(w_recall),
            f1_score: Some(w_f1),
            classification_report: report,
            confusion_matrix: matrix,
            n_samples: n,
            ..Default::default()
        }
    }

    /// Regression metrics
    pub fn regression(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let n = y_true.len();
        if n == 0 {
            return Self::default();
        }
        let nf = n as f64;
        let errors: Vec<f64> = y_true.iter().zip(y_pred.iter()).map(|(t, p)| t - p).collect();

        let mse = errors.iter().map(|e| e * e).sum::<f64>() / nf;
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / nf;

        let mean = y_true.sum() / nf;
        let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
        let ss_res: f64 = errors.iter().map(|e| e * e).sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        Self {
            mse: Some(mse),
            rmse: Some(mse.sqrt()),
            mae: Some(mae),
            r2: Some(r2),
            n_samples: n,
            ..Default::default()
        }
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = Some(loss);
        self
    }

    /// The headline score used to rank models: accuracy, else R²
    pub fn headline(&self) -> Option<f64> {
        self.accuracy.or(self.r2)
    }
}

fn to_class(v: f64) -> usize {
    if v.is_finite() && v > 0.0 {
        v.round() as usize
    } else {
        0
    }
}

fn max_class(values: &Array1<f64>) -> usize {
    values.iter().map(|v| to_class(*v)).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_classification_metrics() {
        let y_true = array![0.0, 0.0, 1.0, 1.0, 1.0, 2.0];
        let y_pred = array![0.0, 1.0, 1.0, 1.0, 0.0, 2.0];
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let eval = Evaluation::classification(&y_true, &y_pred, 3, &labels);

        assert_relative_eq!(eval.accuracy.unwrap(), 4.0 / 6.0);
        assert_eq!(eval.confusion_matrix, vec![vec![1, 1, 0], vec![1, 2, 0], vec![0, 0, 1]]);
        let b = &eval.classification_report["b"];
        assert_relative_eq!(b.precision, 2.0 / 3.0);
        assert_relative_eq!(b.recall, 2.0 / 3.0);
        assert_eq!(b.support, 3);
        // weighted recall equals accuracy
        assert_relative_eq!(eval.recall.unwrap(), eval.accuracy.unwrap());
    }

    #[test]
    fn test_regression_metrics() {
        let y_true = array![1.0, 2.0, 3.0, 4.0];
        let y_pred = array![1.0, 2.0, 3.0, 6.0];
        let eval = Evaluation::regression(&y_true, &y_pred);
        assert_relative_eq!(eval.mse.unwrap(), 1.0);
        assert_relative_eq!(eval.rmse.unwrap(), 1.0);
        assert_relative_eq!(eval.mae.unwrap(), 0.5);
        assert_relative_eq!(eval.r2.unwrap(), 1.0 - 4.0 / 5.0);
        assert_eq!(eval.headline(), eval.r2);
    }

    #[test]
    fn test_serialization_skips_absent() {
        let eval = Evaluation::regression(&array![1.0, 2.0], &array![1.0, 2.0]);
        let json = serde_json::to_value(&eval).unwrap();
        assert!(json.get("accuracy").is_none());
        assert!(json.get("confusion_matrix").is_none());
        assert_eq!(json["r2"], serde_json::json!(1.0));
    }
}
