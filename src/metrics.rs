//! Binary classification quality metrics.
//!
//! Accuracy, precision, recall and F1 come from a linfa confusion matrix,
//! ROC-AUC from linfa's ROC curve. Average precision is computed here.

use linfa::prelude::{BinaryClassification as _, ConfusionMatrix, Dataset, Pr, ToConfusionMatrix as _};
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: Option<f64>,
    pub average_precision: Option<f64>,
    pub support: usize,
}

/// Evaluate scores against 0/1 labels at `threshold`.
///
/// Returns `None` when the inputs are empty or of different lengths, or
/// when the labels do not contain both classes.
pub fn evaluate(labels: &[u8], scores: &[f64], threshold: f64) -> Option<QualityMetrics> {
    let counts = ClassCounts::new(labels, scores, threshold)?;

    let truth: Array1<usize> = labels.iter().map(|&y| usize::from(y == 1)).collect();
    let prediction: Array1<usize> = scores.iter().map(|&s| usize::from(s >= threshold)).collect();
    let records = Array1::from(scores.to_vec()).insert_axis(Axis(1));
    let dataset = Dataset::new(records, truth);

    let cm = prediction.confusion_matrix(&dataset).ok()?;
    let accuracy = finite(cm.accuracy());
    let renewed = renewed_split(&cm, &counts, accuracy)?;

    Some(QualityMetrics {
        accuracy,
        precision: finite(renewed.precision()),
        recall: finite(renewed.recall()),
        f1: finite(renewed.f1_score()),
        roc_auc: roc_auc(labels, scores),
        average_precision: average_precision(labels, scores),
        support: labels.len(),
    })
}

/// Area under linfa's ROC curve. `None` unless both classes are present.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    if labels.len() != scores.len() || n_pos == 0 || n_pos == labels.len() {
        return None;
    }

    // linfa's sweep only emits the origin of the curve when the lowest
    // score is above zero. Shifting into [0.5, 1] keeps the ranking.
    let probabilities: Array1<Pr> = scores
        .iter()
        .map(|&s| Pr::new_unchecked((0.5 + s.clamp(0.0, 1.0) / 2.0) as f32))
        .collect();
    let truth: Vec<bool> = labels.iter().map(|&y| y == 1).collect();

    let roc = probabilities.roc(truth.as_slice()).ok()?;
    Some(f64::from(roc.area_under_curve()))
}

/// Step-wise average precision over distinct score thresholds.
#[expect(clippy::indexing_slicing)]
pub fn average_precision(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    if n_pos == 0 || labels.len() != scores.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let (mut tp, mut seen, mut prev_recall, mut ap) = (0usize, 0usize, 0.0, 0.0);
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j < order.len() && scores[order[j]] == scores[order[i]] {
            tp += usize::from(labels[order[j]] == 1);
            seen += 1;
            j += 1;
        }
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
        i = j;
    }
    Some(ap)
}

/// Class totals on both sides of the confusion matrix.
struct ClassCounts {
    renewed: f64,
    lapsed: f64,
    predicted_renewed: f64,
    predicted_lapsed: f64,
}

impl ClassCounts {
    fn new(labels: &[u8], scores: &[f64], threshold: f64) -> Option<Self> {
        if labels.len() != scores.len() {
            return None;
        }
        let renewed = labels.iter().filter(|&&y| y == 1).count();
        if renewed == 0 || renewed == labels.len() {
            return None;
        }
        let predicted_renewed = scores.iter().filter(|&&s| s >= threshold).count();
        Some(Self {
            renewed: renewed as f64,
            lapsed: (labels.len() - renewed) as f64,
            predicted_renewed: predicted_renewed as f64,
            predicted_lapsed: (scores.len() - predicted_renewed) as f64,
        })
    }

    fn total(&self) -> f64 {
        self.renewed + self.lapsed
    }
}

/// Pick the one-vs-all split that belongs to the renewed class.
///
/// linfa collects the classes through a `HashSet`, so their order, and
/// therefore the order of the splits, changes from run to run. Each split
/// implies a true-positive count twice, once through its recall and once
/// through its precision, and the two splits together must reproduce the
/// accuracy. Only the correct assignment satisfies all three unless both
/// splits carry the same scores, in which case either one will do.
fn renewed_split(cm: &ConfusionMatrix<usize>, counts: &ClassCounts, accuracy: f64) -> Option<ConfusionMatrix<bool>> {
    let [first, second]: [ConfusionMatrix<bool>; 2] = cm.split_one_vs_all().try_into().ok()?;

    let residual = |renewed: &ConfusionMatrix<bool>, lapsed: &ConfusionMatrix<bool>| {
        let tp = finite(renewed.recall()) * counts.renewed;
        let tn = finite(lapsed.recall()) * counts.lapsed;
        (tp - finite(renewed.precision()) * counts.predicted_renewed).abs()
            + (tn - finite(lapsed.precision()) * counts.predicted_lapsed).abs()
            + (tp + tn - accuracy * counts.total()).abs()
    };

    Some(if residual(&first, &second) <= residual(&second, &first) {
        first
    } else {
        second
    })
}

/// linfa reports 0/0 ratios as NaN.
fn finite(value: f32) -> f64 {
    if value.is_finite() { f64::from(value) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_perfect_ranking() {
        let m = evaluate(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9], 0.5).expect("both classes");
        assert!(close(m.accuracy, 1.0));
        assert!(close(m.f1, 1.0));
        assert!(m.roc_auc.is_some_and(|auc| close(auc, 1.0)));
        assert_eq!(m.average_precision, Some(1.0));
        assert_eq!(m.support, 4);
    }

    #[test]
    fn test_auc_with_ties() {
        // One positive tied with one negative: half credit for that pair.
        let auc = roc_auc(&[0, 1, 0, 1], &[0.1, 0.5, 0.5, 0.9]).expect("both classes");
        assert!(close(auc, 0.875), "auc was {auc}");
    }

    #[test]
    fn test_auc_with_zero_scores() {
        // Hard 0/1 outputs tied across both classes carry no ranking.
        let auc = roc_auc(&[0, 1, 0, 1], &[0.0, 0.0, 1.0, 1.0]).expect("both classes");
        assert!(close(auc, 0.5), "auc was {auc}");
    }

    #[test]
    fn test_precision_and_recall_follow_the_renewed_class() {
        // Renewed: one hit, one miss. Lapsed: two hits, one false renewal.
        let labels = [1, 1, 0, 0, 0];
        let scores = [0.9, 0.2, 0.8, 0.1, 0.3];
        // Class order inside the confusion matrix varies between calls.
        for _ in 0..20 {
            let m = evaluate(&labels, &scores, 0.5).expect("both classes");
            assert!(close(m.accuracy, 0.6), "accuracy was {}", m.accuracy);
            assert!(close(m.precision, 0.5), "precision was {}", m.precision);
            assert!(close(m.recall, 0.5), "recall was {}", m.recall);
            assert!(close(m.f1, 0.5), "f1 was {}", m.f1);
        }
    }

    #[test]
    fn test_no_predicted_renewals() {
        for _ in 0..20 {
            let m = evaluate(&[1, 0, 0], &[0.2, 0.1, 0.3], 0.5).expect("both classes");
            assert!(close(m.accuracy, 2.0 / 3.0));
            assert!(close(m.precision, 0.0));
            assert!(close(m.recall, 0.0));
            assert!(close(m.f1, 0.0));
        }
    }

    #[test]
    fn test_single_class_has_no_metrics() {
        assert!(evaluate(&[1, 1], &[0.4, 0.9], 0.5).is_none());
        assert_eq!(roc_auc(&[1, 1], &[0.4, 0.9]), None);
        assert!(evaluate(&[], &[], 0.5).is_none());
        assert!(evaluate(&[0, 1], &[0.5], 0.5).is_none());
    }
}
