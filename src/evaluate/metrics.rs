//! Binary classification metrics.

use super::ConfusionMatrix;

/// Area under the ROC curve, via the rank-sum statistic with tied scores
/// sharing their average rank.
///
/// `None` when `labels` hold a single class (the curve is undefined).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    debug_assert_eq!(labels.len(), scores.len());
    let positives = labels.iter().filter(|&&l| l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks start..end (1-based: start+1 ..= end) share their mean
        let average_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| labels[i] == 1).count();
        positive_rank_sum += average_rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// TP / (TP + FP); `0.0` when nothing was predicted positive.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn precision(matrix: &ConfusionMatrix) -> f64 {
    let predicted_positive = matrix.true_positive + matrix.false_positive;
    if predicted_positive == 0 {
        return 0.0;
    }
    matrix.true_positive as f64 / predicted_positive as f64
}

/// TP / (TP + FN); `0.0` when there are no actual positives.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn recall(matrix: &ConfusionMatrix) -> f64 {
    let actual_positive = matrix.true_positive + matrix.false_negative;
    if actual_positive == 0 {
        return 0.0;
    }
    matrix.true_positive as f64 / actual_positive as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_perfect_and_inverted() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(roc_auc(&[1, 1, 0, 0], &[0.1, 0.2, 0.8, 0.9]), Some(0.0));
    }

    #[test]
    fn test_auc_with_ties() {
        // all scores equal: chance level
        assert_eq!(roc_auc(&[0, 1, 0, 1], &[0.5; 4]), Some(0.5));
        // known value: pairs (pos,neg) ordered correctly 3 of 4
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class_undefined() {
        assert_eq!(roc_auc(&[1, 1], &[0.2, 0.9]), None);
        assert_eq!(roc_auc(&[], &[]), None);
    }

    #[test]
    fn test_precision_zero_predicted_positives() {
        let matrix = ConfusionMatrix::from_predictions(&[1, 0, 1], &[0, 0, 0]);
        assert_eq!(precision(&matrix), 0.0);
        assert_eq!(recall(&matrix), 0.0);
    }

    #[test]
    fn test_precision_recall_values() {
        let matrix = ConfusionMatrix::from_predictions(&[1, 1, 0, 0, 1], &[1, 0, 1, 0, 1]);
        assert!((precision(&matrix) - 2.0 / 3.0).abs() < 1e-12);
        assert!((recall(&matrix) - 2.0 / 3.0).abs() < 1e-12);
    }
}
