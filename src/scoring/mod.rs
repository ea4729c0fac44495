//! Feature extraction and scoring
//!
//! Converts raw IOC attributes into feature vectors, scores them with a
//! mix of trainable forest models and a non-trainable threat-level
//! heuristic, and manages the drift-safe training loop.

pub mod features;
pub mod forest;
pub mod jobs;
pub mod threat_level;

use features::FeatureVector;

/// Sampling resolution of the recall curve.
pub const SAMPLE_COUNT: usize = 100;

/// A scoring mechanism appending one score column.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Name of the score column this scorer produces.
    fn score_name(&self) -> &'static str;

    fn trainable(&self) -> bool {
        false
    }

    /// Calculate one score per feature vector, in input order.
    fn score(&self, features: &[FeatureVector]) -> anyhow::Result<Vec<f64>>;
}

/// Area under the recall curve for top-k predictions.
///
/// Ranks rows by predicted score and measures what fraction of the total
/// positive mass is recovered within growing top-k windows, up to a
/// quarter of the set, sampled at [`SAMPLE_COUNT`] evenly spaced depths.
/// Returns 0 rather than failing when there are no positives.
pub fn recall_auc(predictions: &[f64], targets: &[f64]) -> f64 {
    let total_positives: f64 = targets.iter().sum();
    if total_positives <= 0.0 || predictions.is_empty() {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..predictions.len()).collect();
    order.sort_by(|&a, &b| {
        predictions[b]
            .partial_cmp(&predictions[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut cumulative = Vec::with_capacity(order.len() + 1);
    cumulative.push(0.0);
    let mut running = 0.0;
    for &index in &order {
        running += targets[index];
        cumulative.push(running);
    }

    // look at the first quarter of predictions
    let max_k = predictions.len() / 4;
    let recalls: Vec<f64> = (0..SAMPLE_COUNT)
        .map(|i| {
            let k = if SAMPLE_COUNT > 1 {
                (i * max_k) / (SAMPLE_COUNT - 1)
            } else {
                max_k
            };
            cumulative[k] / total_positives
        })
        .collect();

    let trapezoid: f64 = recalls
        .windows(2)
        .map(|pair| (pair[0] + pair[1]) / 2.0)
        .sum();
    trapezoid / SAMPLE_COUNT as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_positives_scores_zero() {
        assert_eq!(recall_auc(&[0.9, 0.1, 0.5, 0.2], &[0.0, 0.0, 0.0, 0.0]), 0.0);
        assert_eq!(recall_auc(&[], &[]), 0.0);
    }

    #[test]
    fn perfect_ranking_beats_inverted_ranking() {
        // 100 rows, positives are the first 10
        let targets: Vec<f64> = (0..100).map(|i| if i < 10 { 1.0 } else { 0.0 }).collect();
        let perfect: Vec<f64> = (0..100).map(|i| 1.0 - i as f64 / 100.0).collect();
        let inverted: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let good = recall_auc(&perfect, &targets);
        let bad = recall_auc(&inverted, &targets);
        assert!(good > bad);
        assert!(good > 0.5);
        assert!((0.0..=1.0).contains(&bad));
    }

    #[test]
    fn result_is_bounded() {
        let targets = vec![1.0, 0.0, 3.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let predictions = vec![0.3, 0.1, 0.9, 0.2, 0.4, 0.6, 0.8, 0.05];
        let area = recall_auc(&predictions, &targets);
        assert!((0.0..=1.0).contains(&area));
    }
}
