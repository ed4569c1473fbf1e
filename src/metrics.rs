//! Scoring collaborator
//!
//! Metrics are opaque post-processing: given the produced scores and the
//! ground truth they return a scalar.

use crate::{Error, Result};

/// A scalar quality metric.
pub trait Metric: Send + Sync {
    /// Column name used in the results table.
    fn name(&self) -> &str;

    /// Score `scores` against `truth`.
    ///
    /// # Errors
    /// Returns [`Error::Metric`] when the inputs are unusable.
    fn score(&self, scores: &[f64], truth: &[f64]) -> Result<f64>;
}

/// Area under the ROC curve (rank statistic, ties averaged).
#[derive(Debug, Clone, Copy, Default)]
pub struct RocAuc;

impl Metric for RocAuc {
    fn name(&self) -> &str {
        "ROC_AUC"
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, scores: &[f64], truth: &[f64]) -> Result<f64> {
        if scores.len() != truth.len() {
            return Err(Error::Metric(format!(
                "score length {} does not match label length {}",
                scores.len(),
                truth.len()
            )));
        }
        if scores.iter().any(|s| s.is_nan()) {
            return Err(Error::Metric("scores contain NaN".to_string()));
        }
        let positives = truth.iter().filter(|&&t| t > 0.5).count();
        let negatives = truth.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(Error::Metric(
                "ROC AUC is undefined when only one class is present".to_string(),
            ));
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

        // 1-based ranks, ties share their average rank
        let mut ranks = vec![0.0; scores.len()];
        let mut i = 0;
        while i < order.len() {
            let mut j = i;
            while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
                j += 1;
            }
            let avg = (i + j) as f64 / 2.0 + 1.0;
            for &idx in &order[i..=j] {
                ranks[idx] = avg;
            }
            i = j + 1;
        }

        let positive_rank_sum: f64 = truth
            .iter()
            .zip(&ranks)
            .filter(|(&t, _)| t > 0.5)
            .map(|(_, &r)| r)
            .sum();
        let p = positives as f64;
        let n = negatives as f64;
        Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
    }
}
