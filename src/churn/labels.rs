//! Weak-supervision churn labels derived from a heuristic risk score

use crate::data::{quantile, FeatureTable};

/// Composite-score percentile at or above which a row is labelled churned
pub const LABEL_QUANTILE: f64 = 0.7;
/// Spend percentile under which a row counts as low value
pub const LOW_SPEND_QUANTILE: f64 = 0.3;

/// Labels plus the scores they were cut from
#[derive(Debug, Clone, PartialEq)]
pub struct WeakLabels {
    pub composite: Vec<f64>,
    /// 1 = churned, 0 = retained
    pub labels: Vec<usize>,
    pub threshold: f64,
    /// Rows whose label was flipped to keep the target two-class
    pub forced: usize,
}

impl WeakLabels {
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&label| label == 1).count()
    }
}

/// Heuristic churn risk per row, in [0, 1]
pub fn composite_scores(table: &FeatureTable) -> Vec<f64> {
    let low_spend = quantile(&table.total_spent(), LOW_SPEND_QUANTILE);
    let indicator = |flag: bool| if flag { 1.0 } else { 0.0 };

    table
        .rows
        .iter()
        .map(|row| {
            0.4 * indicator(row.recency > 180)
                + 0.3 * indicator(row.engagement_score < 30.0)
                + 0.2 * indicator(row.frequency == 0)
                + 0.1 * indicator(row.monetary < low_spend)
        })
        .collect()
}

/// Label rows whose composite score reaches its own 70th percentile
///
/// Never returns a single-class target for two or more rows: with no positives the
/// top ~5% by score become positive, with no negatives the bottom ~5% become negative.
pub fn generate_labels(table: &FeatureTable) -> WeakLabels {
    let composite = composite_scores(table);
    let threshold = quantile(&composite, LABEL_QUANTILE);
    let mut labels: Vec<usize> =
        composite.iter().map(|&score| usize::from(score >= threshold)).collect();

    let n_rows = labels.len();
    let n_forced = (n_rows / 20).max(1);
    let positives = labels.iter().sum::<usize>();
    let mut forced = 0;

    if positives == 0 {
        for index in ranked(&composite, true).into_iter().take(n_forced) {
            labels[index] = 1;
            forced += 1;
        }
    } else if positives == n_rows && n_rows > 1 {
        for index in ranked(&composite, false).into_iter().take(n_forced) {
            labels[index] = 0;
            forced += 1;
        }
    }

    WeakLabels { composite, labels, threshold, forced }
}

/// Row indices ordered by score; ties keep input order
fn ranked(scores: &[f64], descending: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    if descending {
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    } else {
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    }
    order
}
