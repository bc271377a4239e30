//! Churn classifier backends behind one probabilistic interface

use ndarray::{s, Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::bagging::{BaggedTrees, BaggingParams};
use super::boosting::{BoostingParams, GradientBoostedTrees};
use crate::config::ClassifierBackend;

/// A fitted binary classifier producing churn probabilities
pub trait ProbabilisticClassifier {
    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64>;
}

impl ProbabilisticClassifier for GradientBoostedTrees {
    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        GradientBoostedTrees::predict_proba(self, x)
    }
}

impl ProbabilisticClassifier for BaggedTrees {
    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        BaggedTrees::predict_proba(self, x)
    }
}

/// Fitted churn model as stored in the model cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", content = "model", rename_all = "kebab-case")]
pub enum ChurnModel {
    GradientBoosting(GradientBoostedTrees),
    BaggedTrees(BaggedTrees),
}

#[derive(Debug, Clone, Default)]
pub struct TrainingParams {
    pub boosting: BoostingParams,
    pub bagging: BaggingParams,
}

impl ChurnModel {
    pub fn train(
        backend: ClassifierBackend,
        x: ArrayView2<f64>,
        y: &[usize],
        params: &TrainingParams,
    ) -> crate::Result<Self> {
        match backend {
            ClassifierBackend::GradientBoosting => {
                GradientBoostedTrees::fit(x, y, &params.boosting).map(Self::GradientBoosting)
            }
            ClassifierBackend::BaggedTrees => {
                BaggedTrees::fit(x, y, &params.bagging).map(Self::BaggedTrees)
            }
        }
    }

    pub fn backend(&self) -> ClassifierBackend {
        match self {
            Self::GradientBoosting(_) => ClassifierBackend::GradientBoosting,
            Self::BaggedTrees(_) => ClassifierBackend::BaggedTrees,
        }
    }
}

impl ProbabilisticClassifier for ChurnModel {
    fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let proba = match self {
            Self::GradientBoosting(model) => model.predict_proba(x),
            Self::BaggedTrees(model) => model.predict_proba(x),
        };
        proba.mapv(|p| p.clamp(0.0, 1.0))
    }
}

/// Score `x` in row batches of `batch_size`
///
/// Each batch is scored independently, so the result equals a single-shot call. A
/// batch whose output length does not match its row count is replaced by zeros.
pub fn predict_batched<C: ProbabilisticClassifier + ?Sized>(
    model: &C,
    x: &Array2<f64>,
    batch_size: usize,
) -> Array1<f64> {
    let n_rows = x.nrows();
    let batch_size = batch_size.max(1);
    let mut probabilities = Array1::zeros(n_rows);

    for start in (0..n_rows).step_by(batch_size) {
        let end = (start + batch_size).min(n_rows);
        let batch = model.predict_proba(x.slice(s![start..end, ..]));
        if batch.len() == end - start {
            probabilities.slice_mut(s![start..end]).assign(&batch);
        } else {
            warn!(
                start,
                end,
                returned = batch.len(),
                "unexpected prediction shape, scoring batch as zero"
            );
        }
    }
    probabilities
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RowSum;

    impl ProbabilisticClassifier for RowSum {
        fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
            x.outer_iter().map(|row| row.sum() / 100.0).collect()
        }
    }

    struct Broken;

    impl ProbabilisticClassifier for Broken {
        fn predict_proba(&self, _x: ArrayView2<f64>) -> Array1<f64> {
            Array1::ones(1)
        }
    }

    fn matrix(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 3), |(i, j)| ((i * 7 + j * 3) % 11) as f64)
    }

    #[test]
    fn test_batches_cover_every_row() {
        let x = matrix(23);
        let batched = predict_batched(&RowSum, &x, 5);
        let single = predict_batched(&RowSum, &x, 1000);
        assert_eq!(batched, single);
    }

    #[test]
    fn test_wrong_shape_yields_zeros() {
        let x = matrix(4);
        let proba = predict_batched(&Broken, &x, 2);
        assert_eq!(proba.to_vec(), vec![0.0; 4]);
    }

    #[test]
    fn test_boosted_batching_matches_single_shot() {
        let x = matrix(60);
        let y: Vec<usize> = (0..60).map(|i| usize::from(x[[i, 0]] > 5.0)).collect();
        let model = ChurnModel::train(
            ClassifierBackend::GradientBoosting,
            x.view(),
            &y,
            &TrainingParams::default(),
        )
        .unwrap();
        assert_eq!(model.backend(), ClassifierBackend::GradientBoosting);

        let single = predict_batched(&model, &x, 60);
        for batch_size in [1, 7, 59] {
            assert_eq!(predict_batched(&model, &x, batch_size), single);
        }
    }

    #[test]
    fn test_model_serde_roundtrip_keeps_predictions() {
        let x = matrix(30);
        let y: Vec<usize> = (0..30).map(|i| usize::from(i % 3 == 0)).collect();
        let model = ChurnModel::train(
            ClassifierBackend::GradientBoosting,
            x.view(),
            &y,
            &TrainingParams::default(),
        )
        .unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: ChurnModel = serde_json::from_str(&json).unwrap();
        let before = model.predict_proba(x.view());
        let after = restored.predict_proba(x.view());
        assert!(before.iter().zip(after.iter()).all(|(a, b)| (a - b).abs() < 1e-9));
    }
}
