//! Bootstrap ensemble of linfa decision trees with class-balanced weights

use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaggingParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub seed: u64,
    /// Worker threads, 0 means the rayon default
    pub n_threads: usize,
}

impl Default for BaggingParams {
    fn default() -> Self {
        Self { n_estimators: 100, max_depth: 12, seed: 42, n_threads: 0 }
    }
}

/// Probability is the share of trees voting for churn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaggedTrees {
    trees: Vec<DecisionTree<f64, usize>>,
}

/// Inverse-frequency weight per row so both classes carry equal total weight
pub fn balanced_weights(y: &[usize]) -> Array1<f32> {
    let n_rows = y.len() as f64;
    let positives = y.iter().filter(|&&label| label == 1).count() as f64;
    let negatives = n_rows - positives;
    let n_classes = f64::from(u8::from(positives > 0.0) + u8::from(negatives > 0.0));

    y.iter()
        .map(|&label| {
            let class_count = if label == 1 { positives } else { negatives };
            (n_rows / (n_classes * class_count)) as f32
        })
        .collect()
}

impl BaggedTrees {
    pub fn fit(x: ArrayView2<f64>, y: &[usize], params: &BaggingParams) -> crate::Result<Self> {
        let n_rows = x.nrows();
        if n_rows == 0 || n_rows != y.len() {
            return Err(InsightError::computation(format!(
                "training set has {n_rows} rows but {} labels",
                y.len()
            )));
        }
        if y.iter().all(|&label| label == y[0]) {
            return Err(InsightError::computation(
                "training target has a single class",
            ));
        }
        let weights = balanced_weights(y);

        let fit_one = |estimator: usize| -> crate::Result<DecisionTree<f64, usize>> {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(estimator as u64));
            let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
            let records = x.select(Axis(0), &rows);
            let targets: Array1<usize> = rows.iter().map(|&i| y[i]).collect();
            let sample_weights: Array1<f32> = rows.iter().map(|&i| weights[i]).collect();
            let dataset = Dataset::new(records, targets).with_weights(sample_weights);

            DecisionTree::params()
                .max_depth(Some(params.max_depth))
                .fit(&dataset)
                .map_err(|err| InsightError::computation(format!("decision tree fit failed: {err}")))
        };

        let fit_all = || -> crate::Result<Vec<DecisionTree<f64, usize>>> {
            (0..params.n_estimators.max(1)).into_par_iter().map(fit_one).collect()
        };

        let trees = if params.n_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(params.n_threads)
                .build()
                .map_err(|err| InsightError::computation(format!("thread pool: {err}")))?;
            pool.install(fit_all)?
        } else {
            fit_all()?
        };

        Ok(Self { trees })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Churn probability per row
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let mut votes = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            let predicted: Array1<usize> = tree.predict(&x);
            votes.zip_mut_with(&predicted, |vote, &label| {
                if label == 1 {
                    *vote += 1.0;
                }
            });
        }
        votes / self.trees.len().max(1) as f64
    }
}
