//! Logistic gradient boosting over histogram-binned regression trees

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InsightError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum hessian mass on each side of a split
    pub min_child_weight: f64,
    /// L2 regularization on leaf values
    pub lambda: f64,
    pub max_bins: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 200,
            learning_rate: 0.1,
            max_depth: 3,
            min_child_weight: 1.0,
            lambda: 1.0,
            max_bins: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf { value: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf { value } => return value,
                Node::Split { feature, threshold, left, right } => {
                    index = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

/// Per-feature cut points; a value's bin is the number of cuts strictly below it
#[derive(Debug, Clone)]
struct FeatureBins {
    cuts: Vec<Vec<f64>>,
}

impl FeatureBins {
    fn fit(x: ArrayView2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, usize::from(u16::MAX));
        let cuts = x
            .columns()
            .into_iter()
            .map(|column| {
                let mut values = column.to_vec();
                values.sort_by(f64::total_cmp);
                values.dedup();
                if values.len() <= max_bins {
                    values.pop();
                    values
                } else {
                    (1..max_bins).map(|i| values[i * values.len() / max_bins]).collect()
                }
            })
            .collect();
        Self { cuts }
    }

    fn bin(&self, feature: usize, value: f64) -> u16 {
        self.cuts[feature].partition_point(|&cut| cut < value) as u16
    }

    fn bin_matrix(&self, x: ArrayView2<f64>) -> Array2<u16> {
        Array2::from_shape_fn(x.dim(), |(row, feature)| self.bin(feature, x[[row, feature]]))
    }
}

struct TreeBuilder<'a> {
    binned: &'a Array2<u16>,
    bins: &'a FeatureBins,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoostingParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.lambda) * self.params.learning_rate
    }

    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf { value: self.leaf_value(g, h) });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return index;
        }
        let Some((feature, bin)) = self.best_split(&rows, g, h) else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&i| self.binned[[i, feature]] <= bin);
        let threshold = self.bins.cuts[feature][usize::from(bin)];
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[index] = Node::Split { feature, threshold, left, right };
        index
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<(usize, u16)> {
        let lambda = self.params.lambda;
        let parent = g * g / (h + lambda);
        let mut best: Option<(usize, u16)> = None;
        let mut best_gain = 1e-12;

        for (feature, cuts) in self.bins.cuts.iter().enumerate() {
            if cuts.is_empty() {
                continue;
            }
            let n_bins = cuts.len() + 1;
            let mut hist_g = vec![0.0; n_bins];
            let mut hist_h = vec![0.0; n_bins];
            for &i in rows {
                let bin = usize::from(self.binned[[i, feature]]);
                hist_g[bin] += self.grad[i];
                hist_h[bin] += self.hess[i];
            }

            let (mut g_left, mut h_left) = (0.0, 0.0);
            for bin in 0..cuts.len() {
                g_left += hist_g[bin];
                h_left += hist_h[bin];
                let (g_right, h_right) = (g - g_left, h - h_left);
                if h_left < self.params.min_child_weight || h_right < self.params.min_child_weight {
                    continue;
                }
                let gain = g_left * g_left / (h_left + lambda)
                    + g_right * g_right / (h_right + lambda)
                    - parent;
                if gain > best_gain {
                    best_gain = gain;
                    best = Some((feature, bin as u16));
                }
            }
        }
        best
    }
}

/// Binary classifier: sigmoid of a base log-odds plus a sum of regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    pub fn fit(x: ArrayView2<f64>, y: &[usize], params: &BoostingParams) -> crate::Result<Self> {
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
        let targets: Vec<f64> = y.iter().map(|&label| if label == 1 { 1.0 } else { 0.0 }).collect();
        let positive_rate = (targets.iter().sum::<f64>() / n_rows as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let bins = FeatureBins::fit(x, params.max_bins);
        let binned = bins.bin_matrix(x);
        let mut margin = vec![base_score; n_rows];
        let mut grad = vec![0.0; n_rows];
        let mut hess = vec![0.0; n_rows];
        let mut trees = Vec::with_capacity(params.n_rounds);

        for round in 0..params.n_rounds {
            for i in 0..n_rows {
                let p = sigmoid(margin[i]);
                grad[i] = p - targets[i];
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }

            let mut builder = TreeBuilder {
                binned: &binned,
                bins: &bins,
                grad: &grad,
                hess: &hess,
                params,
                nodes: Vec::new(),
            };
            builder.build((0..n_rows).collect(), 0);
            let tree = RegressionTree { nodes: builder.nodes };

            for (i, row) in x.outer_iter().enumerate() {
                margin[i] += tree.predict_row(row);
            }
            if tree.nodes.len() == 1 && round > 0 {
                debug!(round, "boosting converged, no further splits");
                trees.push(tree);
                break;
            }
            trees.push(tree);
        }

        Ok(Self { base_score, n_features: x.ncols(), trees })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Churn probability per row
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.outer_iter()
            .map(|row| {
                let margin = self.base_score
                    + self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>();
                sigmoid(margin)
            })
            .collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
