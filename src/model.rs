//! K-Means clustering and silhouette-guided cluster-count selection

use linfa::prelude::*;
use linfa::ParamGuard;
use linfa_clustering::{IncrKMeansError, KMeans, KMeansInit};
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InsightError;

/// Row count from which the final fit uses mini-batch updates
pub const MINIBATCH_MIN_ROWS: usize = 50_000;
/// Rows drawn per mini-batch step
pub const MINIBATCH_SIZE: usize = 4096;
const MINIBATCH_MAX_STEPS: usize = 100;

/// Fitted clusterer kept in the model cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
    /// Cluster assignments for the rows the model was fitted on
    #[serde(skip)]
    pub labels: Array1<usize>,
}

impl ClusterModel {
    /// Assign each standardized row to its nearest centroid
    pub fn predict(&self, features: ArrayView2<f64>) -> crate::Result<Array1<usize>> {
        if features.ncols() != self.centroids.ncols() {
            return Err(InsightError::computation(format!(
                "expected {} features, got {}",
                self.centroids.ncols(),
                features.ncols()
            )));
        }

        let labels = features
            .outer_iter()
            .map(|row| {
                let mut min_distance = f64::INFINITY;
                let mut closest_cluster = 0;
                for (cluster_idx, centroid) in self.centroids.outer_iter().enumerate() {
                    let distance = euclidean_distance(&row, &centroid);
                    if distance < min_distance {
                        min_distance = distance;
                        closest_cluster = cluster_idx;
                    }
                }
                closest_cluster
            })
            .collect();
        Ok(labels)
    }

    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Fit K-Means on standardized features
///
/// # Arguments
/// * `features` - Standardized feature matrix
/// * `n_clusters` - Number of clusters
/// * `n_runs` - Independent initializations; the lowest inertia wins
/// * `seed` - Seed for centroid initialization
///
/// # Returns
/// * Fitted `ClusterModel` with one label per input row
pub fn fit_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    n_runs: usize,
    seed: u64,
) -> crate::Result<ClusterModel> {
    check_cluster_count(features, n_clusters)?;

    let n_samples = features.nrows();
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(features.clone(), targets);

    let model = KMeans::params_with(n_clusters, StdRng::seed_from_u64(seed), L2Dist)
        .init_method(KMeansInit::KMeansPara)
        .n_runs(n_runs.max(1))
        .max_n_iterations(300)
        .tolerance(1e-4)
        .fit(&dataset)
        .map_err(|err| InsightError::computation(format!("k-means fit failed: {err}")))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(ClusterModel { n_clusters, centroids, inertia, labels })
}

/// Fit K-Means with seeded mini-batch updates for populations too large for full passes
///
/// Each step draws `batch_size` rows and moves the centroids toward them; fitting stops
/// once a step converges or after a fixed number of steps. Every row is then labelled
/// by its nearest centroid.
pub fn fit_kmeans_minibatch(
    features: &Array2<f64>,
    n_clusters: usize,
    batch_size: usize,
    seed: u64,
) -> crate::Result<ClusterModel> {
    check_cluster_count(features, n_clusters)?;

    let n_samples = features.nrows();
    let batch_size = batch_size.clamp(n_clusters, n_samples);
    let params = KMeans::params_with(n_clusters, StdRng::seed_from_u64(seed), L2Dist)
        .init_method(KMeansInit::KMeansPara)
        .tolerance(1e-4)
        .check()
        .map_err(|err| InsightError::computation(format!("invalid k-means settings: {err}")))?;

    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let mut model: Option<KMeans<f64, L2Dist>> = None;
    for step in 0..MINIBATCH_MAX_STEPS {
        let rows = index::sample(&mut rng, n_samples, batch_size).into_vec();
        let batch = DatasetBase::from(features.select(Axis(0), &rows));
        match params.fit_with(model.take(), &batch) {
            Ok(converged) => {
                debug!(step, batch_size, "mini-batch k-means converged");
                model = Some(converged);
                break;
            }
            Err(IncrKMeansError::NotConverged(partial)) => model = Some(partial),
            Err(err) => {
                return Err(InsightError::computation(format!("mini-batch k-means failed: {err}")));
            }
        }
    }
    let model = model.ok_or_else(|| InsightError::computation("mini-batch k-means ran no steps"))?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(ClusterModel { n_clusters, centroids, inertia, labels })
}

fn check_cluster_count(features: &Array2<f64>, n_clusters: usize) -> crate::Result<()> {
    if n_clusters < 2 {
        return Err(InsightError::computation("at least 2 clusters are required"));
    }
    if features.nrows() < n_clusters {
        return Err(InsightError::computation(format!(
            "Number of data points ({}) must be at least equal to number of clusters ({})",
            features.nrows(),
            n_clusters
        )));
    }
    Ok(())
}

/// Mean silhouette coefficient of a labelled point set
///
/// Points alone in their cluster score 0; fewer than two clusters scores 0.
pub fn silhouette_score(features: ArrayView2<f64>, labels: &Array1<usize>) -> f64 {
    let n_samples = features.nrows();
    let n_clusters = labels.iter().max().map_or(0, |max| max + 1);
    if n_samples < 2 || n_clusters < 2 {
        return 0.0;
    }

    let mut sizes = vec![0usize; n_clusters];
    for &label in labels.iter() {
        sizes[label] += 1;
    }

    let mut silhouette_sum = 0.0;
    let mut distance_sums = vec![0.0; n_clusters];
    for i in 0..n_samples {
        distance_sums.iter_mut().for_each(|sum| *sum = 0.0);
        let point = features.row(i);
        for j in 0..n_samples {
            if i != j {
                distance_sums[labels[j]] += euclidean_distance(&point, &features.row(j));
            }
        }

        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }
        // a(i): mean distance to the rest of its own cluster
        let a_i = distance_sums[own] / (sizes[own] - 1) as f64;
        // b(i): smallest mean distance to another cluster
        let b_i = (0..n_clusters)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| distance_sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);

        if b_i.is_finite() && a_i.max(b_i) > 0.0 {
            silhouette_sum += (b_i - a_i) / a_i.max(b_i);
        }
    }

    silhouette_sum / n_samples as f64
}

/// Outcome of the sampled cluster-count search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KSelection {
    pub k: usize,
    pub score: f64,
    pub sample_size: usize,
}

/// One scored cluster count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KCandidate {
    pub k: usize,
    /// Clusters that received at least one row
    pub distinct: usize,
    pub score: f64,
}

/// Fold scored candidates into the winning `(k, score)`
///
/// Candidates with fewer than two non-empty clusters are ignored. Only a strictly higher
/// score replaces the current best, so with candidates in ascending k the smallest k wins
/// ties. Nothing qualifying yields `(2, -1.0)`.
pub fn select_k(candidates: impl IntoIterator<Item = KCandidate>) -> (usize, f64) {
    candidates
        .into_iter()
        .filter(|candidate| candidate.distinct >= 2)
        .fold((2, -1.0), |(best_k, best_score), candidate| {
            if candidate.score > best_score {
                (candidate.k, candidate.score)
            } else {
                (best_k, best_score)
            }
        })
}

/// Pick a cluster count by silhouette on a seeded sample of `features`
///
/// Candidates run from 2 up to `min(max_k, sample_size - 1)` and are folded by
/// [`select_k`].
pub fn choose_k_sampled(
    features: &Array2<f64>,
    max_k: usize,
    sample_limit: usize,
    seed: u64,
) -> KSelection {
    let n_samples = features.nrows();
    let sample_size = n_samples.min(sample_limit);
    let mut rng = StdRng::seed_from_u64(seed);
    let indices = index::sample(&mut rng, n_samples, sample_size).into_vec();
    let sample = features.select(Axis(0), &indices);

    let upper = max_k.min(sample_size.saturating_sub(1));
    let candidates = (2..=upper).filter_map(|k| {
        let fitted = match fit_kmeans(&sample, k, 1, seed) {
            Ok(fitted) => fitted,
            Err(err) => {
                debug!(k, error = %err, "skipping candidate cluster count");
                return None;
            }
        };
        let distinct = fitted.cluster_sizes().iter().filter(|&&size| size > 0).count();
        let score = if distinct < 2 { 0.0 } else { silhouette_score(sample.view(), &fitted.labels) };
        debug!(k, distinct, silhouette = score, "scored candidate cluster count");
        Some(KCandidate { k, distinct, score })
    });

    let (k, score) = select_k(candidates);
    KSelection { k, score, sample_size }
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;

    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let distance = euclidean_distance(&features.row(i), &centroids.row(cluster));
            inertia += distance * distance;
        }
    }

    inertia
}

/// Calculate Euclidean distance between two points
fn euclidean_distance(point1: &ArrayView1<f64>, point2: &ArrayView1<f64>) -> f64 {
    point1
        .iter()
        .zip(point2.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt()
}
