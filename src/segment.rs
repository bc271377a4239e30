//! Customer segmentation: rule ladder or silhouette-guided k-means, then naming

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::ModelCache;
use crate::config::{ClusteringBackend, PipelineConfig};
use crate::data::{quantile, FeatureRow, FeatureTable, StandardScaler};
use crate::model::{
    choose_k_sampled, fit_kmeans, fit_kmeans_minibatch, ClusterModel, MINIBATCH_MIN_ROWS,
    MINIBATCH_SIZE,
};

/// One named group of customers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(skip)]
    pub id: usize,
    pub name: String,
    pub count: usize,
    pub revenue: f64,
    #[serde(rename = "avgEngagement")]
    pub avg_engagement: f64,
    #[serde(rename = "avgValue")]
    pub avg_value: f64,
    pub customers: Vec<String>,
}

/// How the labels were produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentationMethod {
    Rules,
    KMeans { k: usize, silhouette: f64 },
}

/// Per-row labels from one assignment strategy
#[derive(Debug, Clone)]
pub struct Assignment {
    pub labels: Vec<usize>,
    pub clusterer: Option<ClusterModel>,
    pub method: SegmentationMethod,
}

#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    pub segments: Vec<Segment>,
    pub labels: Vec<usize>,
    pub method: SegmentationMethod,
}

/// A way of assigning every row of a feature table to a segment
pub trait SegmentAssigner: Send + Sync {
    fn assign(&self, table: &FeatureTable, scaled: &Array2<f64>) -> crate::Result<Assignment>;
}

/// Fixed priority ladder over spend, engagement and recency
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleLadder;

impl RuleLadder {
    pub fn segment_for(row: &FeatureRow) -> usize {
        if row.monetary > 150_000.0 && row.engagement_score > 80.0 {
            return 0;
        }
        if row.monetary > 75_000.0 && row.engagement_score > 60.0 {
            return 1;
        }
        if row.engagement_score < 40.0 || row.recency > 180 {
            return 2;
        }
        3
    }
}

impl SegmentAssigner for RuleLadder {
    fn assign(&self, table: &FeatureTable, _scaled: &Array2<f64>) -> crate::Result<Assignment> {
        Ok(Assignment {
            labels: table.rows.iter().map(Self::segment_for).collect(),
            clusterer: None,
            method: SegmentationMethod::Rules,
        })
    }
}

/// Choose k on a sample by silhouette, then cluster the whole population
///
/// Populations of at least `minibatch_min_rows` are fitted with mini-batch updates.
#[derive(Debug, Clone)]
pub struct AdaptiveKMeans {
    pub max_clusters: usize,
    pub sample_limit: usize,
    pub minibatch_min_rows: usize,
    pub seed: u64,
}

impl SegmentAssigner for AdaptiveKMeans {
    fn assign(&self, _table: &FeatureTable, scaled: &Array2<f64>) -> crate::Result<Assignment> {
        let n_rows = scaled.nrows();
        let max_k = self.max_clusters.min(n_rows.saturating_sub(1));
        let selection = choose_k_sampled(scaled, max_k, self.sample_limit, self.seed);
        info!(
            k = selection.k,
            silhouette = selection.score,
            sample_size = selection.sample_size,
            "selected cluster count"
        );

        let minibatch = n_rows >= self.minibatch_min_rows;
        let clusterer = if minibatch {
            fit_kmeans_minibatch(scaled, selection.k, MINIBATCH_SIZE, self.seed)?
        } else {
            fit_kmeans(scaled, selection.k, 1, self.seed)?
        };
        info!(
            n_clusters = clusterer.n_clusters,
            inertia = clusterer.inertia,
            minibatch,
            "k-means fitted"
        );
        Ok(Assignment {
            labels: clusterer.labels.to_vec(),
            method: SegmentationMethod::KMeans { k: selection.k, silhouette: selection.score },
            clusterer: Some(clusterer),
        })
    }
}

/// Segmentation engine with its strategy fixed at construction
pub struct SegmentationEngine {
    strategy: Box<dyn SegmentAssigner>,
    min_rows: usize,
}

impl SegmentationEngine {
    pub fn new(strategy: Box<dyn SegmentAssigner>, min_rows: usize) -> Self {
        Self { strategy, min_rows }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let strategy: Box<dyn SegmentAssigner> = match config.capabilities.clustering {
            ClusteringBackend::KMeans => Box::new(AdaptiveKMeans {
                max_clusters: config.max_clusters,
                sample_limit: config.silhouette_sample,
                minibatch_min_rows: MINIBATCH_MIN_ROWS,
                seed: config.random_seed,
            }),
            ClusteringBackend::Rules => Box::new(RuleLadder),
        };
        Self::new(strategy, config.min_rows_for_clustering)
    }

    /// Segment every row; the fitted scaler (and clusterer, if any) land in `cache`
    pub fn segment(
        &self,
        table: &FeatureTable,
        cache: &mut ModelCache,
        force_rules: bool,
    ) -> crate::Result<SegmentationOutcome> {
        let raw = table.segmentation_matrix();
        let scaler = StandardScaler::fit(&raw);
        let scaled = scaler.transform(raw);
        cache.scaler = Some(scaler);

        let assignment = if force_rules || table.len() < self.min_rows {
            info!(rows = table.len(), forced = force_rules, "using rule-based segmentation");
            RuleLadder.assign(table, &scaled)?
        } else {
            match self.strategy.assign(table, &scaled) {
                Ok(assignment) => assignment,
                Err(err) => {
                    warn!(error = %err, "clustering failed, falling back to rule-based segmentation");
                    RuleLadder.assign(table, &scaled)?
                }
            }
        };

        if let Some(clusterer) = assignment.clusterer {
            cache.clusterer = Some(clusterer);
        }

        let segments = summarize_segments(table, &assignment.labels);
        info!(segments = segments.len(), "segmentation complete");
        Ok(SegmentationOutcome { segments, labels: assignment.labels, method: assignment.method })
    }
}

/// Name a segment from its members' means against dataset spend percentiles
pub fn segment_name(members: &[&FeatureRow], spend_p70: f64, spend_p50: f64) -> &'static str {
    let count = members.len() as f64;
    let avg_value = members.iter().map(|row| row.monetary).sum::<f64>() / count;
    let avg_engagement = members.iter().map(|row| row.engagement_score).sum::<f64>() / count;
    let avg_recency = members.iter().map(|row| row.recency as f64).sum::<f64>() / count;

    if avg_value > spend_p70 && avg_engagement > 80.0 {
        "High Value Champions"
    } else if avg_value > spend_p50 && avg_engagement > 60.0 {
        "Loyal Customers"
    } else if avg_engagement < 40.0 || avg_recency > 180.0 {
        "At Risk"
    } else {
        "Growth Potential"
    }
}

/// Group rows by label into segments, ascending by id
pub fn summarize_segments(table: &FeatureTable, labels: &[usize]) -> Vec<Segment> {
    let spend = table.total_spent();
    let spend_p70 = quantile(&spend, 0.7);
    let spend_p50 = quantile(&spend, 0.5);

    let n_segments = labels.iter().max().map_or(0, |max| max + 1);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_segments];
    for (row, &label) in labels.iter().enumerate() {
        members[label].push(row);
    }

    members
        .into_iter()
        .enumerate()
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(id, rows)| {
            let features: Vec<&FeatureRow> = rows.iter().map(|&i| &table.rows[i]).collect();
            let count = rows.len();
            let revenue: f64 = features.iter().map(|row| row.monetary).sum();
            let engagement: f64 = features.iter().map(|row| row.engagement_score).sum();
            Segment {
                id,
                name: segment_name(&features, spend_p70, spend_p50).to_string(),
                count,
                revenue,
                avg_engagement: engagement / count as f64,
                avg_value: revenue / count as f64,
                customers: rows.iter().map(|&i| table.customer_ids[i].clone()).collect(),
            }
        })
        .collect()
}
