//! Pipeline tunables and backend selection

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

/// Classifier backend used by the churn scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierBackend {
    /// Histogram-binned logistic gradient boosting
    #[default]
    GradientBoosting,
    /// Bootstrap ensemble of decision trees with class-balanced weights
    BaggedTrees,
}

/// Clustering backend used by the segmentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClusteringBackend {
    /// Silhouette-guided k-means
    #[default]
    KMeans,
    /// Deterministic rule ladder only
    Rules,
}

/// Backends picked once at startup and shared by every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub clustering: ClusteringBackend,
    pub classifier: ClassifierBackend,
}

/// Runtime configuration for the analytics pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum rows used to train the churn classifier
    pub train_sample_size: usize,
    /// Maximum rows used when scoring candidate cluster counts
    pub silhouette_sample: usize,
    pub random_seed: u64,
    /// Worker threads for classifier training, 0 means library default
    pub n_threads: usize,
    /// Rows above which a request is dispatched to the background
    pub large_dataset_threshold: usize,
    /// Upper bound on candidate cluster counts
    pub max_clusters: usize,
    /// Rows below which segmentation always uses the rule ladder
    pub min_rows_for_clustering: usize,
    /// Rows per churn inference batch
    pub inference_batch_size: usize,
    pub model_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub capabilities: Capabilities,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            train_sample_size: 10_000,
            silhouette_sample: 2000,
            random_seed: 42,
            n_threads: 0,
            large_dataset_threshold: 200_000,
            max_clusters: 10,
            min_rows_for_clustering: 50,
            inference_batch_size: 50_000,
            model_dir: PathBuf::from("./models"),
            staging_dir: std::env::temp_dir(),
            capabilities: Capabilities::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would make a stage meaningless
    pub fn validate(&self) -> Result<(), InsightError> {
        if self.train_sample_size < 2 {
            return Err(InsightError::validation("train_sample_size must be at least 2"));
        }
        if self.silhouette_sample < 3 {
            return Err(InsightError::validation("silhouette_sample must be at least 3"));
        }
        if self.max_clusters < 2 {
            return Err(InsightError::validation("max_clusters must be at least 2"));
        }
        if self.inference_batch_size == 0 {
            return Err(InsightError::validation("inference_batch_size must be positive"));
        }
        Ok(())
    }

    /// Directory holding finished background job results
    pub fn results_dir(&self) -> PathBuf {
        self.model_dir.clone()
    }
}
