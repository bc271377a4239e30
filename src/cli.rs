//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Capabilities, ClassifierBackend, ClusteringBackend, PipelineConfig};

/// Segment customers, score churn risk and find upsell opportunities
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a JSON array of customer records
    #[arg(short, long, default_value = "customers.json")]
    pub input: PathBuf,

    /// Write the result JSON here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for saved models and background job results
    #[arg(long, env = "MODEL_DIR", default_value = "./models")]
    pub model_dir: PathBuf,

    /// Directory for staged background job input (OS temp dir when unset)
    #[arg(long, env = "STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Rows above which a batch runs as a background job
    #[arg(long, env = "LARGE_DATASET_THRESHOLD", default_value = "200000")]
    pub large_dataset_threshold: usize,

    /// Maximum rows used to train the churn classifier
    #[arg(long, env = "TRAIN_SAMPLE_SIZE", default_value = "10000")]
    pub train_sample_size: usize,

    /// Maximum rows used to score candidate cluster counts
    #[arg(long, env = "SILHOUETTE_SAMPLE", default_value = "2000")]
    pub silhouette_sample: usize,

    /// Seed for every randomized step
    #[arg(long, env = "RANDOM_STATE", default_value = "42")]
    pub random_state: u64,

    /// Worker threads for classifier training, 0 for the library default
    #[arg(long, env = "N_THREADS", default_value = "0")]
    pub n_threads: usize,

    /// Upper bound on candidate cluster counts
    #[arg(long, default_value = "10")]
    pub max_clusters: usize,

    /// Rows per churn inference batch
    #[arg(long, default_value = "50000")]
    pub inference_batch_size: usize,

    /// Churn classifier backend
    #[arg(long, value_enum, default_value_t = ClassifierBackend::GradientBoosting)]
    pub classifier: ClassifierBackend,

    /// Segmentation strategy; `rules` skips clustering entirely
    #[arg(long, value_enum, default_value_t = ClusteringBackend::KMeans)]
    pub clustering: ClusteringBackend,

    /// Always segment with the rule ladder
    #[arg(long)]
    pub force_rules: bool,

    /// Skip loading and saving models
    #[arg(long)]
    pub no_persist: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Pipeline configuration described by these arguments
    pub fn pipeline_config(&self) -> crate::Result<PipelineConfig> {
        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            train_sample_size: self.train_sample_size,
            silhouette_sample: self.silhouette_sample,
            random_seed: self.random_state,
            n_threads: self.n_threads,
            large_dataset_threshold: self.large_dataset_threshold,
            max_clusters: self.max_clusters,
            inference_batch_size: self.inference_batch_size,
            model_dir: self.model_dir.clone(),
            staging_dir: self.staging_dir.clone().unwrap_or(defaults.staging_dir),
            capabilities: Capabilities { clustering: self.clustering, classifier: self.classifier },
            min_rows_for_clustering: defaults.min_rows_for_clustering,
        };
        config.validate()?;
        Ok(config)
    }
}
