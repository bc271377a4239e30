//! InsightForge: customer analytics over CRM records
//!
//! Turns a batch of per-customer records into value-based segments, churn-risk
//! scores and upsell opportunities, and decides per request whether to run
//! inline or as a background job.

pub mod cache;
pub mod churn;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod insights;
pub mod model;
pub mod pipeline;
pub mod segment;
pub mod upsell;

// Re-export public items for easier access
pub use cache::ModelCache;
pub use cli::Args;
pub use config::{Capabilities, ClassifierBackend, ClusteringBackend, PipelineConfig};
pub use data::{CustomerRecord, FeatureTable};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::InsightError;
pub use pipeline::{AnalysisResult, Pipeline};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, InsightError>;
