//! Churn scoring: weak labels, bounded training, batched inference

pub mod bagging;
pub mod boosting;
pub mod classifier;
pub mod labels;
pub mod sampling;

use chrono::Utc;
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::ModelCache;
use crate::config::{ClassifierBackend, PipelineConfig};
use crate::data::{FeatureRow, FeatureTable};
use crate::error::InsightError;

pub use classifier::{predict_batched, ChurnModel, ProbabilisticClassifier, TrainingParams};
pub use labels::{generate_labels, WeakLabels};
pub use sampling::{training_sample, SampleStrategy, TrainingSample};

/// Churn risk band; serialized as "Low Risk", "Medium Risk" or "High Risk"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskLevel {
    /// High from 0.7, Medium from 0.4, Low below
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.7 {
            Self::High
        } else if probability >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnPrediction {
    pub customer_id: String,
    pub company_name: String,
    pub churn_probability: f64,
    pub risk_level: RiskLevel,
    pub key_factors: Vec<String>,
    pub recommended_action: String,
}

/// Where the probabilities came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbabilitySource {
    Model { backend: ClassifierBackend, sample: SampleStrategy },
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct ChurnOutcome {
    pub predictions: Vec<ChurnPrediction>,
    pub source: ProbabilitySource,
}

/// Up to three rule-derived reasons, in fixed priority order
pub fn key_factors(row: &FeatureRow) -> Vec<String> {
    let mut factors = Vec::with_capacity(3);
    if row.recency > 180 {
        factors.push("No recent activity".to_string());
    }
    if row.engagement_score < 40.0 {
        factors.push("Low engagement".to_string());
    }
    if row.frequency == 0 {
        factors.push("No purchase history".to_string());
    }
    factors.truncate(3);
    factors
}

/// Follow-up text for the risk band of `probability`
pub fn recommended_action(probability: f64) -> &'static str {
    match RiskLevel::from_probability(probability) {
        RiskLevel::High => "Immediate intervention required - schedule call with account manager",
        RiskLevel::Medium => "Send re-engagement campaign and follow up",
        RiskLevel::Low => "Monitor and maintain regular contact",
    }
}

/// Hand-tuned churn probability used when no model can be trained
pub fn rule_based_probability(row: &FeatureRow) -> f64 {
    let mut probability = 0.1;
    if row.recency > 180 {
        probability += 0.4;
    } else if row.recency > 90 {
        probability += 0.2;
    }
    if row.engagement_score < 30.0 {
        probability += 0.3;
    } else if row.engagement_score < 50.0 {
        probability += 0.15;
    }
    if row.frequency == 0 {
        probability += 0.2;
    } else if row.frequency < 3 {
        probability += 0.1;
    }
    f64::min(probability, 0.95)
}

/// Weak-label churn scoring: label, sample, train, then score every row in batches
///
/// Falls back to [`rule_based_probability`] when no two-class training target exists or
/// training fails.
pub struct ChurnScorer {
    backend: ClassifierBackend,
    train_sample_size: usize,
    batch_size: usize,
    seed: u64,
    params: TrainingParams,
}

impl ChurnScorer {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut params = TrainingParams::default();
        params.bagging.seed = config.random_seed;
        params.bagging.n_threads = config.n_threads;
        Self {
            backend: config.capabilities.classifier,
            train_sample_size: config.train_sample_size,
            batch_size: config.inference_batch_size,
            seed: config.random_seed,
            params,
        }
    }

    pub fn with_params(mut self, params: TrainingParams) -> Self {
        self.params = params;
        self
    }

    /// Train on weak labels and score every row; the model lands in `cache`
    pub fn score(&self, table: &FeatureTable, cache: &mut ModelCache) -> ChurnOutcome {
        info!(rows = table.len(), backend = ?self.backend, "performing churn modeling");

        let (probabilities, source) = match self.train_and_predict(table, cache) {
            Ok(scored) => scored,
            Err(err) => {
                warn!(error = %err, "churn model unavailable, using heuristic probabilities");
                let heuristic = table.rows.iter().map(rule_based_probability).collect();
                (heuristic, ProbabilitySource::Heuristic)
            }
        };

        let predictions = table
            .rows
            .iter()
            .zip(&probabilities)
            .enumerate()
            .map(|(i, (row, &probability))| ChurnPrediction {
                customer_id: table.customer_ids[i].clone(),
                company_name: table.company_names[i].clone(),
                churn_probability: probability,
                risk_level: RiskLevel::from_probability(probability),
                key_factors: key_factors(row),
                recommended_action: recommended_action(probability).to_string(),
            })
            .collect();

        info!(source = ?source, "churn modeling complete");
        ChurnOutcome { predictions, source }
    }

    fn train_and_predict(
        &self,
        table: &FeatureTable,
        cache: &mut ModelCache,
    ) -> crate::Result<(Vec<f64>, ProbabilitySource)> {
        if table.len() < 2 {
            return Err(InsightError::computation(
                "at least two rows are needed for a two-class target",
            ));
        }

        let weak = generate_labels(table);
        info!(
            positives = weak.positives(),
            threshold = weak.threshold,
            forced = weak.forced,
            "generated weak churn labels"
        );

        let sample = training_sample(&weak.labels, self.train_sample_size, self.seed);
        let x = table.churn_matrix();
        let x_train = x.select(Axis(0), &sample.indices);
        let y_train: Vec<usize> = sample.indices.iter().map(|&i| weak.labels[i]).collect();

        let model = ChurnModel::train(self.backend, x_train.view(), &y_train, &self.params)?;
        info!(backend = ?model.backend(), rows = y_train.len(), "trained churn model");

        let probabilities = predict_batched(&model, &x, self.batch_size).to_vec();
        cache.churn_model = Some(model);
        cache.last_trained_at = Some(Utc::now());

        Ok((probabilities, ProbabilitySource::Model { backend: self.backend, sample: sample.strategy }))
    }
}
