//! One end-to-end analysis run over a batch of customer records

use std::time::Instant;

use chrono::{NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::ModelCache;
use crate::churn::{ChurnPrediction, ChurnScorer};
use crate::config::PipelineConfig;
use crate::data::{CustomerRecord, FeatureTable};
use crate::insights::{aggregate, Insights};
use crate::segment::{Segment, SegmentationEngine};
use crate::upsell::{detect_opportunities, UpsellOpportunity};

/// Everything a run produces, in wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub segments: Vec<Segment>,
    pub churn_predictions: Vec<ChurnPrediction>,
    pub upsell_opportunities: Vec<UpsellOpportunity>,
    pub insights: Insights,
    pub processed_count: usize,
    /// RFC 3339 completion time
    pub timestamp: String,
}

/// Engines built once from the configured capabilities, reused by every run
pub struct Pipeline {
    segmentation: SegmentationEngine,
    churn: ChurnScorer,
    force_rules: bool,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            segmentation: SegmentationEngine::from_config(config),
            churn: ChurnScorer::from_config(config),
            force_rules: false,
        }
    }

    /// Always segment with the rule ladder
    pub fn with_forced_rules(mut self, force_rules: bool) -> Self {
        self.force_rules = force_rules;
        self
    }

    pub fn with_churn_scorer(mut self, churn: ChurnScorer) -> Self {
        self.churn = churn;
        self
    }

    /// Analyze `records`, writing fitted models into `cache`
    pub fn run(&self, records: &[CustomerRecord], cache: &mut ModelCache) -> crate::Result<AnalysisResult> {
        self.run_with_today(records, Utc::now().date_naive(), cache)
    }

    /// Same as [`Pipeline::run`] with recency anchored at `today`
    pub fn run_with_today(
        &self,
        records: &[CustomerRecord],
        today: NaiveDate,
        cache: &mut ModelCache,
    ) -> crate::Result<AnalysisResult> {
        let started = Instant::now();
        let table = FeatureTable::build(records, today)?;
        info!(rows = table.len(), "built feature table");

        let segmentation = self.segmentation.segment(&table, cache, self.force_rules)?;
        let churn = self.churn.score(&table, cache);
        let upsell_opportunities = detect_opportunities(&table);
        let insights = aggregate(
            &table,
            &segmentation.segments,
            &churn.predictions,
            &upsell_opportunities,
        );

        info!(
            rows = table.len(),
            segments = segmentation.segments.len(),
            method = ?segmentation.method,
            churn_source = ?churn.source,
            opportunities = upsell_opportunities.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );

        Ok(AnalysisResult {
            segments: segmentation.segments,
            churn_predictions: churn.predictions,
            upsell_opportunities,
            insights,
            processed_count: table.len(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }
}
