//! Upsell opportunity scoring

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{FeatureRow, FeatureTable};

/// Scores must exceed this to become opportunities
pub const OPPORTUNITY_THRESHOLD: f64 = 0.6;
/// Fixed heuristic uplift applied to current spend
pub const POTENTIAL_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "Low Confidence")]
    Low,
    #[serde(rename = "Medium Confidence")]
    Medium,
    #[serde(rename = "High Confidence")]
    High,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A customer whose upsell score clears the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsellOpportunity {
    pub customer_id: String,
    pub company_name: String,
    pub upsell_score: f64,
    pub current_value: f64,
    /// Current value scaled by the fixed growth multiplier
    pub potential_value: f64,
    pub recommended_products: Vec<String>,
    pub confidence: Confidence,
}

/// Weighted blend of engagement, relative value and recency, in [0, 1]
pub fn upsell_score(row: &FeatureRow) -> f64 {
    let recent = if row.recent_activity { 1.0 } else { 0.0 };
    let freshness = 1.0 - (row.recency.clamp(0, 365) as f64) / 365.0;
    0.3 * row.engagement_normalized + 0.4 * row.value_score + 0.2 * recent + 0.1 * freshness
}

pub fn recommended_products(total_spent: f64) -> [&'static str; 3] {
    if total_spent > 100_000.0 {
        ["Enterprise Plan", "Premium Support", "Advanced Analytics"]
    } else if total_spent > 50_000.0 {
        ["Professional Plan", "Priority Support", "Custom Integration"]
    } else {
        ["Standard Plan", "Basic Support", "Training Package"]
    }
}

/// Rows scoring above the threshold, highest score first
pub fn detect_opportunities(table: &FeatureTable) -> Vec<UpsellOpportunity> {
    let mut scored: Vec<(usize, f64)> = table
        .rows
        .iter()
        .map(upsell_score)
        .enumerate()
        .filter(|&(_, score)| score > OPPORTUNITY_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let opportunities: Vec<UpsellOpportunity> = scored
        .into_iter()
        .map(|(i, score)| {
            let current_value = table.rows[i].monetary;
            UpsellOpportunity {
                customer_id: table.customer_ids[i].clone(),
                company_name: table.company_names[i].clone(),
                upsell_score: score,
                current_value,
                potential_value: current_value * POTENTIAL_MULTIPLIER,
                recommended_products: recommended_products(current_value)
                    .iter()
                    .map(|product| product.to_string())
                    .collect(),
                confidence: Confidence::from_score(score),
            }
        })
        .collect();

    info!(opportunities = opportunities.len(), "upsell detection complete");
    opportunities
}
