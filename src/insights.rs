//! Summary statistics and narrative insights over one analysis run

use serde::{Deserialize, Serialize};

use crate::churn::ChurnPrediction;
use crate::data::FeatureTable;
use crate::segment::Segment;
use crate::upsell::UpsellOpportunity;

/// Probability above which a customer counts toward the churn rate
pub const CHURN_RATE_THRESHOLD: f64 = 0.5;
/// Probability above which a customer is called out as high risk
pub const HIGH_RISK_THRESHOLD: f64 = 0.7;

pub const RECOMMENDATIONS: [&str; 3] = [
    "Focus on high-risk customers to reduce churn",
    "Run targeted upsell campaigns for high potential customers",
    "Develop segment-specific engagement cadences",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_customers: usize,
    pub total_revenue: f64,
    pub average_engagement: f64,
    /// Fraction of customers with churn probability above 0.5
    pub churn_rate: f64,
    pub upsell_opportunities: usize,
    /// Sum of potential minus current value over all opportunities
    pub potential_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub summary: Summary,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Summary statistics, narrative lines and recommendations for one analysis run
///
/// A customer counts as churning when its probability exceeds 0.5.
pub fn aggregate(
    table: &FeatureTable,
    segments: &[Segment],
    predictions: &[ChurnPrediction],
    opportunities: &[UpsellOpportunity],
) -> Insights {
    let total_customers = table.len();
    let total_revenue: f64 = table.rows.iter().map(|row| row.monetary).sum();
    let average_engagement = mean(table.rows.iter().map(|row| row.engagement_score), total_customers);

    let churning = predictions
        .iter()
        .filter(|p| p.churn_probability > CHURN_RATE_THRESHOLD)
        .count();
    let churn_rate = if predictions.is_empty() {
        0.0
    } else {
        churning as f64 / predictions.len() as f64
    };
    let high_risk = predictions
        .iter()
        .filter(|p| p.churn_probability > HIGH_RISK_THRESHOLD)
        .count();

    let potential_revenue: f64 = opportunities
        .iter()
        .map(|o| o.potential_value - o.current_value)
        .sum();

    let top_segment = segments
        .iter()
        .fold(None::<&Segment>, |best, segment| match best {
            Some(best) if best.revenue >= segment.revenue => Some(best),
            _ => Some(segment),
        })
        .map_or("N/A", |segment| segment.name.as_str());

    let average_value = if total_customers == 0 {
        0.0
    } else {
        total_revenue / total_customers as f64
    };

    let key_insights = vec![
        format!("{} distinct customer segments identified", segments.len()),
        format!("{high_risk} high-risk customers need immediate attention"),
        format!(
            "{} upsell opportunities with potential revenue of ${}",
            opportunities.len(),
            format_dollars(potential_revenue)
        ),
        format!("Average customer value: ${}", format_dollars(average_value)),
        format!("Top performing segment: {top_segment}"),
    ];

    Insights {
        summary: Summary {
            total_customers,
            total_revenue,
            average_engagement,
            churn_rate,
            upsell_opportunities: opportunities.len(),
            potential_revenue,
        },
        key_insights,
        recommendations: RECOMMENDATIONS.iter().map(|r| r.to_string()).collect(),
    }
}

fn mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

/// Whole dollars with comma thousands separators
pub fn format_dollars(amount: f64) -> String {
    let rounded = amount.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::churn::RiskLevel;
    use crate::data::CustomerRecord;
    use crate::upsell::Confidence;
    use chrono::NaiveDate;

    fn table() -> FeatureTable {
        let records: Vec<_> = [(1_000.0, 20.0), (3_000.0, 60.0), (8_000.0, 100.0)]
            .into_iter()
            .enumerate()
            .map(|(i, (spent, engagement))| CustomerRecord {
                total_spent: spent,
                engagement_score: engagement,
                ..CustomerRecord::new(format!("c{i}"), format!("Company {i}"))
            })
            .collect();
        FeatureTable::build(&records, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()).unwrap()
    }

    fn prediction(id: &str, probability: f64) -> ChurnPrediction {
        ChurnPrediction {
            customer_id: id.to_string(),
            company_name: String::new(),
            churn_probability: probability,
            risk_level: RiskLevel::from_probability(probability),
            key_factors: Vec::new(),
            recommended_action: String::new(),
        }
    }

    fn segment(name: &str, revenue: f64) -> Segment {
        Segment {
            id: 0,
            name: name.to_string(),
            count: 1,
            revenue,
            avg_engagement: 0.0,
            avg_value: revenue,
            customers: Vec::new(),
        }
    }

    #[test]
    fn test_format_dollars() {
        assert_eq!(format_dollars(0.0), "0");
        assert_eq!(format_dollars(999.4), "999");
        assert_eq!(format_dollars(1_000.0), "1,000");
        assert_eq!(format_dollars(1_234_567.8), "1,234,568");
        assert_eq!(format_dollars(-12_500.0), "-12,500");
    }

    #[test]
    fn test_summary_and_narrative() {
        let predictions = vec![prediction("c0", 0.9), prediction("c1", 0.55), prediction("c2", 0.1)];
        let opportunities = vec![UpsellOpportunity {
            customer_id: "c2".to_string(),
            company_name: "Company 2".to_string(),
            upsell_score: 0.85,
            current_value: 8_000.0,
            potential_value: 12_000.0,
            recommended_products: Vec::new(),
            confidence: Confidence::High,
        }];
        let segments = vec![segment("At Risk", 1_000.0), segment("Loyal Customers", 11_000.0)];

        let insights = aggregate(&table(), &segments, &predictions, &opportunities);
        let summary = &insights.summary;
        assert_eq!(summary.total_customers, 3);
        assert_eq!(summary.total_revenue, 12_000.0);
        assert_eq!(summary.average_engagement, 60.0);
        assert!((summary.churn_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(summary.upsell_opportunities, 1);
        assert_eq!(summary.potential_revenue, 4_000.0);

        assert_eq!(
            insights.key_insights,
            vec![
                "2 distinct customer segments identified",
                "1 high-risk customers need immediate attention",
                "1 upsell opportunities with potential revenue of $4,000",
                "Average customer value: $4,000",
                "Top performing segment: Loyal Customers",
            ]
        );
        assert_eq!(insights.recommendations.len(), 3);
    }

    #[test]
    fn test_no_segments_reports_na() {
        let insights = aggregate(&table(), &[], &[], &[]);
        assert_eq!(insights.summary.churn_rate, 0.0);
        assert_eq!(insights.key_insights[4], "Top performing segment: N/A");
    }
}
