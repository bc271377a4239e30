//! Customer records and feature engineering

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::InsightError;

/// Recency assigned when neither a purchase gap nor an interaction date is known
pub const MISSING_RECENCY_DAYS: i64 = 999;

/// Industry label used for missing, blank and unseen industries
pub const UNKNOWN_INDUSTRY: &str = "Unknown";

/// Columns fed to the segmentation engine, in matrix order
pub const SEGMENT_FEATURES: [&str; 5] =
    ["recency", "frequency", "monetary", "engagement_normalized", "value_score"];

/// Columns fed to the churn classifier, in matrix order
pub const CHURN_FEATURES: [&str; 8] = [
    "recency",
    "frequency",
    "monetary",
    "engagement_normalized",
    "high_engagement",
    "low_engagement",
    "recent_activity",
    "value_score",
];

/// One validated customer row as received from the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub company_name: String,
    #[serde(default)]
    pub industry: Option<String>,
    pub total_spent: f64,
    pub engagement_score: f64,
    /// ISO date or RFC 3339 timestamp; unparseable values count as missing
    #[serde(default)]
    pub last_interaction_date: Option<String>,
    #[serde(default)]
    pub purchase_frequency: u32,
    #[serde(default)]
    pub days_since_last_purchase: Option<i64>,
}

impl CustomerRecord {
    /// Minimal record, handy for tests and fixtures
    pub fn new(customer_id: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            company_name: company_name.into(),
            industry: None,
            total_spent: 0.0,
            engagement_score: 0.0,
            last_interaction_date: None,
            purchase_frequency: 0,
            days_since_last_purchase: None,
        }
    }
}

/// Reject input the pipeline cannot score
pub fn validate_records(records: &[CustomerRecord]) -> Result<(), InsightError> {
    if records.is_empty() {
        return Err(InsightError::validation("no customer rows supplied"));
    }

    let mut seen = HashSet::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        if record.customer_id.trim().is_empty() {
            return Err(InsightError::validation(format!("row {row}: customer_id is empty")));
        }
        if !seen.insert(record.customer_id.as_str()) {
            return Err(InsightError::validation(format!(
                "row {row}: duplicate customer_id {}",
                record.customer_id
            )));
        }
        if !record.total_spent.is_finite() || record.total_spent < 0.0 {
            return Err(InsightError::validation(format!(
                "row {row}: total_spent must be a non-negative number, got {}",
                record.total_spent
            )));
        }
        if !record.engagement_score.is_finite() {
            return Err(InsightError::validation(format!(
                "row {row}: engagement_score must be a finite number"
            )));
        }
    }
    Ok(())
}

/// Parse the loosely formatted interaction date
fn parse_interaction_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Some(datetime.date_naive());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|datetime| datetime.date())
}

/// Days since last purchase, falling back to the interaction date, then the sentinel
pub fn resolve_recency(record: &CustomerRecord, today: NaiveDate) -> i64 {
    if let Some(days) = record.days_since_last_purchase {
        return days;
    }
    record
        .last_interaction_date
        .as_deref()
        .and_then(parse_interaction_date)
        .map(|date| (today - date).num_days())
        .unwrap_or(MISSING_RECENCY_DAYS)
}

/// Stable categorical codes for industry names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryEncoder {
    /// Sorted distinct names; a name's code is its position
    categories: Vec<String>,
}

impl IndustryEncoder {
    pub fn fit<'a>(industries: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        let mut names: BTreeSet<String> =
            industries.into_iter().map(|name| Self::canonical(name).to_string()).collect();
        names.insert(UNKNOWN_INDUSTRY.to_string());
        Self { categories: names.into_iter().collect() }
    }

    fn canonical(name: Option<&str>) -> &str {
        match name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => UNKNOWN_INDUSTRY,
        }
    }

    pub fn encode(&self, name: Option<&str>) -> u32 {
        let name = Self::canonical(name);
        let position = self
            .categories
            .binary_search_by(|category| category.as_str().cmp(name))
            .or_else(|_| self.categories.binary_search_by(|c| c.as_str().cmp(UNKNOWN_INDUSTRY)))
            .unwrap_or(0);
        position as u32
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }
}

/// Derived numeric features for a single customer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub recency: i64,
    pub frequency: u32,
    pub monetary: f64,
    pub engagement_score: f64,
    pub engagement_normalized: f64,
    pub high_engagement: bool,
    pub low_engagement: bool,
    pub months_since_last_purchase: f64,
    pub recent_activity: bool,
    pub value_score: f64,
    pub industry_encoded: u32,
}

/// Feature table shared by every scorer, rows in input order
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub customer_ids: Vec<String>,
    pub company_names: Vec<String>,
    pub rows: Vec<FeatureRow>,
    pub industry_encoder: IndustryEncoder,
}

impl FeatureTable {
    /// Build features from records; `today` anchors recency derived from dates
    pub fn build(records: &[CustomerRecord], today: NaiveDate) -> Result<Self, InsightError> {
        validate_records(records)?;

        let (min_spent, max_spent) = records.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), record| (lo.min(record.total_spent), hi.max(record.total_spent)),
        );
        let spread = max_spent - min_spent;

        let industry_encoder =
            IndustryEncoder::fit(records.iter().map(|record| record.industry.as_deref()));

        let rows = records
            .iter()
            .map(|record| {
                let recency = resolve_recency(record, today);
                let value_score = if spread > 0.0 {
                    (record.total_spent - min_spent) / spread
                } else {
                    0.0
                };
                FeatureRow {
                    recency,
                    frequency: record.purchase_frequency,
                    monetary: record.total_spent,
                    engagement_score: record.engagement_score,
                    engagement_normalized: record.engagement_score / 100.0,
                    high_engagement: record.engagement_score > 80.0,
                    low_engagement: record.engagement_score < 40.0,
                    months_since_last_purchase: recency as f64 / 30.0,
                    recent_activity: recency < 90,
                    value_score,
                    industry_encoded: industry_encoder.encode(record.industry.as_deref()),
                }
            })
            .collect();

        Ok(Self {
            customer_ids: records.iter().map(|r| r.customer_id.clone()).collect(),
            company_names: records.iter().map(|r| r.company_name.clone()).collect(),
            rows,
            industry_encoder,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw (unscaled) segmentation matrix, columns as in [`SEGMENT_FEATURES`]
    pub fn segmentation_matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.rows.len(), SEGMENT_FEATURES.len()));
        for (mut out, row) in matrix.outer_iter_mut().zip(&self.rows) {
            out[0] = row.recency as f64;
            out[1] = f64::from(row.frequency);
            out[2] = row.monetary;
            out[3] = row.engagement_normalized;
            out[4] = row.value_score;
        }
        matrix
    }

    /// Churn classifier matrix, columns as in [`CHURN_FEATURES`]
    pub fn churn_matrix(&self) -> Array2<f64> {
        let flag = |value: bool| if value { 1.0 } else { 0.0 };
        let mut matrix = Array2::zeros((self.rows.len(), CHURN_FEATURES.len()));
        for (mut out, row) in matrix.outer_iter_mut().zip(&self.rows) {
            out[0] = row.recency as f64;
            out[1] = f64::from(row.frequency);
            out[2] = row.monetary;
            out[3] = row.engagement_normalized;
            out[4] = flag(row.high_engagement);
            out[5] = flag(row.low_engagement);
            out[6] = flag(row.recent_activity);
            out[7] = row.value_score;
        }
        matrix
    }

    pub fn total_spent(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.monetary).collect()
    }
}

/// Linear-interpolated quantile, `q` in [0, 1]; NaN for empty input
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Per-column standardization to zero mean and unit variance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    /// Population standard deviation; zero-variance columns hold 1.0
    pub scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(features: &Array2<f64>) -> Self {
        let n_features = features.ncols();
        if features.nrows() == 0 {
            return Self { mean: Array1::zeros(n_features), scale: Array1::ones(n_features) };
        }
        let mean = features.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|std| if std > f64::EPSILON && std.is_finite() { std } else { 1.0 });
        Self { mean, scale }
    }

    pub fn transform(&self, features: Array2<f64>) -> Array2<f64> {
        (features - &self.mean) / &self.scale
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn record(id: &str, spent: f64, engagement: f64, days: Option<i64>) -> CustomerRecord {
        CustomerRecord {
            total_spent: spent,
            engagement_score: engagement,
            days_since_last_purchase: days,
            purchase_frequency: 2,
            ..CustomerRecord::new(id, format!("{id} Ltd"))
        }
    }

    #[test]
    fn test_validate_records() {
        assert!(validate_records(&[]).is_err());

        let dup = vec![record("a", 1.0, 50.0, None), record("a", 2.0, 50.0, None)];
        assert!(validate_records(&dup).is_err());

        let negative = vec![record("a", -5.0, 50.0, None)];
        assert!(validate_records(&negative).is_err());

        let nan = vec![record("a", 5.0, f64::NAN, None)];
        assert!(validate_records(&nan).is_err());

        assert!(validate_records(&[record("a", 0.0, 10.0, Some(3))]).is_ok());
    }

    #[test]
    fn test_recency_resolution() {
        let mut r = record("a", 1.0, 50.0, Some(12));
        assert_eq!(resolve_recency(&r, today()), 12);

        r.days_since_last_purchase = None;
        r.last_interaction_date = Some("2024-06-20".to_string());
        assert_eq!(resolve_recency(&r, today()), 10);

        r.last_interaction_date = Some("2024-06-29T08:00:00Z".to_string());
        assert_eq!(resolve_recency(&r, today()), 1);

        r.last_interaction_date = Some("not a date".to_string());
        assert_eq!(resolve_recency(&r, today()), MISSING_RECENCY_DAYS);

        r.last_interaction_date = None;
        assert_eq!(resolve_recency(&r, today()), MISSING_RECENCY_DAYS);
    }

    #[test]
    fn test_value_score_bounds() {
        let records = vec![
            record("a", 100.0, 50.0, Some(5)),
            record("b", 600.0, 90.0, Some(100)),
            record("c", 350.0, 30.0, None),
        ];
        let table = FeatureTable::build(&records, today()).unwrap();
        assert_eq!(table.rows[0].value_score, 0.0);
        assert_eq!(table.rows[1].value_score, 1.0);
        assert!((table.rows[2].value_score - 0.5).abs() < 1e-12);

        assert!(table.rows[1].high_engagement);
        assert!(table.rows[2].low_engagement);
        assert!(table.rows[0].recent_activity);
        assert!(!table.rows[1].recent_activity);
        assert_eq!(table.rows[2].recency, MISSING_RECENCY_DAYS);
        assert!((table.rows[1].months_since_last_purchase - 100.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_value_score_constant_spend() {
        let records: Vec<_> =
            (0..5).map(|i| record(&format!("c{i}"), 1000.0, 50.0, Some(30))).collect();
        let table = FeatureTable::build(&records, today()).unwrap();
        assert!(table.rows.iter().all(|row| row.value_score == 0.0));
    }

    #[test]
    fn test_industry_encoder() {
        let encoder = IndustryEncoder::fit([Some("Retail"), None, Some("  "), Some("Finance")]);
        assert_eq!(encoder.categories(), &["Finance", "Retail", "Unknown"]);
        assert_eq!(encoder.encode(Some("Finance")), 0);
        assert_eq!(encoder.encode(Some("Retail")), 1);
        assert_eq!(encoder.encode(None), 2);
        assert_eq!(encoder.encode(Some("Aerospace")), 2);
        assert_eq!(encoder.encode(Some("")), 2);
    }

    #[test]
    fn test_matrices_shape() {
        let records = vec![record("a", 10.0, 85.0, Some(5)), record("b", 20.0, 20.0, Some(200))];
        let table = FeatureTable::build(&records, today()).unwrap();
        let seg = table.segmentation_matrix();
        let churn = table.churn_matrix();
        assert_eq!(seg.shape(), &[2, 5]);
        assert_eq!(churn.shape(), &[2, 8]);
        assert_eq!(seg[[1, 0]], 200.0);
        assert_eq!(churn[[0, 4]], 1.0);
        assert_eq!(churn[[1, 5]], 1.0);
        assert_eq!(churn[[1, 6]], 0.0);
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.5), 3.0);
        assert!((quantile(&values, 0.7) - 3.8).abs() < 1e-12);
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 5.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_standard_scaler() {
        let raw = Array2::from_shape_vec((3, 2), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]).unwrap();
        let scaler = StandardScaler::fit(&raw);
        let scaled = scaler.transform(raw);
        assert!(scaled.column(0).sum().abs() < 1e-12);
        assert!(scaled.column(1).iter().all(|v| *v == 0.0));
        assert!(scaled.iter().all(|v| v.is_finite()));
    }
}
