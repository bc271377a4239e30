//! Integration tests for InsightForge

use std::collections::HashSet;

use chrono::NaiveDate;
use insightforge::churn::{generate_labels, predict_batched, ChurnModel, TrainingParams};
use insightforge::data::quantile;
use insightforge::segment::SegmentationEngine;
use insightforge::upsell::{detect_opportunities, upsell_score};
use insightforge::{
    ClassifierBackend, CustomerRecord, DispatchOutcome, Dispatcher, FeatureTable, ModelCache,
    Pipeline, PipelineConfig,
};
use ndarray::Axis;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

fn customer(id: usize, spent: f64, engagement: f64, frequency: u32, days: i64) -> CustomerRecord {
    CustomerRecord {
        total_spent: spent,
        engagement_score: engagement,
        purchase_frequency: frequency,
        days_since_last_purchase: Some(days),
        ..CustomerRecord::new(format!("cust-{id:04}"), format!("Company {id}"))
    }
}

/// Three well-separated behavioral groups with some jitter
fn crm_batch(n: usize) -> Vec<CustomerRecord> {
    (0..n)
        .map(|i| {
            let jitter = (i % 10) as f64;
            match i % 3 {
                0 => customer(i, 180_000.0 + 1_000.0 * jitter, 90.0 + jitter / 2.0, 12, 5 + i as i64 % 20),
                1 => customer(i, 20_000.0 + 500.0 * jitter, 55.0 + jitter, 4, 60 + i as i64 % 30),
                _ => customer(i, 800.0 + 50.0 * jitter, 15.0 + jitter, i as u32 % 2, 250 + i as i64 % 60),
            }
        })
        .collect()
}

#[test]
fn test_end_to_end_pipeline() {
    let records = crm_batch(300);
    let pipeline = Pipeline::new(&PipelineConfig::default());
    let mut cache = ModelCache::default();

    let result = pipeline.run_with_today(&records, today(), &mut cache).unwrap();

    assert_eq!(result.processed_count, 300);
    assert_eq!(result.churn_predictions.len(), 300);
    assert!(result
        .churn_predictions
        .iter()
        .all(|p| (0.0..=1.0).contains(&p.churn_probability) && p.key_factors.len() <= 3));

    // Segments partition the input exactly
    let mut seen = HashSet::new();
    for segment in &result.segments {
        assert_eq!(segment.count, segment.customers.len());
        for id in &segment.customers {
            assert!(seen.insert(id.clone()), "{id} appears in two segments");
        }
    }
    assert_eq!(seen.len(), 300);

    assert!(cache.scaler.is_some());
    assert!(cache.clusterer.is_some());
    assert!(cache.churn_model.is_some());
    assert!(cache.last_trained_at.is_some());
}

#[test]
fn test_constant_small_batch_is_growth_potential() {
    let records: Vec<_> = (0..10).map(|i| customer(i, 1_000.0, 50.0, 1, 30)).collect();
    let pipeline = Pipeline::new(&PipelineConfig::default());
    let result = pipeline
        .run_with_today(&records, today(), &mut ModelCache::default())
        .unwrap();

    assert_eq!(result.segments.len(), 1);
    let segment = &result.segments[0];
    assert_eq!(segment.name, "Growth Potential");
    assert_eq!(segment.count, 10);
    assert_eq!(segment.revenue, 10_000.0);

    let table = FeatureTable::build(&records, today()).unwrap();
    assert!(table.rows.iter().all(|row| row.value_score == 0.0));
}

#[test]
fn test_value_score_spans_unit_interval() {
    let records = crm_batch(30);
    let table = FeatureTable::build(&records, today()).unwrap();
    let (min_row, max_row) = table.rows.iter().enumerate().fold((0, 0), |(lo, hi), (i, row)| {
        let lo = if row.monetary < table.rows[lo].monetary { i } else { lo };
        let hi = if row.monetary > table.rows[hi].monetary { i } else { hi };
        (lo, hi)
    });
    assert_eq!(table.rows[min_row].value_score, 0.0);
    assert_eq!(table.rows[max_row].value_score, 1.0);
    assert!(table.rows.iter().all(|row| (0.0..=1.0).contains(&row.value_score)));
}

#[test]
fn test_labels_are_always_two_class() {
    let identical: Vec<_> = (0..25).map(|i| customer(i, 500.0, 50.0, 2, 40)).collect();
    let all_risky: Vec<_> = (0..25).map(|i| customer(i, 10.0 * i as f64, 5.0, 0, 400)).collect();
    let pair = vec![customer(0, 1.0, 90.0, 3, 1), customer(1, 1.0, 90.0, 3, 1)];

    for records in [identical, all_risky, pair] {
        let table = FeatureTable::build(&records, today()).unwrap();
        let labels = generate_labels(&table);
        let positives = labels.positives();
        assert!(positives > 0 && positives < records.len(), "single-class target");
    }
}

#[test]
fn test_composite_one_is_always_labeled_churn() {
    let mut records: Vec<_> = (1..10).map(|i| customer(i, 100.0 * (i + 1) as f64, 70.0, 4, 20)).collect();
    records.push(customer(0, 100.0, 20.0, 0, 200));

    let table = FeatureTable::build(&records, today()).unwrap();
    let spend = table.total_spent();
    assert!(spend[9] < quantile(&spend, 0.3));

    let labels = generate_labels(&table);
    assert!((labels.composite[9] - 1.0).abs() < 1e-12);
    assert_eq!(labels.labels[9], 1);
}

#[test]
fn test_batched_inference_matches_single_shot() {
    let records = crm_batch(120);
    let table = FeatureTable::build(&records, today()).unwrap();
    let labels = generate_labels(&table);
    let x = table.churn_matrix();

    for backend in [ClassifierBackend::GradientBoosting, ClassifierBackend::BaggedTrees] {
        let mut params = TrainingParams::default();
        params.bagging.n_estimators = 12;
        let model = ChurnModel::train(backend, x.view(), &labels.labels, &params).unwrap();

        let single = predict_batched(&model, &x, x.len_of(Axis(0)));
        for batch_size in [1, 16, 119] {
            assert_eq!(predict_batched(&model, &x, batch_size), single, "{backend:?} batch {batch_size}");
        }
    }
}

#[test]
fn test_upsell_filter_and_order() {
    let records = crm_batch(90);
    let table = FeatureTable::build(&records, today()).unwrap();
    let opportunities = detect_opportunities(&table);

    assert!(!opportunities.is_empty());
    assert!(opportunities.iter().all(|o| o.upsell_score > 0.6 && o.upsell_score <= 1.0));
    assert!(opportunities.windows(2).all(|w| w[0].upsell_score >= w[1].upsell_score));
    assert!(table.rows.iter().all(|row| (0.0..=1.0).contains(&upsell_score(row))));
}

#[test]
fn test_cached_clusterer_assigns_new_rows() {
    let records = crm_batch(150);
    let config = PipelineConfig::default();
    let table = FeatureTable::build(&records, today()).unwrap();
    let mut cache = ModelCache::default();
    let outcome = SegmentationEngine::from_config(&config)
        .segment(&table, &mut cache, false)
        .unwrap();

    let scaler = cache.scaler.as_ref().unwrap();
    let clusterer = cache.clusterer.as_ref().unwrap();
    let predicted = clusterer
        .predict(scaler.transform(table.segmentation_matrix()).view())
        .unwrap();
    assert_eq!(predicted.to_vec(), outcome.labels);
}

#[test]
fn test_result_wire_shape() {
    let records = crm_batch(12);
    let result = Pipeline::new(&PipelineConfig::default())
        .run_with_today(&records, today(), &mut ModelCache::default())
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();

    for key in ["segments", "churn_predictions", "upsell_opportunities", "insights", "processed_count", "timestamp"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    let segment = &json["segments"][0];
    assert!(segment.get("avgEngagement").is_some());
    assert!(segment.get("avgValue").is_some());
    assert!(segment.get("id").is_none());
    let risk = json["churn_predictions"][0]["risk_level"].as_str().unwrap();
    assert!(["Low Risk", "Medium Risk", "High Risk"].contains(&risk));
}

#[tokio::test]
async fn test_dispatch_threshold_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        large_dataset_threshold: 60,
        model_dir: dir.path().join("models"),
        staging_dir: dir.path().join("staging"),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(&config);
    let dispatcher = Dispatcher::new(config, pipeline, ModelCache::default());

    let inline = dispatcher.submit(crm_batch(60)).await.unwrap();
    assert!(matches!(inline, DispatchOutcome::Completed(ref result) if result.processed_count == 60));

    let job_id = match dispatcher.submit(crm_batch(61)).await.unwrap() {
        DispatchOutcome::Queued { job_id } => job_id,
        DispatchOutcome::Completed(_) => panic!("threshold + 1 rows must be queued"),
    };
    dispatcher.drain().await;

    let result = dispatcher.job_result(&job_id).unwrap().unwrap();
    assert_eq!(result.processed_count, 61);
    assert_eq!(std::fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);

    // Models published by the runs survive a save/load round trip
    let saved = dir.path().join("saved");
    dispatcher.models().save(&saved).unwrap();
    let loaded = ModelCache::load(&saved).unwrap();
    assert!(loaded.scaler.is_some() && loaded.churn_model.is_some());
}
