//! Fitted models shared between runs, with optional JSON persistence

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::churn::ChurnModel;
use crate::data::StandardScaler;
use crate::error::InsightError;
use crate::model::ClusterModel;

const SCALER_FILE: &str = "scaler.json";
const CLUSTERER_FILE: &str = "clusterer.json";
const CHURN_MODEL_FILE: &str = "churn_model.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Metadata {
    last_trained_at: Option<DateTime<Utc>>,
}

/// Most recently fitted artifacts; a run fills a fresh cache that is then published whole
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCache {
    pub scaler: Option<StandardScaler>,
    pub clusterer: Option<ClusterModel>,
    pub churn_model: Option<ChurnModel>,
    pub last_trained_at: Option<DateTime<Utc>>,
}

impl ModelCache {
    pub fn is_empty(&self) -> bool {
        self.scaler.is_none() && self.clusterer.is_none() && self.churn_model.is_none()
    }

    /// Adopt the models a finished run produced
    ///
    /// The scaler and clusterer share one standardized space, so a run that fitted a
    /// scaler replaces both, leaving no clusterer when it segmented by rules. A run that
    /// fell back to heuristic churn scores keeps the previous churn model.
    pub fn publish(&mut self, run: ModelCache) {
        if run.scaler.is_some() {
            self.scaler = run.scaler;
            self.clusterer = run.clusterer;
        }
        if run.churn_model.is_some() {
            self.churn_model = run.churn_model;
            self.last_trained_at = run.last_trained_at;
        }
    }

    /// Write each present model to its own file under `dir`, removing files of absent ones
    pub fn save(&self, dir: &Path) -> crate::Result<()> {
        fs::create_dir_all(dir).map_err(|err| {
            InsightError::persistence(format!("creating {}: {err}", dir.display()))
        })?;

        write_json(dir, SCALER_FILE, self.scaler.as_ref())?;
        write_json(dir, CLUSTERER_FILE, self.clusterer.as_ref())?;
        write_json(dir, CHURN_MODEL_FILE, self.churn_model.as_ref())?;
        write_json(
            dir,
            METADATA_FILE,
            Some(&Metadata { last_trained_at: self.last_trained_at }),
        )?;

        info!(dir = %dir.display(), "saved models");
        Ok(())
    }

    /// Load whatever model files exist under `dir`; absent files leave the slot empty
    pub fn load(dir: &Path) -> crate::Result<Self> {
        let metadata: Metadata = read_json(dir, METADATA_FILE)?.unwrap_or_default();
        let cache = Self {
            scaler: read_json(dir, SCALER_FILE)?,
            clusterer: read_json(dir, CLUSTERER_FILE)?,
            churn_model: read_json(dir, CHURN_MODEL_FILE)?,
            last_trained_at: metadata.last_trained_at,
        };
        info!(
            dir = %dir.display(),
            scaler = cache.scaler.is_some(),
            clusterer = cache.clusterer.is_some(),
            churn_model = cache.churn_model.is_some(),
            "loaded models"
        );
        Ok(cache)
    }
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: Option<&T>) -> crate::Result<()> {
    let path = dir.join(name);
    let Some(value) = value else {
        if path.exists() {
            fs::remove_file(&path).map_err(|err| {
                InsightError::persistence(format!("removing {}: {err}", path.display()))
            })?;
        }
        return Ok(());
    };
    let json = serde_json::to_vec(value)?;
    fs::write(&path, json)
        .map_err(|err| InsightError::persistence(format!("writing {}: {err}", path.display())))
}

fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> crate::Result<Option<T>> {
    let path = dir.join(name);
    if !path.exists() {
        debug!(path = %path.display(), "no saved model");
        return Ok(None);
    }
    let bytes = fs::read(&path)
        .map_err(|err| InsightError::persistence(format!("reading {}: {err}", path.display())))?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|err| InsightError::persistence(format!("parsing {}: {err}", path.display())))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::churn::{ProbabilisticClassifier, TrainingParams};
    use crate::config::ClassifierBackend;
    use ndarray::{array, Array2};

    fn trained_cache() -> ModelCache {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| (i * (j + 1)) as f64);
        let y: Vec<usize> = (0..40).map(|i| usize::from(i >= 25)).collect();
        let churn_model = ChurnModel::train(
            ClassifierBackend::GradientBoosting,
            x.view(),
            &y,
            &TrainingParams::default(),
        )
        .unwrap();
        ModelCache {
            scaler: Some(StandardScaler::fit(&x)),
            clusterer: Some(ClusterModel {
                n_clusters: 2,
                centroids: array![[0.0, 0.0], [1.0, 1.0]],
                inertia: 3.5,
                labels: Default::default(),
            }),
            churn_model: Some(churn_model),
            last_trained_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = trained_cache();
        cache.save(dir.path()).unwrap();

        let loaded = ModelCache::load(dir.path()).unwrap();
        assert_eq!(loaded.last_trained_at, cache.last_trained_at);
        assert_eq!(loaded.clusterer.as_ref().unwrap().centroids, array![[0.0, 0.0], [1.0, 1.0]]);
        assert_eq!(loaded.scaler.as_ref().unwrap().n_features(), 2);

        let probe = array![[3.0, 6.0], [35.0, 70.0]];
        let before = cache.churn_model.unwrap().predict_proba(probe.view());
        let after = loaded.churn_model.unwrap().predict_proba(probe.view());
        assert!(before.iter().zip(after.iter()).all(|(a, b)| (a - b).abs() < 1e-9));
    }

    #[test]
    fn test_load_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ModelCache::load(&dir.path().join("nothing-here")).unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.last_trained_at.is_none());
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SCALER_FILE), b"{not json").unwrap();
        let err = ModelCache::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "persistence");
    }

    #[test]
    fn test_rule_run_clears_stale_clusterer() {
        let mut shared = trained_cache();
        let run = ModelCache {
            scaler: Some(StandardScaler::fit(&array![[1.0], [3.0]])),
            ..Default::default()
        };
        shared.publish(run);

        assert_eq!(shared.scaler.as_ref().unwrap().n_features(), 1);
        assert!(shared.clusterer.is_none());
        // heuristic churn run leaves the trained classifier in place
        assert!(shared.churn_model.is_some());
        assert!(shared.last_trained_at.is_some());
    }

    #[test]
    fn test_saved_models_never_mix_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut shared = trained_cache();
        shared.save(dir.path()).unwrap();

        shared.publish(ModelCache {
            scaler: Some(StandardScaler::fit(&array![[1.0], [3.0]])),
            ..Default::default()
        });
        shared.save(dir.path()).unwrap();

        let loaded = ModelCache::load(dir.path()).unwrap();
        assert_eq!(loaded.scaler.unwrap().n_features(), 1);
        assert!(loaded.clusterer.is_none());
        assert!(loaded.churn_model.is_some());
    }

    #[test]
    fn test_publish_keeps_scaler_and_clusterer_paired() {
        let mut shared = trained_cache();
        let run = trained_cache();
        let expected_mean = run.scaler.as_ref().unwrap().mean.clone();
        shared.publish(run);

        let scaler = shared.scaler.as_ref().unwrap();
        let clusterer = shared.clusterer.as_ref().unwrap();
        assert_eq!(scaler.mean, expected_mean);
        assert_eq!(scaler.n_features(), clusterer.centroids.ncols());
    }
}
