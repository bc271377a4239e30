//! Size-based dispatch: small batches run inline, large ones become background jobs

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use polars::df;
use polars::prelude::*;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::ModelCache;
use crate::config::PipelineConfig;
use crate::data::{validate_records, CustomerRecord};
use crate::error::InsightError;
use crate::pipeline::{AnalysisResult, Pipeline};

/// What the caller gets back from [`Dispatcher::submit`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DispatchOutcome {
    Completed(Box<AnalysisResult>),
    Queued { job_id: String },
}

/// Input rows staged on disk for a background job; the file goes away on drop
#[derive(Debug)]
pub struct StagedInput {
    path: PathBuf,
}

impl StagedInput {
    /// Write `records` as a Parquet file named after the job
    pub fn write(dir: &Path, job_id: &str, records: &[CustomerRecord]) -> crate::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{job_id}_input.parquet"));

        let mut df = df!(
            "customer_id" => records.iter().map(|r| r.customer_id.as_str()).collect::<Vec<_>>(),
            "company_name" => records.iter().map(|r| r.company_name.as_str()).collect::<Vec<_>>(),
            "industry" => records.iter().map(|r| r.industry.as_deref()).collect::<Vec<_>>(),
            "total_spent" => records.iter().map(|r| r.total_spent).collect::<Vec<_>>(),
            "engagement_score" => records.iter().map(|r| r.engagement_score).collect::<Vec<_>>(),
            "last_interaction_date" => records
                .iter()
                .map(|r| r.last_interaction_date.as_deref())
                .collect::<Vec<_>>(),
            "purchase_frequency" => records.iter().map(|r| r.purchase_frequency).collect::<Vec<_>>(),
            "days_since_last_purchase" => records
                .iter()
                .map(|r| r.days_since_last_purchase)
                .collect::<Vec<_>>()
        )?;

        // Guard exists before the write so a partial file is still removed
        let staged = Self { path };
        let file = File::create(&staged.path)?;
        ParquetWriter::new(file).finish(&mut df)?;
        debug!(path = %staged.path.display(), rows = records.len(), "staged input");
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the staged rows back in their original order
    pub fn read(&self) -> crate::Result<Vec<CustomerRecord>> {
        let file = File::open(&self.path)?;
        let df = ParquetReader::new(file).finish()?;

        let ids: Vec<Option<&str>> = df.column("customer_id")?.str()?.into_iter().collect();
        let names: Vec<Option<&str>> = df.column("company_name")?.str()?.into_iter().collect();
        let industries: Vec<Option<&str>> = df.column("industry")?.str()?.into_iter().collect();
        let spent: Vec<Option<f64>> = df.column("total_spent")?.f64()?.into_iter().collect();
        let engagement: Vec<Option<f64>> =
            df.column("engagement_score")?.f64()?.into_iter().collect();
        let dates: Vec<Option<&str>> =
            df.column("last_interaction_date")?.str()?.into_iter().collect();
        let frequency: Vec<Option<u32>> =
            df.column("purchase_frequency")?.u32()?.into_iter().collect();
        let days: Vec<Option<i64>> =
            df.column("days_since_last_purchase")?.i64()?.into_iter().collect();

        (0..df.height())
            .map(|i| {
                let missing = |column: &str| {
                    InsightError::persistence(format!("staged row {i} has no {column}"))
                };
                Ok(CustomerRecord {
                    customer_id: ids[i].ok_or_else(|| missing("customer_id"))?.to_string(),
                    company_name: names[i].ok_or_else(|| missing("company_name"))?.to_string(),
                    industry: industries[i].map(str::to_string),
                    total_spent: spent[i].ok_or_else(|| missing("total_spent"))?,
                    engagement_score: engagement[i].ok_or_else(|| missing("engagement_score"))?,
                    last_interaction_date: dates[i].map(str::to_string),
                    purchase_frequency: frequency[i].unwrap_or(0),
                    days_since_last_purchase: days[i],
                })
            })
            .collect()
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed staged input"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove staged input"
            ),
        }
    }
}

/// Routes each request to inline or background execution by row count
pub struct Dispatcher {
    config: Arc<PipelineConfig>,
    pipeline: Arc<Pipeline>,
    cache: Arc<Mutex<ModelCache>>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn result_path(dir: &Path, job_id: &str) -> PathBuf {
    dir.join(format!("{job_id}_results.json"))
}

/// Write the result beside its final name, then rename, so readers never see a partial file
fn write_result(dir: &Path, job_id: &str, result: &AnalysisResult) -> crate::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = result_path(dir, job_id);
    let partial = dir.join(format!("{job_id}_results.json.tmp"));
    fs::write(&partial, serde_json::to_vec_pretty(result)?)?;
    fs::rename(&partial, &path)?;
    Ok(path)
}

/// Drop handles of jobs that already ran to completion
fn prune_finished(jobs: &mut Vec<JoinHandle<()>>) {
    jobs.retain(|handle| !handle.is_finished());
}

impl Dispatcher {
    pub fn new(config: PipelineConfig, pipeline: Pipeline, cache: ModelCache) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            cache: Arc::new(Mutex::new(cache)),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of the most recently published models
    pub fn models(&self) -> ModelCache {
        lock(&self.cache).clone()
    }

    /// Validate and run `records`, inline when small and in the background when large
    pub async fn submit(&self, records: Vec<CustomerRecord>) -> crate::Result<DispatchOutcome> {
        validate_records(&records)?;
        let rows = records.len();

        if rows > self.config.large_dataset_threshold {
            let job_id = format!("job_{}", Uuid::new_v4());
            let staging_dir = self.config.staging_dir.clone();
            let staged = {
                let job_id = job_id.clone();
                tokio::task::spawn_blocking(move || StagedInput::write(&staging_dir, &job_id, &records))
                    .await
                    .map_err(|err| InsightError::persistence(format!("staging task failed: {err}")))??
            };

            let pipeline = Arc::clone(&self.pipeline);
            let cache = Arc::clone(&self.cache);
            let results_dir = self.config.results_dir();
            let background_id = job_id.clone();
            let handle = tokio::task::spawn_blocking(move || {
                run_job(&background_id, staged, &pipeline, &cache, &results_dir);
            });
            {
                let mut jobs = lock(&self.jobs);
                prune_finished(&mut jobs);
                jobs.push(handle);
            }

            info!(job_id = %job_id, rows, "queued background analysis");
            return Ok(DispatchOutcome::Queued { job_id });
        }

        let pipeline = Arc::clone(&self.pipeline);
        let cache = Arc::clone(&self.cache);
        let result = tokio::task::spawn_blocking(move || {
            let mut run_cache = ModelCache::default();
            let result = pipeline.run(&records, &mut run_cache)?;
            lock(&cache).publish(run_cache);
            Ok::<_, InsightError>(result)
        })
        .await
        .map_err(|err| InsightError::computation(format!("analysis task failed: {err}")))??;

        Ok(DispatchOutcome::Completed(Box::new(result)))
    }

    /// Wait for every background job submitted so far
    pub async fn drain(&self) {
        let handles = std::mem::take(&mut *lock(&self.jobs));
        if !handles.is_empty() {
            info!(jobs = handles.len(), "waiting for background jobs");
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "background job panicked");
            }
        }
    }

    /// Finished result of a background job, `None` while it is still running
    pub fn job_result(&self, job_id: &str) -> crate::Result<Option<AnalysisResult>> {
        let well_formed = job_id.starts_with("job_")
            && job_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !well_formed {
            return Err(InsightError::validation(format!("malformed job id {job_id:?}")));
        }

        let path = result_path(&self.config.results_dir(), job_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// Body of a background job; failures are logged, never returned
fn run_job(
    job_id: &str,
    staged: StagedInput,
    pipeline: &Pipeline,
    cache: &Mutex<ModelCache>,
    results_dir: &Path,
) {
    info!(job_id, "background analysis started");
    let outcome = staged.read().and_then(|records| {
        let mut run_cache = ModelCache::default();
        let result = pipeline.run(&records, &mut run_cache)?;
        lock(cache).publish(run_cache);
        write_result(results_dir, job_id, &result)
    });

    match outcome {
        Ok(path) => info!(job_id, path = %path.display(), "background analysis finished"),
        Err(err) => error!(job_id, kind = err.kind(), error = %err, "background analysis failed"),
    }
    drop(staged);
}
