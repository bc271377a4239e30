//! InsightForge: customer analytics CLI
//!
//! Loads saved models, analyzes a JSON batch of customer records, prints or writes
//! the result, waits for background jobs and saves the refreshed models.

use std::fs;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use insightforge::{Args, CustomerRecord, DispatchOutcome, Dispatcher, ModelCache, Pipeline};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let started = Instant::now();
    let config = args.pipeline_config().context("invalid configuration")?;
    info!(
        capabilities = ?config.capabilities,
        model_dir = %config.model_dir.display(),
        threshold = config.large_dataset_threshold,
        "starting insightforge"
    );

    let cache = if args.no_persist {
        ModelCache::default()
    } else {
        ModelCache::load(&config.model_dir).unwrap_or_else(|err| {
            warn!(error = %err, "could not load saved models, starting fresh");
            ModelCache::default()
        })
    };

    let raw = fs::read(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let records: Vec<CustomerRecord> = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing customer records from {}", args.input.display()))?;
    info!(rows = records.len(), input = %args.input.display(), "loaded customer records");

    let pipeline = Pipeline::new(&config).with_forced_rules(args.force_rules);
    let model_dir = config.model_dir.clone();
    let dispatcher = Dispatcher::new(config, pipeline, cache);

    let outcome = dispatcher.submit(records).await.context("analysis rejected")?;
    if let DispatchOutcome::Queued { job_id } = &outcome {
        info!(job_id = %job_id, "batch queued as background job");
    }

    let json = serde_json::to_string_pretty(&outcome)?;
    match &args.output {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("writing {}", path.display()))?;
            info!(output = %path.display(), "result written");
        }
        None => println!("{json}"),
    }

    dispatcher.drain().await;

    if !args.no_persist {
        if let Err(err) = dispatcher.models().save(&model_dir) {
            warn!(error = %err, "could not save models");
        }
    }

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "done");
    Ok(())
}
