//! Batch runner: publishes one experiment from a JSON job file
//!
//! Prints the run report as JSON on stdout.

use std::path::PathBuf;

use anyhow::Context;
use cellmap_server::{JobConfig, Pipeline};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cellmap-build", version)]
struct Args {
    /// Job file describing cycles, layers and object types
    job: PathBuf,

    /// Replace pyramids and the index snapshot of a previous run
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cellmap=debug,cellmap_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut job = JobConfig::load(&args.job).with_context(|| format!("loading job {:?}", args.job))?;
    job.overwrite |= args.overwrite;
    info!("Loaded job {:?} for experiment '{}'", args.job, job.experiment_id);

    let report = Pipeline::new(job)?.run().context("pipeline run failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
