use anyhow::Result;
use clap::{Parser, ValueEnum};
use rentrec::services::data_source::{self, SnapshotSource};
use rentrec::services::routing::CohortRouter;
use rentrec::{init_tracing, AppState, Config};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WorkerType {
    /// Fetch from the data source and write cohort snapshots.
    Snapshot,
    /// Rebuild the index, recommend for the behavioral cohort and deliver.
    Recommend,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(short, long, value_enum, default_value = "recommend")]
    worker_type: WorkerType,

    /// Snapshot output directory; defaults to `data_source.snapshot_dir`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rayon threads for similarity and retrieval; defaults to the CPU count.
    #[arg(long)]
    threads: Option<usize>,

    /// Repeat the job every N seconds instead of running once.
    #[arg(long)]
    every_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting rentrec worker: {:?}", args.worker_type);

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    let threads = args.threads.unwrap_or_else(num_cpus::get).max(1);
    rayon::ThreadPoolBuilder::new().num_threads(threads).build_global()?;

    let state = AppState::new(config.clone()).await?;

    loop {
        let outcome = match args.worker_type {
            WorkerType::Snapshot => run_snapshot(&config, args.output.clone()).await,
            WorkerType::Recommend => run_recommend(&state).await,
        };
        if let Err(e) = &outcome {
            error!("Worker job failed: {:#}", e);
        }

        match args.every_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => return outcome,
        }
    }
}

async fn run_snapshot(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let source = data_source::from_config(&config.data_source)?;
    let dataset = source.fetch_dataset().await?;

    let router = CohortRouter::new(&config.routing);
    let (preference, behavioral) = router.split_dataset(&dataset);

    let dir = output.unwrap_or_else(|| config.data_source.snapshot_dir.clone());
    SnapshotSource::new(&dir)
        .write_cohort_snapshots(&dataset, &preference, &behavioral)
        .await?;
    info!(
        "Snapshot written to {}: {} preference users, {} behavioral users",
        dir.display(),
        preference.users.len(),
        behavioral.users.len()
    );
    Ok(())
}

async fn run_recommend(state: &AppState) -> Result<()> {
    let summary = state.recommendation_service.refresh().await?;
    info!("Index generation {} ready", summary.generation);

    let report = state.recommendation_service.run_batch().await?;
    info!(
        "Batch for generation {}: {} users, {} delivered, {} failed",
        report.generation,
        report.users,
        report.delivery.delivered,
        report.delivery.failed.len()
    );
    Ok(())
}
