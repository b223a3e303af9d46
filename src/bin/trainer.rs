use anyhow::Result;
use clap::Parser;
use rentrec::services::routing::CohortRouter;
use rentrec::services::training::preview_labels;
use rentrec::{init_tracing, AppState, Config};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print the label distribution of the preference cohort without training.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    info!("Starting rentrec trainer");

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    info!("Training configuration loaded: {:?}", config.training);

    if args.dry_run {
        let source = rentrec::services::data_source::from_config(&config.data_source)?;
        let (products, users) = futures::try_join!(source.fetch_products(), source.fetch_users())?;
        let cohort = CohortRouter::new(&config.routing).split(&users).preference;
        let distribution = preview_labels(&cohort, &products)?;
        println!("{}", serde_json::to_string_pretty(&distribution)?);
        return Ok(());
    }

    let state = AppState::new(config).await?;
    let report = state.training_service.run().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
