//! CLI entry point.
//!
//! One subcommand per report plus `serve` for the dashboard. Reports always
//! exit successfully: connection and query failures are logged and the
//! affected output is left empty.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use readmission_insights::{
    config::{DEFAULT_LOG_FILE, ServeArgs, SourceArgs},
    console, logging,
    record::load_csv,
    server::{self, AppState},
    store::{MemoryStore, MongoStore, RecordStore},
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "readmission_insights")]
#[command(about = "Readmission statistics over hospital patient-visit records", long_about = None)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    /// JSON log file; rotated daily
    #[arg(long, env = "LOG_FILE_PATH", default_value = DEFAULT_LOG_FILE)]
    log_file: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard page and its JSON API
    Serve(ServeArgs),
    #[command(flatten)]
    Report(ReportCommand),
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Print the number of stored records
    Explore,
    /// Basic analysis: totals, readmission rates, average stay
    Analyze,
    /// Long stays, age, medication, insulin and race breakdowns
    Questions,
    /// Advanced summary report
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_file);

    match cli.command {
        Commands::Serve(args) => {
            let addr = args.socket_addr().await?;
            let store = match open_store(&cli.source).await {
                Ok(store) => Some(store),
                Err(e) => {
                    error!(error = %e, "Record store connection failed");
                    warn!("Serving in degraded mode: /api/stats will return 500");
                    None
                }
            };
            server::run(addr, AppState::new(store)).await?;
        }
        Commands::Report(report) => {
            let store = match open_store(&cli.source).await {
                Ok(store) => store,
                Err(e) => {
                    error!(error = %e, "Record store connection failed");
                    println!("Connection failed: {e}");
                    return Ok(());
                }
            };
            let store = store.as_ref();
            let text = match report {
                ReportCommand::Explore => console::explore(store).await,
                ReportCommand::Analyze => console::analyze(store).await,
                ReportCommand::Questions => console::questions(store).await,
                ReportCommand::Summary => console::summary(store, Utc::now()).await,
            };
            print!("{text}");
        }
    }

    Ok(())
}

/// Opens the CSV-backed store when `--csv` is given, otherwise the document store.
#[tracing::instrument(skip_all)]
async fn open_store(source: &SourceArgs) -> Result<Arc<dyn RecordStore>> {
    if let Some(path) = &source.csv {
        let records = load_csv(path)?;
        let store = MemoryStore::from_records(&records)?;
        info!(path = %path.display(), records = store.len(), "Loaded records from CSV");
        return Ok(Arc::new(store));
    }

    let store = MongoStore::connect(&source.store_config()).await?;
    Ok(Arc::new(store))
}
