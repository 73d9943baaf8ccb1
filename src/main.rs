//! Command-line sample runner for pg-bulk
//!
//! # Usage Examples
//!
//! ```bash
//! # Create the addresses table
//! pg-bulk setup --connection-string "host=localhost user=postgres password=postgres dbname=testdb"
//!
//! # Time every scenario with 100k rows
//! PGBULK_CONNECTION_STRING="host=localhost user=postgres" pg-bulk run
//!
//! # Only inserts and updates, 10k rows, settings from a file
//! pg-bulk run --scenario insert,update --rows 10000 --config pgbulk.toml
//!
//! # The same calls through the blocking facade
//! pg-bulk run --blocking
//!
//! # Empty the table
//! pg-bulk truncate
//! ```

use clap::{Parser, Subcommand};
use pg_bulk::scenario::{self, Scenario};
use pg_bulk::{ConnectionOpts, RunnerConfig};
use postgresql_bulk::BulkUploader;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "pg-bulk")]
#[command(about = "Bulk load sample records into PostgreSQL over binary COPY")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the sample addresses table
    Setup {
        #[command(flatten)]
        connection: ConnectionOpts,
    },

    /// Run timed loader scenarios against the sample table
    Run {
        #[command(flatten)]
        connection: ConnectionOpts,

        /// Scenarios to run, comma separated; all of them by default
        #[arg(long, value_enum, value_delimiter = ',')]
        scenario: Vec<Scenario>,

        /// Rows generated per scenario
        #[arg(long)]
        rows: Option<usize>,

        /// Run insert, update and import through the blocking facade instead
        #[arg(long, default_value = "false")]
        blocking: bool,
    },

    /// Remove every row from the sample table
    Truncate {
        #[command(flatten)]
        connection: ConnectionOpts,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Setup { connection } => {
            let config = RunnerConfig::load(&connection)?;
            let mut uploader =
                BulkUploader::connect(config.connection_string()?, config.bulk.clone()).await?;
            scenario::setup(&mut uploader).await?;
        }
        Commands::Run {
            connection,
            scenario,
            rows,
            blocking,
        } => {
            let config = RunnerConfig::load(&connection)?;
            let rows = config.rows(rows);
            let scenarios = if scenario.is_empty() {
                Scenario::ALL.to_vec()
            } else {
                scenario
            };
            let started = Instant::now();

            if blocking {
                let connection_string = config.connection_string()?.to_string();
                let bulk = config.bulk.clone();
                tokio::task::spawn_blocking(move || {
                    scenario::run_blocking(&connection_string, bulk, rows)
                })
                .await??;
            } else {
                let mut uploader =
                    BulkUploader::connect(config.connection_string()?, config.bulk.clone()).await?;
                scenario::run(&mut uploader, &scenarios, rows).await?;
            }

            println!("Finished in {:?}", started.elapsed());
        }
        Commands::Truncate { connection } => {
            let config = RunnerConfig::load(&connection)?;
            let mut uploader =
                BulkUploader::connect(config.connection_string()?, config.bulk.clone()).await?;
            scenario::truncate(&mut uploader).await?;
            tracing::info!("Truncated addresses");
        }
    }

    Ok(())
}
