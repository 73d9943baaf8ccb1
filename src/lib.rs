//! Sample runner for the pg-bulk loader.
//!
//! Drives the loader against an `addresses` table: plain and derived
//! inserts with generated-key readback, keyed updates, upserts and
//! transaction scopes, printing the elapsed time of each step.

use anyhow::Context;
use clap::Parser;
use postgresql_bulk::BulkConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub mod sample;
pub mod scenario;

/// Rows generated per scenario when neither the command line nor the
/// config file says otherwise.
pub const DEFAULT_ROWS: usize = 100_000;

/// Connection options shared by every subcommand
#[derive(Parser, Debug, Clone, Default)]
pub struct ConnectionOpts {
    /// PostgreSQL connection string, e.g. "host=localhost user=postgres"
    #[arg(long, env = "PGBULK_CONNECTION_STRING")]
    pub connection_string: Option<String>,

    /// TOML config file with connection and `[bulk]` settings
    #[arg(long, env = "PGBULK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Runner configuration file.
///
/// ```toml
/// connection_string = "host=localhost user=postgres password=postgres dbname=testdb"
/// rows = 100000
///
/// [bulk]
/// read_back_generated = true
/// unmatched_update = "ignore"
/// statement_timeout = "5m"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub connection_string: Option<String>,
    pub rows: Option<usize>,
    pub bulk: BulkConfig,
}

impl RunnerConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse runner config")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid config file {path:?}"))
    }

    /// Load the file named by `opts`, if any; the command line's connection
    /// string wins over the file's.
    pub fn load(opts: &ConnectionOpts) -> anyhow::Result<Self> {
        let mut config = match &opts.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(connection_string) = &opts.connection_string {
            config.connection_string = Some(connection_string.clone());
        }
        Ok(config)
    }

    pub fn connection_string(&self) -> anyhow::Result<&str> {
        self.connection_string.as_deref().context(
            "No connection string: pass --connection-string, set PGBULK_CONNECTION_STRING or add it to the config file",
        )
    }

    pub fn rows(&self, overridden: Option<usize>) -> usize {
        overridden.or(self.rows).unwrap_or(DEFAULT_ROWS)
    }
}
