//! Throwaway PostgreSQL server in Docker for the integration tests.

use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

/// Stock image the integration tests run against.
pub const DEFAULT_IMAGE: &str = "postgres:16";

/// Server flags that trade durability for load speed; the data is
/// discarded with the container anyway.
const SCRATCH_SETTINGS: &[(&str, &str)] = &[
    ("fsync", "off"),
    ("synchronous_commit", "off"),
    ("full_page_writes", "off"),
    ("max_wal_size", "1GB"),
];

/// A named PostgreSQL container bound to a host port.
///
/// The container is removed on drop.
pub struct PostgresContainer {
    pub container_name: String,
    pub host_port: u16,
    pub image_name: String,
    /// libpq-style connection string for the `testdb` database
    pub connection_string: String,
    settings: Vec<(String, String)>,
}

impl PostgresContainer {
    pub fn new(container_name: &str, host_port: u16) -> Self {
        Self {
            container_name: container_name.to_string(),
            host_port,
            image_name: DEFAULT_IMAGE.to_string(),
            connection_string: format!(
                "host=localhost port={host_port} user=postgres password=postgres dbname=testdb",
            ),
            settings: SCRATCH_SETTINGS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Use a different image, e.g. another PostgreSQL major version.
    pub fn with_image(mut self, image: &str) -> Self {
        self.image_name = image.to_string();
        self
    }

    /// Pass `-c name=value` to the server, replacing an earlier value.
    pub fn with_setting(mut self, name: &str, value: &str) -> Self {
        self.settings.retain(|(k, _)| k != name);
        self.settings.push((name.to_string(), value.to_string()));
        self
    }

    fn docker(args: &[&str]) -> Result<Output> {
        Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run docker {}", args.first().unwrap_or(&"")))
    }

    /// Replace any container of the same name and start a fresh server.
    pub fn start(&self) -> Result<()> {
        // A leftover from an aborted run would hold the name and the port.
        let _ = Self::docker(&["rm", "-f", &self.container_name]);

        let port = format!("{}:5432", self.host_port);
        let flags: Vec<String> = self
            .settings
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut args: Vec<&str> = vec![
            "run",
            "-d",
            "--name",
            self.container_name.as_str(),
            "-e",
            "POSTGRES_USER=postgres",
            "-e",
            "POSTGRES_PASSWORD=postgres",
            "-e",
            "POSTGRES_DB=testdb",
            "-p",
            port.as_str(),
            self.image_name.as_str(),
        ];
        for flag in &flags {
            args.push("-c");
            args.push(flag);
        }

        let output = Self::docker(&args)?;
        if !output.status.success() {
            anyhow::bail!(
                "Failed to start container {}: {}",
                self.container_name,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        info!(
            container = %self.container_name,
            image = %self.image_name,
            port = self.host_port,
            "Started PostgreSQL container"
        );
        Ok(())
    }

    /// Poll until the server accepts queries or `timeout_secs` pass.
    pub async fn wait_until_ready(&self, timeout_secs: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.server_version().await {
                Ok(version) => {
                    info!(attempts, %version, "PostgreSQL is ready");
                    return Ok(());
                }
                Err(e) if Instant::now() < deadline => {
                    debug!("PostgreSQL not ready yet: {e:#}");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => {
                    warn!("Container logs:\n{}", self.logs().unwrap_or_default());
                    return Err(e).context(format!(
                        "PostgreSQL did not become ready within {timeout_secs} seconds"
                    ));
                }
            }
        }
    }

    async fn server_version(&self) -> Result<String> {
        let client = self.connect().await?;
        let row = client.query_one("SHOW server_version", &[]).await?;
        Ok(row.get(0))
    }

    /// A plain client for setup and assertions, its connection driven on a
    /// spawned task.
    pub async fn connect(&self) -> Result<Client> {
        let (client, connection) = tokio_postgres::connect(&self.connection_string, NoTls)
            .await
            .with_context(|| format!("Failed to connect to {}", self.container_name))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Test connection closed: {e}");
            }
        });
        Ok(client)
    }

    pub fn stop(&self) -> Result<()> {
        let output = Self::docker(&["rm", "-f", &self.container_name])?;
        if output.status.success() {
            info!(container = %self.container_name, "Removed PostgreSQL container");
        } else {
            debug!(
                "Container {} was not removed: {}",
                self.container_name,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    /// Combined stdout and stderr of the server.
    pub fn logs(&self) -> Result<String> {
        let output = Self::docker(&["logs", &self.container_name])?;
        Ok(format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

impl Drop for PostgresContainer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
