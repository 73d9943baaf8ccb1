//! End-to-end run of the sample scenarios against a PostgreSQL container

use anyhow::Result;
use pg_bulk::sample::Address;
use pg_bulk::scenario::{self, Scenario};
use postgresql_bulk::testing::PostgresContainer;
use postgresql_bulk::{BulkConfig, BulkUploader};

#[tokio::test]
async fn test_all_scenarios_run() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let container = PostgresContainer::new("test-pgbulk-runner", 15470);
    container.start()?;
    container.wait_until_ready(30).await?;

    let mut uploader =
        BulkUploader::connect(&container.connection_string, BulkConfig::default()).await?;
    scenario::setup(&mut uploader).await?;
    scenario::run(&mut uploader, &Scenario::ALL, 1_000).await?;

    // The derived scenario runs last and leaves its rows behind.
    let rows = uploader.export::<Address>().await?;
    assert_eq!(rows.len(), 1_000);
    assert!(rows.iter().all(|r| r.created_at.is_some()));

    scenario::truncate(&mut uploader).await?;
    assert!(uploader.export::<Address>().await?.is_empty());

    let connection_string = container.connection_string.clone();
    tokio::task::spawn_blocking(move || {
        scenario::run_blocking(&connection_string, BulkConfig::default(), 500)
    })
    .await??;
    assert_eq!(uploader.export::<Address>().await?.len(), 500);

    Ok(())
}
