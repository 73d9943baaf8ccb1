//! Timed loader scenarios over the sample table.

use crate::sample::{
    addresses, extended_addresses, Address, AddressExtended, CREATE_ADDRESSES, TRUNCATE_ADDRESSES,
};
use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use clap::ValueEnum;
use postgresql_bulk::{
    BlockingBulkUploader, BulkConfig, BulkOutcome, BulkUploader, ConflictAction, WriteOptions,
};
use tracing::info;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// Plain insert with key readback, then an upsert of every column
    Insert,
    /// Insert, then update every row by key
    Update,
    /// Insert, truncate, then import the same keys twice
    Import,
    /// Rolled back, dropped and committed transactions
    Transaction,
    /// The extended record shape stored in the same table
    Derived,
}

impl Scenario {
    /// Every scenario, in the order `run` executes them.
    pub const ALL: [Scenario; 5] = [
        Scenario::Insert,
        Scenario::Update,
        Scenario::Import,
        Scenario::Transaction,
        Scenario::Derived,
    ];
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn report(label: &str, outcome: &BulkOutcome) {
    println!(
        "{label}: {} records, {} affected in {:?} ({:.0} rows/s)",
        outcome.rows_streamed,
        outcome.rows_affected,
        outcome.elapsed,
        outcome.rows_per_second()
    );
}

/// Run one statement in its own transaction.
pub async fn execute(uploader: &mut BulkUploader, statement: &str) -> anyhow::Result<u64> {
    let mut tx = uploader.begin().await?;
    let affected = tx.execute(statement).await?;
    tx.commit().await?;
    Ok(affected)
}

pub async fn setup(uploader: &mut BulkUploader) -> anyhow::Result<()> {
    execute(uploader, CREATE_ADDRESSES)
        .await
        .context("Failed to create the addresses table")?;
    info!("addresses table is ready");
    Ok(())
}

pub async fn truncate(uploader: &mut BulkUploader) -> anyhow::Result<()> {
    execute(uploader, TRUNCATE_ADDRESSES)
        .await
        .context("Failed to truncate the addresses table")?;
    Ok(())
}

async fn count(uploader: &mut BulkUploader) -> anyhow::Result<usize> {
    Ok(uploader.export::<Address>().await?.len())
}

pub async fn run(
    uploader: &mut BulkUploader,
    scenarios: &[Scenario],
    rows: usize,
) -> anyhow::Result<()> {
    for &scenario in scenarios {
        info!("Running {scenario:?} scenario with {rows} rows");
        truncate(uploader).await?;
        match scenario {
            Scenario::Insert => run_insert(uploader, rows).await?,
            Scenario::Update => run_update(uploader, rows).await?,
            Scenario::Import => run_import(uploader, rows).await?,
            Scenario::Transaction => run_transaction(uploader, rows).await?,
            Scenario::Derived => run_derived(uploader, rows).await?,
        }
    }
    Ok(())
}

async fn run_insert(uploader: &mut BulkUploader, rows: usize) -> anyhow::Result<()> {
    let mut data = addresses(rows, now());
    if let Some(second) = data.get_mut(1) {
        second.created_at = Some(now());
    }

    let outcome = uploader.insert(&mut data).await?;
    report("Inserted", &outcome);

    truncate(uploader).await?;
    let policy = ConflictAction::update_all_for::<Address>()?;
    let outcome = uploader
        .insert_with(&mut data, WriteOptions::new().on_conflict(policy))
        .await?;
    report("Upserted (update all on conflict)", &outcome);
    Ok(())
}

async fn run_update(uploader: &mut BulkUploader, rows: usize) -> anyhow::Result<()> {
    let mut data = addresses(rows, now());
    uploader.insert(&mut data).await?;

    for address in &mut data {
        address.house_number += 1;
    }
    let outcome = uploader.update(&data).await?;
    report("Updated", &outcome);
    Ok(())
}

async fn run_import(uploader: &mut BulkUploader, rows: usize) -> anyhow::Result<()> {
    let mut data = addresses(rows, now());
    uploader.insert(&mut data).await?;
    truncate(uploader).await?;

    let outcome = uploader.import(&data).await?;
    report("Imported into empty table", &outcome);

    for address in &mut data {
        address.house_number += 1;
    }
    let outcome = uploader.import(&data).await?;
    report("Imported over existing keys", &outcome);
    Ok(())
}

async fn run_transaction(uploader: &mut BulkUploader, rows: usize) -> anyhow::Result<()> {
    let mut data = addresses(rows, now());
    let mut tx = uploader.begin().await?;
    tx.insert(&mut data).await?;
    tx.rollback().await?;
    println!(
        "Rolled back transaction: {} rows remain",
        count(uploader).await?
    );

    let mut data = addresses(rows, now());
    {
        let mut tx = uploader.begin().await?;
        tx.insert(&mut data).await?;
    }
    println!(
        "Dropped transaction handle: {} rows remain",
        count(uploader).await?
    );

    let mut data = addresses(rows, now());
    let mut tx = uploader.begin().await?;
    let inserted = tx.insert(&mut data).await?;
    report("Inserted in transaction", &inserted);
    for address in &mut data {
        address.house_number += 1;
    }
    let updated = tx.update(&data).await?;
    report("Updated in transaction", &updated);
    tx.commit().await?;
    println!("Committed transaction: {} rows", count(uploader).await?);
    Ok(())
}

async fn run_derived(uploader: &mut BulkUploader, rows: usize) -> anyhow::Result<()> {
    let mut data = extended_addresses(rows, now());
    let outcome = uploader.insert(&mut data).await?;
    report("Derived: inserted", &outcome);

    let head = data.len().min(100);
    for column in ["postal_code", "index2"] {
        let policy = ConflictAction::update_columns_for::<AddressExtended>("address_id", [column])?;
        let outcome = uploader
            .insert_with(&mut data[..head], WriteOptions::new().on_conflict(policy))
            .await?;
        report(&format!("Derived: upserted {column}"), &outcome);
    }

    for address in &mut data {
        address.localized_name = address.localized_name.take().map(|n| n.to_uppercase());
    }
    let outcome = uploader.update(&data).await?;
    report("Derived: updated", &outcome);
    Ok(())
}

/// Insert, update and import through the blocking facade.
///
/// Builds its own runtime, so call it outside any async context.
pub fn run_blocking(connection_string: &str, config: BulkConfig, rows: usize) -> anyhow::Result<()> {
    let mut uploader = BlockingBulkUploader::connect(connection_string, config)?;
    let reset = |uploader: &mut BlockingBulkUploader| -> anyhow::Result<()> {
        let mut tx = uploader.begin()?;
        tx.execute(TRUNCATE_ADDRESSES)?;
        tx.commit()?;
        Ok(())
    };

    reset(&mut uploader)?;
    let mut data = addresses(rows, now());
    let outcome = uploader.insert(&mut data)?;
    report("Blocking: inserted", &outcome);

    for address in &mut data {
        address.house_number += 1;
    }
    let outcome = uploader.update(&data)?;
    report("Blocking: updated", &outcome);

    reset(&mut uploader)?;
    let outcome = uploader.import(&data)?;
    report("Blocking: imported", &outcome);

    let mut tx = uploader.begin()?;
    tx.update(&data)?;
    tx.rollback()?;
    println!(
        "Blocking: rolled back update, {} rows remain",
        uploader.export::<Address>()?.len()
    );
    Ok(())
}
