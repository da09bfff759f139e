//! Queue command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use uplink_relay::storage::{QueueRecord, QueueStore};

use crate::OutputFormat;

#[derive(Serialize)]
struct DepthOutput {
    depth: u64,
}

#[derive(Serialize)]
struct RecordInfo {
    sequence: i64,
    message_id: String,
    dedup_id: String,
    payload_size: usize,
    enqueued_at: i64,
}

impl From<QueueRecord> for RecordInfo {
    fn from(record: QueueRecord) -> Self {
        Self {
            sequence: record.sequence,
            message_id: record.message_id,
            dedup_id: record.dedup_id,
            payload_size: record.payload.len(),
            enqueued_at: record.enqueued_at,
        }
    }
}

#[derive(Serialize)]
struct ListOutput {
    records: Vec<RecordInfo>,
    shown: usize,
    depth: u64,
}

pub fn depth(store: &QueueStore, format: OutputFormat) -> Result<()> {
    let depth = store.depth().context("failed to read queue depth")?;

    match format {
        OutputFormat::Text => println!("{depth} record(s) awaiting delivery"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&DepthOutput { depth })?),
    }
    Ok(())
}

pub fn list(store: &QueueStore, limit: usize, format: OutputFormat) -> Result<()> {
    let records = store.peek_batch(limit).context("failed to read queue")?;
    let depth = store.depth().context("failed to read queue depth")?;

    let output = ListOutput {
        shown: records.len(),
        depth,
        records: records.into_iter().map(RecordInfo::from).collect(),
    };

    match format {
        OutputFormat::Text => {
            if output.records.is_empty() {
                println!("Queue is empty.");
            } else {
                println!(
                    "{:>8} {:<36} {:<36} {:>8}",
                    "SEQ", "MESSAGE ID", "DEDUP ID", "BYTES"
                );
                println!("{}", "-".repeat(91));
                for record in &output.records {
                    println!(
                        "{:>8} {:<36} {:<36} {:>8}",
                        record.sequence, record.message_id, record.dedup_id, record.payload_size
                    );
                }
                println!();
                println!("Showing {} of {} record(s)", output.shown, output.depth);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
