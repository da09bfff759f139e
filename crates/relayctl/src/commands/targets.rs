//! Targets command implementation.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use uplink_relay::config::TargetSpec;
use uplink_relay::storage::StatusStore;

use crate::OutputFormat;

#[derive(Serialize)]
struct TargetInfo {
    id: i64,
    name: String,
    address: String,
    last_response_code: i64,
    last_seen: Option<i64>,
}

#[derive(Serialize)]
struct TargetsOutput {
    targets: Vec<TargetInfo>,
    total: usize,
}

pub fn list(store: &StatusStore, format: OutputFormat) -> Result<()> {
    let targets = store.load_targets().context("failed to load targets")?;

    let output = TargetsOutput {
        total: targets.len(),
        targets: targets
            .into_iter()
            .map(|t| TargetInfo {
                id: t.id,
                name: t.name,
                address: t.address,
                last_response_code: t.last_response_code,
                last_seen: t.last_seen,
            })
            .collect(),
    };

    match format {
        OutputFormat::Text => {
            if output.targets.is_empty() {
                println!("No targets registered.");
            } else {
                println!(
                    "{:>4} {:<20} {:<40} {:>6} {:>14}",
                    "ID", "NAME", "ADDRESS", "CODE", "LAST SEEN"
                );
                println!("{}", "-".repeat(88));
                for target in &output.targets {
                    println!(
                        "{:>4} {:<20} {:<40} {:>6} {:>14}",
                        target.id,
                        target.name,
                        target.address,
                        target.last_response_code,
                        format_seen(target.last_seen)
                    );
                }
                println!();
                println!("Total: {} target(s)", output.total);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

pub fn add(store: &StatusStore, name: &str, url: &str, format: OutputFormat) -> Result<()> {
    let spec: TargetSpec = format!("{name}={url}").parse().map_err(|e: String| anyhow!(e))?;
    let id = store
        .upsert_target(&spec.name, &spec.address)
        .context("failed to register target")?;

    match format {
        OutputFormat::Text => println!("Registered target {} (id {id})", spec.name),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "id": id,
                "name": spec.name,
                "address": spec.address,
            }))?
        ),
    }
    Ok(())
}

fn format_seen(millis: Option<i64>) -> String {
    // Unix seconds
    match millis {
        Some(ms) => format!("{}", ms / 1000),
        None => "-".to_string(),
    }
}
