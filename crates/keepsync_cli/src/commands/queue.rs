//! Queue listing command implementation.

use super::{open_mirror, to_json, CliError};
use keepsync_core::MirrorStore;
use serde::Serialize;
use std::path::Path;

/// One queued operation, ready for output.
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    /// Replay order.
    pub sequence_id: u64,
    /// Operation name.
    pub name: String,
    /// Entity type the operation wrote, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Id of the document it created offline, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_id: Option<String>,
    /// Arguments.
    pub args: Vec<serde_json::Value>,
}

/// Runs the queue command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), CliError> {
    let mirror = open_mirror(path)?;
    let entries = list(&mirror, limit)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            if entries.is_empty() {
                println!("Queue is empty");
            }
            for e in &entries {
                let args = serde_json::to_string(&e.args)?;
                println!(
                    "#{:<6} {:<24} {:<16} {}",
                    e.sequence_id,
                    e.name,
                    e.entity_type.as_deref().unwrap_or("-"),
                    args
                );
            }
        }
    }
    Ok(())
}

/// Lists queued operations in replay order.
pub fn list(mirror: &MirrorStore, limit: Option<usize>) -> Result<Vec<QueueEntry>, CliError> {
    Ok(mirror
        .list_queued()?
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|op| QueueEntry {
            sequence_id: op.sequence_id,
            args: op.args.iter().map(to_json).collect(),
            name: op.name,
            entity_type: op.entity_type,
            created_id: op.created_id.map(|id| id.to_string()),
        })
        .collect())
}
