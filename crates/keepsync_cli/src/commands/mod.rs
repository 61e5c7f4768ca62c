//! CLI command implementations.

pub mod clear;
pub mod inspect;
pub mod queue;

use keepsync_codec::Value;
use keepsync_core::{MirrorStore, OfflineConfig, RetentionRegistry};
use keepsync_storage::FileEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory does not exist.
    #[error("no storage directory at {0:?}")]
    NotFound(PathBuf),

    /// Mirror, queue or watermark failure.
    #[error(transparent)]
    Core(#[from] keepsync_core::CoreError),

    /// Storage engine failure.
    #[error(transparent)]
    Storage(#[from] keepsync_storage::StorageError),

    /// JSON output failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opens the mirror stored under `path`.
///
/// Reading needs no retention policy, so the default configuration is used.
pub fn open_mirror(path: &Path) -> Result<MirrorStore, CliError> {
    if !path.is_dir() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    let engine = Arc::new(FileEngine::open(path)?);
    let registry = Arc::new(RetentionRegistry::new(&OfflineConfig::new()));
    Ok(MirrorStore::new(engine, registry))
}

/// Renders a document value as JSON. Byte strings become hex text.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Bytes(bytes) => Json::String(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        Value::Text(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(pairs) => Json::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::Text(s) => s.clone(),
                        other => to_json(other).to_string(),
                    };
                    (key, to_json(v))
                })
                .collect(),
        ),
    }
}
