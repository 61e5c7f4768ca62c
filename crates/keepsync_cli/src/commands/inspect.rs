//! Inspect command implementation.

use super::{open_mirror, CliError};
use keepsync_core::MirrorStore;
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage directory.
    pub path: String,
    /// Number of queued operations.
    pub queued_operations: usize,
    /// Mirrored entity types.
    pub entity_types: Vec<TypeStats>,
}

/// Statistics for one entity type.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    /// Entity type name.
    pub name: String,
    /// Number of mirrored documents.
    pub documents: usize,
    /// Last reconciliation (milliseconds since the Unix epoch).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<i64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let mirror = open_mirror(path)?;
    let result = inspect(path, &mirror)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects statistics from an open mirror.
pub fn inspect(path: &Path, mirror: &MirrorStore) -> Result<InspectResult, CliError> {
    let mut names = mirror.entity_types()?;
    for (name, _) in mirror.watermarks().all()? {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names.sort();

    let entity_types = names
        .into_iter()
        .map(|name| -> Result<TypeStats, CliError> {
            Ok(TypeStats {
                documents: mirror.count(&name)?,
                watermark: mirror.get_watermark(&name)?,
                name,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        queued_operations: mirror.queue().len()?,
        entity_types,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("Queued operations: {}", result.queued_operations);
    println!();
    if result.entity_types.is_empty() {
        println!("No mirrored entity types");
        return;
    }
    println!("{:<24} {:>10} {:>16}", "TYPE", "DOCUMENTS", "WATERMARK");
    for t in &result.entity_types {
        let watermark = t.watermark.map_or_else(|| "-".to_string(), |w| w.to_string());
        println!("{:<24} {:>10} {:>16}", t.name, t.documents, watermark);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_codec::Value;
    use keepsync_core::MirrorDocument;

    #[test]
    fn inspect_counts_types_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = open_mirror(dir.path()).unwrap();
        mirror.registry().register_type("notes");
        let doc = MirrorDocument::new("n1", vec![("text", Value::from("hi"))]);
        mirror.put("notes", &doc, None).unwrap();
        mirror.set_watermark("tasks", 9).unwrap();
        mirror.enqueue("insertNote", vec![]).unwrap();

        let result = inspect(dir.path(), &mirror).unwrap();
        assert_eq!(result.queued_operations, 1);
        let names: Vec<&str> = result.entity_types.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["notes", "tasks"]);
        assert_eq!(result.entity_types[0].documents, 1);
        assert_eq!(result.entity_types[1].watermark, Some(9));
    }
}
