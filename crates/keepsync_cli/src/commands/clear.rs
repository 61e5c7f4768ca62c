//! Clear command implementation.

use super::{open_mirror, CliError};
use std::path::Path;

/// What to clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The documents of one entity type.
    Type(String),
    /// Every document, queued operation and watermark.
    All,
}

/// Runs the clear command.
pub fn run(path: &Path, target: &Target) -> Result<(), CliError> {
    let mirror = open_mirror(path)?;
    match target {
        Target::Type(name) => {
            let count = mirror.count(name)?;
            mirror.clear(name)?;
            tracing::info!(entity_type = %name, count, "cleared entity type");
            println!("Cleared {count} documents of {name}");
        }
        Target::All => {
            mirror.clear_all()?;
            tracing::info!("cleared store");
            println!("Cleared all documents, queued operations and watermarks");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_codec::Value;
    use keepsync_core::MirrorDocument;

    #[test]
    fn clear_one_type_then_all() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mirror = open_mirror(dir.path()).unwrap();
            mirror.registry().register_type("notes");
            mirror.registry().register_type("tasks");
            for name in ["notes", "tasks"] {
                let doc = MirrorDocument::new("x", vec![("v", Value::Integer(1))]);
                mirror.put(name, &doc, None).unwrap();
            }
            mirror.enqueue("insertNote", vec![]).unwrap();
        }

        run(dir.path(), &Target::Type("notes".into())).unwrap();
        let mirror = open_mirror(dir.path()).unwrap();
        assert_eq!(mirror.count("notes").unwrap(), 0);
        assert_eq!(mirror.count("tasks").unwrap(), 1);
        drop(mirror);

        run(dir.path(), &Target::All).unwrap();
        let mirror = open_mirror(dir.path()).unwrap();
        assert_eq!(mirror.count("tasks").unwrap(), 0);
        assert!(mirror.list_queued().unwrap().is_empty());
    }
}
