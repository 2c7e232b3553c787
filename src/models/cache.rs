//! On-disk persistence for model snapshots

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::ModelSnapshot;
use crate::Result;

/// Read a snapshot from disk
///
/// Missing, unreadable, or malformed files all yield `None` so the
/// caller treats the cache as stale.
#[must_use]
pub fn read_snapshot(path: &Path) -> Option<ModelSnapshot> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "no readable model cache");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed model cache");
            None
        }
    }
}

/// Write a snapshot atomically (temp file in the same directory, then rename)
///
/// # Errors
///
/// Returns error if the directory cannot be created or the file written
pub fn write_snapshot(path: &Path, snapshot: &ModelSnapshot) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, snapshot)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Modification time of the cache file
pub(super) fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelInfo;

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("models.json");
        let snapshot = ModelSnapshot {
            models: vec![ModelInfo::new("gpt-4")],
            last_update: Some(Utc::now()),
        };

        write_snapshot(&path, &snapshot).unwrap();

        assert_eq!(read_snapshot(&path), Some(snapshot));
    }

    #[test]
    fn malformed_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, "{not json").unwrap();

        assert_eq!(read_snapshot(&path), None);
    }

    #[test]
    fn legacy_file_without_timestamp_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(
            &path,
            r#"{"models": [{"id": "gpt-4", "object": "model", "created": 1687882411, "owned_by": "openai"}]}"#,
        )
        .unwrap();

        let snapshot = read_snapshot(&path).unwrap();
        assert!(snapshot.last_update.is_none());
        assert_eq!(snapshot.models[0].owned_by, "openai");
        assert!(modified_at(&path).is_some());
    }
}
