use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::media::FieldValue;
use crate::storage::models::MetadataSnapshot;

/// Applies reconciled metadata to a keeper file.
///
/// A merge takes a snapshot first and stores it with the transaction; undo hands the
/// snapshot back to `restore`.
pub trait MetadataWriter: Send + Sync {
    fn snapshot(&self, keeper: &Path) -> io::Result<MetadataSnapshot>;

    fn write(&self, keeper: &Path, writes: &BTreeMap<String, FieldValue>) -> io::Result<()>;

    fn restore(&self, snapshot: &MetadataSnapshot) -> io::Result<()>;
}

/// Writes metadata to a JSON sidecar next to the keeper (`<name>.metadata.json`).
///
/// The media file itself is never touched. Sidecar updates are atomic.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarWriter;

impl SidecarWriter {
    pub fn sidecar_path(keeper: &Path) -> PathBuf {
        let name = keeper
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        keeper.with_file_name(format!("{}.metadata.json", name))
    }

    /// Reads the sidecar's fields, if it exists.
    pub fn read(keeper: &Path) -> io::Result<Option<Map<String, Value>>> {
        let path = Self::sidecar_path(keeper);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let map = serde_json::from_str(&text).map_err(io::Error::from)?;
        Ok(Some(map))
    }
}

impl MetadataWriter for SidecarWriter {
    fn snapshot(&self, keeper: &Path) -> io::Result<MetadataSnapshot> {
        let target = Self::sidecar_path(keeper);
        let previous = if target.exists() {
            Some(fs::read_to_string(&target)?)
        } else {
            None
        };
        Ok(MetadataSnapshot { target, previous })
    }

    fn write(&self, keeper: &Path, writes: &BTreeMap<String, FieldValue>) -> io::Result<()> {
        let mut fields = Self::read(keeper)?.unwrap_or_default();
        for (key, value) in writes {
            let value = serde_json::to_value(value).map_err(io::Error::from)?;
            fields.insert(key.clone(), value);
        }
        let text = serde_json::to_string_pretty(&fields).map_err(io::Error::from)?;
        let target = Self::sidecar_path(keeper);
        write_atomic(&target, &text)?;
        debug!("Wrote {} field(s) to {}", writes.len(), target.display());
        Ok(())
    }

    fn restore(&self, snapshot: &MetadataSnapshot) -> io::Result<()> {
        match &snapshot.previous {
            Some(text) => write_atomic(&snapshot.target, text),
            None => match fs::remove_file(&snapshot.target) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }
}

fn write_atomic(target: &Path, contents: &str) -> io::Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_restore_missing_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let keeper = dir.path().join("keep.jpg");
        fs::write(&keeper, b"pixels").unwrap();
        let writer = SidecarWriter;

        let snapshot = writer.snapshot(&keeper).unwrap();
        assert!(snapshot.previous.is_none());

        let mut writes = BTreeMap::new();
        writes.insert("gps".to_string(), FieldValue::Text("48.85,2.35".to_string()));
        writer.write(&keeper, &writes).unwrap();
        let fields = SidecarWriter::read(&keeper).unwrap().unwrap();
        assert_eq!(fields["gps"], Value::String("48.85,2.35".to_string()));
        assert_eq!(fs::read(&keeper).unwrap(), b"pixels");

        writer.restore(&snapshot).unwrap();
        assert!(!SidecarWriter::sidecar_path(&keeper).exists());
    }

    #[test]
    fn test_restore_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let keeper = dir.path().join("keep.jpg");
        fs::write(SidecarWriter::sidecar_path(&keeper), r#"{"title":"Old"}"#).unwrap();
        let writer = SidecarWriter;

        let snapshot = writer.snapshot(&keeper).unwrap();
        let mut writes = BTreeMap::new();
        writes.insert("keywords".to_string(), FieldValue::List(vec!["a".to_string()]));
        writer.write(&keeper, &writes).unwrap();
        let fields = SidecarWriter::read(&keeper).unwrap().unwrap();
        assert_eq!(fields.len(), 2);

        writer.restore(&snapshot).unwrap();
        let text = fs::read_to_string(SidecarWriter::sidecar_path(&keeper)).unwrap();
        assert_eq!(text, r#"{"title":"Old"}"#);
    }
}
