use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Recoverable delete area. Each merge gets its own directory named after its
/// transaction id.
#[derive(Debug, Clone)]
pub struct TrashBin {
    root: PathBuf,
}

impl TrashBin {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transaction_dir(&self, transaction_id: Uuid) -> PathBuf {
        self.root.join(transaction_id.to_string())
    }

    /// Move `source` into the transaction's trash directory and return where it went.
    pub fn move_to_trash(&self, transaction_id: Uuid, file_id: Uuid, source: &Path) -> io::Result<PathBuf> {
        let dir = self.transaction_dir(transaction_id);
        fs::create_dir_all(&dir)?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let destination = dir.join(format!("{}-{}", file_id, name));
        move_file(source, &destination)?;
        debug!("Trashed {} -> {}", source.display(), destination.display());
        Ok(destination)
    }

    /// Move a trashed file back. Fails if something already occupies `original`.
    pub fn restore(&self, trash_path: &Path, original: &Path) -> io::Result<()> {
        if original.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", original.display()),
            ));
        }
        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent)?;
        }
        move_file(trash_path, original)?;
        debug!("Restored {} -> {}", trash_path.display(), original.display());
        Ok(())
    }

    /// Remove a transaction's directory once it is empty.
    pub fn remove_transaction_dir(&self, transaction_id: Uuid) {
        let dir = self.transaction_dir(transaction_id);
        if let Err(e) = fs::remove_dir(&dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove trash directory {}: {}", dir.display(), e);
            }
        }
    }
}

/// Rename, falling back to copy and remove when the rename crosses devices.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if !from.is_file() || to.exists() {
                return Err(rename_err);
            }
            debug!(
                "Rename {} -> {} failed ({}), copying instead",
                from.display(),
                to.display(),
                rename_err
            );
            fs::copy(from, to)?;
            if let Err(e) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(())
        }
    }
}
