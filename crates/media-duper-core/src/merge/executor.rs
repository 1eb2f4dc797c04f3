use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::lock::FileLocks;
use super::metadata_writer::MetadataWriter;
use super::plan::MergePlan;
use super::trash::TrashBin;
use crate::error::Error;
use crate::media::PathResolver;
use crate::storage::models::{MergeTransaction, MetadataSnapshot, RemovedFile};
use crate::storage::TransactionLog;

/// Lifecycle of one merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Planned,
    Executing,
    Committed,
    Failed,
    Undone,
}

impl MergeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeState::Planned => "planned",
            MergeState::Executing => "executing",
            MergeState::Committed => "committed",
            MergeState::Failed => "failed",
            MergeState::Undone => "undone",
        }
    }

    pub fn can_transition(&self, to: MergeState) -> bool {
        matches!(
            (self, to),
            (MergeState::Planned, MergeState::Executing)
                | (MergeState::Executing, MergeState::Committed)
                | (MergeState::Executing, MergeState::Failed)
                | (MergeState::Committed, MergeState::Undone)
        )
    }

    pub fn transition(self, to: MergeState) -> Result<MergeState, Error> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }
}

/// Applies merge plans and reverses them.
///
/// Execution order is trash moves, then the keeper metadata write, then the
/// transaction record. Any failure before the record is written puts every moved
/// file back, so a merge is either fully recorded or not visible at all.
pub struct MergeExecutor {
    log: Arc<TransactionLog>,
    trash: TrashBin,
    writer: Box<dyn MetadataWriter>,
    locks: FileLocks,
    /// Serializes history mutations so "most recent" is stable during undo.
    history: Mutex<()>,
}

impl MergeExecutor {
    pub fn new(log: Arc<TransactionLog>, trash: TrashBin, writer: Box<dyn MetadataWriter>) -> Self {
        Self {
            log,
            trash,
            writer,
            locks: FileLocks::new(),
            history: Mutex::new(()),
        }
    }

    pub fn trash(&self) -> &TrashBin {
        &self.trash
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    fn history_lock(&self) -> Result<MutexGuard<'_, ()>, Error> {
        self.history
            .lock()
            .map_err(|_| Error::Other("merge history lock poisoned".to_string()))
    }

    /// Execute `plan`. Once files start moving this runs to completion or rolls back.
    pub fn execute(&self, plan: &MergePlan, resolver: &dyn PathResolver) -> Result<MergeTransaction, Error> {
        let mut state = MergeState::Planned;

        let mut ids = plan.trash_list.clone();
        ids.push(plan.keeper_id);
        let _guard = self.locks.acquire(&ids)?;

        let keeper_path = resolver
            .resolve_file_path(plan.keeper_id)
            .ok_or(Error::UnknownFile(plan.keeper_id))?;
        let mut sources: Vec<(Uuid, PathBuf)> = Vec::with_capacity(plan.trash_list.len());
        for file_id in &plan.trash_list {
            let path = resolver
                .resolve_file_path(*file_id)
                .ok_or(Error::UnknownFile(*file_id))?;
            sources.push((*file_id, path));
        }

        state = state.transition(MergeState::Executing)?;
        let transaction_id = Uuid::new_v4();
        info!(
            "Merging group {} into {} ({} file(s) to trash)",
            plan.group_id,
            keeper_path.display(),
            sources.len()
        );

        let mut moved: Vec<RemovedFile> = Vec::with_capacity(sources.len());
        for (file_id, source) in &sources {
            let step = fs::metadata(source).and_then(|meta| {
                self.trash
                    .move_to_trash(transaction_id, *file_id, source)
                    .map(|trash_path| (meta.len(), trash_path))
            });
            match step {
                Ok((file_size, trash_path)) => moved.push(RemovedFile {
                    file_id: *file_id,
                    original_path: source.clone(),
                    trash_path,
                    file_size,
                }),
                Err(e) => {
                    let reason = format!("could not trash {}: {}", source.display(), e);
                    return Err(self.fail(state, plan, transaction_id, &moved, None, reason));
                }
            }
        }

        let mut snapshot: Option<MetadataSnapshot> = None;
        if !plan.exif_writes.is_empty() {
            let written = self.writer.snapshot(&keeper_path).and_then(|snap| {
                snapshot = Some(snap);
                self.writer.write(&keeper_path, &plan.exif_writes)
            });
            if let Err(e) = written {
                let reason = format!("could not write metadata to {}: {}", keeper_path.display(), e);
                return Err(self.fail(state, plan, transaction_id, &moved, snapshot.as_ref(), reason));
            }
        }

        let transaction = MergeTransaction {
            id: transaction_id,
            group_id: plan.group_id,
            keeper_file_id: plan.keeper_id,
            keeper_path: keeper_path.clone(),
            space_freed: moved.iter().map(|r| r.file_size).sum(),
            removed: moved,
            created_at: Utc::now(),
            exif_writes: plan.exif_writes.clone(),
            metadata_snapshot: snapshot,
        };

        let recorded = self.history_lock().and_then(|_history| self.log.record(&transaction));
        if let Err(e) = recorded {
            let reason = format!("could not record transaction: {}", e);
            return Err(self.fail(
                state,
                plan,
                transaction_id,
                &transaction.removed,
                transaction.metadata_snapshot.as_ref(),
                reason,
            ));
        }

        state = state.transition(MergeState::Committed)?;
        info!(
            "Merge {} {}: {} file(s) trashed, {} bytes freed",
            transaction.id,
            state.as_str(),
            transaction.removed.len(),
            transaction.space_freed
        );
        Ok(transaction)
    }

    /// Put back what a failed merge already did and build the error to report.
    fn fail(
        &self,
        state: MergeState,
        plan: &MergePlan,
        transaction_id: Uuid,
        moved: &[RemovedFile],
        snapshot: Option<&MetadataSnapshot>,
        reason: String,
    ) -> Error {
        let failed = state.transition(MergeState::Failed).map(|s| s.as_str()).unwrap_or("failed");
        warn!("Merge of group {} {}: {}; rolling back", plan.group_id, failed, reason);

        let mut stranded: Vec<String> = Vec::new();
        if let Some(snapshot) = snapshot {
            if let Err(e) = self.writer.restore(snapshot) {
                error!("Could not restore metadata {}: {}", snapshot.target.display(), e);
                stranded.push(snapshot.target.display().to_string());
            }
        }
        for removed in moved.iter().rev() {
            if let Err(e) = self.trash.restore(&removed.trash_path, &removed.original_path) {
                error!(
                    "Could not roll back {} -> {}: {}",
                    removed.trash_path.display(),
                    removed.original_path.display(),
                    e
                );
                stranded.push(removed.trash_path.display().to_string());
            }
        }
        self.trash.remove_transaction_dir(transaction_id);

        if stranded.is_empty() {
            Error::MergeExecution {
                group_id: plan.group_id,
                reason,
                rolled_back: moved.len(),
            }
        } else {
            Error::RollbackFailed(stranded)
        }
    }

    /// Reverse the most recent merge and drop its record.
    pub fn undo_last_transaction(&self) -> Result<MergeTransaction, Error> {
        let latest = self.latest_transaction()?;
        self.undo(latest)
    }

    /// Reverse merge `id`, which must be the most recent one.
    pub fn undo_transaction(&self, id: Uuid) -> Result<MergeTransaction, Error> {
        let latest = self.latest_transaction()?;
        if latest.id != id {
            return Err(Error::UndoUnavailable(format!(
                "transaction {} is not the most recent merge",
                id
            )));
        }
        self.undo(latest)
    }

    fn latest_transaction(&self) -> Result<MergeTransaction, Error> {
        let _history = self.history_lock()?;
        self.log
            .latest()?
            .ok_or_else(|| Error::UndoUnavailable("no merge to undo".to_string()))
    }

    // Lock order is file locks, then history, the same as `execute`.
    fn undo(&self, transaction: MergeTransaction) -> Result<MergeTransaction, Error> {
        let mut ids = transaction.removed_file_ids();
        ids.push(transaction.keeper_file_id);
        let _guard = self.locks.acquire(&ids)?;
        let _history = self.history_lock()?;

        match self.log.latest()? {
            Some(latest) if latest.id == transaction.id => {}
            _ => {
                return Err(Error::UndoUnavailable(format!(
                    "merge history changed before {} could be undone",
                    transaction.id
                )))
            }
        }

        for removed in &transaction.removed {
            if removed.original_path.exists() {
                return Err(Error::UndoUnavailable(format!(
                    "{} has been recreated since the merge",
                    removed.original_path.display()
                )));
            }
            if !removed.trash_path.exists() {
                return Err(Error::UndoUnavailable(format!(
                    "{} is no longer in the trash",
                    removed.trash_path.display()
                )));
            }
        }

        // Metadata goes first so a failure leaves every file in the trash.
        if let Some(snapshot) = &transaction.metadata_snapshot {
            self.writer.restore(snapshot)?;
        }

        let mut restored: Vec<&RemovedFile> = Vec::new();
        for removed in &transaction.removed {
            if let Err(e) = self.trash.restore(&removed.trash_path, &removed.original_path) {
                for done in restored.iter().rev() {
                    if let Err(back) = fs::rename(&done.original_path, &done.trash_path) {
                        error!("Could not re-trash {}: {}", done.original_path.display(), back);
                    }
                }
                if transaction.metadata_snapshot.is_some() {
                    if let Err(back) = self.writer.write(&transaction.keeper_path, &transaction.exif_writes) {
                        error!(
                            "Could not re-apply metadata to {}: {}",
                            transaction.keeper_path.display(),
                            back
                        );
                    }
                }
                return Err(Error::UndoUnavailable(format!(
                    "could not restore {}: {}",
                    removed.original_path.display(),
                    e
                )));
            }
            restored.push(removed);
        }

        self.log.delete(transaction.id)?;
        self.trash.remove_transaction_dir(transaction.id);

        let state = MergeState::Committed.transition(MergeState::Undone)?;
        info!(
            "Merge {} {}: {} file(s) restored",
            transaction.id,
            state.as_str(),
            transaction.removed.len()
        );
        Ok(transaction)
    }

    /// Forget a merge without restoring anything. Trashed files stay in the trash.
    pub fn delete_merge_transaction(&self, id: Uuid) -> Result<bool, Error> {
        let _history = self.history_lock()?;
        let deleted = self.log.delete(id)?;
        if deleted {
            info!("Merge {} removed from history", id);
        } else {
            debug!("Merge {} not in history", id);
        }
        Ok(deleted)
    }

    pub fn fetch_recent_transactions(&self, limit: usize) -> Result<Vec<MergeTransaction>, Error> {
        self.log.fetch_recent_transactions(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        let state = MergeState::Planned.transition(MergeState::Executing).unwrap();
        let state = state.transition(MergeState::Committed).unwrap();
        assert_eq!(state.transition(MergeState::Undone).unwrap(), MergeState::Undone);
        assert!(MergeState::Executing.can_transition(MergeState::Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(matches!(
            MergeState::Undone.transition(MergeState::Undone),
            Err(Error::InvalidTransition { from: "undone", to: "undone" })
        ));
        assert!(MergeState::Failed.transition(MergeState::Committed).is_err());
        assert!(MergeState::Planned.transition(MergeState::Committed).is_err());
    }
}
