use ahash::AHashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cluster::{sort_groups, DuplicateGroupResult};
use crate::config::{AppConfig, Thresholds};
use crate::error::Error;
use crate::media::{FileCatalog, MediaFile, MediaMetadata};
use crate::merge::{MergeExecutor, MergePlan, MergePlanner, SidecarWriter, TrashBin};
use crate::storage::models::MergeTransaction;
use crate::storage::TransactionLog;

/// What a committed merge took out of the working set, kept so undo can put it back.
struct MergedGroup {
    group: DuplicateGroupResult,
    removed_files: Vec<MediaFile>,
    keeper_metadata: MediaMetadata,
}

/// Entry point for hosts: current groups, previews, merges and undo.
///
/// `merge_group` and `undo_last_merge` are the only mutating operations on disk.
pub struct MergeService {
    catalog: RwLock<FileCatalog>,
    groups: RwLock<Vec<DuplicateGroupResult>>,
    merged: Mutex<AHashMap<Uuid, MergedGroup>>,
    executor: MergeExecutor,
    thresholds: Thresholds,
}

impl MergeService {
    pub fn new(catalog: FileCatalog, executor: MergeExecutor, thresholds: Thresholds) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            groups: RwLock::new(Vec::new()),
            merged: Mutex::new(AHashMap::new()),
            executor,
            thresholds,
        }
    }

    /// Service backed by the configured database and trash directory, writing sidecars.
    pub fn open(config: &AppConfig, catalog: FileCatalog) -> Result<Self, Error> {
        let log = Arc::new(TransactionLog::open(&config.db_path)?);
        let executor = MergeExecutor::new(log, TrashBin::new(&config.trash_dir), Box::new(SidecarWriter));
        Ok(Self::new(catalog, executor, config.thresholds.clone()))
    }

    fn catalog(&self) -> Result<RwLockReadGuard<'_, FileCatalog>, Error> {
        self.catalog.read().map_err(|_| poisoned("catalog"))
    }

    fn catalog_mut(&self) -> Result<RwLockWriteGuard<'_, FileCatalog>, Error> {
        self.catalog.write().map_err(|_| poisoned("catalog"))
    }

    fn groups_mut(&self) -> Result<RwLockWriteGuard<'_, Vec<DuplicateGroupResult>>, Error> {
        self.groups.write().map_err(|_| poisoned("group list"))
    }

    pub fn executor(&self) -> &MergeExecutor {
        &self.executor
    }

    /// Swap in a fresh set of groups, e.g. after a rescan or recluster.
    pub fn replace_groups(&self, groups: Vec<DuplicateGroupResult>) -> Result<(), Error> {
        let count = groups.len();
        *self.groups_mut()? = groups;
        debug!("Replaced group list ({} groups)", count);
        Ok(())
    }

    pub fn groups(&self) -> Result<Vec<DuplicateGroupResult>, Error> {
        Ok(self.groups.read().map_err(|_| poisoned("group list"))?.clone())
    }

    pub fn group(&self, group_id: Uuid) -> Result<DuplicateGroupResult, Error> {
        self.groups
            .read()
            .map_err(|_| poisoned("group list"))?
            .iter()
            .find(|g| g.group_id == group_id)
            .cloned()
            .ok_or(Error::GroupNotFound(group_id))
    }

    pub fn file(&self, file_id: Uuid) -> Result<Option<MediaFile>, Error> {
        Ok(self.catalog()?.get(file_id).cloned())
    }

    /// Plan a merge without touching anything.
    pub fn preview(&self, group_id: Uuid, keeper_id: Uuid) -> Result<MergePlan, Error> {
        let group = self.group(group_id)?;
        let catalog = self.catalog()?;
        MergePlanner::new(&catalog).plan(&group, keeper_id)
    }

    /// Groups safe to merge without review: complete, keeper known, confident enough.
    pub fn auto_merge_candidates(&self) -> Result<Vec<DuplicateGroupResult>, Error> {
        Ok(self
            .groups()?
            .into_iter()
            .filter(|g| {
                !g.incomplete
                    && g.keeper_suggestion.is_some()
                    && g.confidence >= self.thresholds.acceptance
            })
            .collect())
    }

    /// Collapse a group into `keeper_id`.
    pub fn merge_group(&self, group_id: Uuid, keeper_id: Uuid) -> Result<MergeTransaction, Error> {
        let group = self.group(group_id)?;
        let (plan, transaction) = {
            let catalog = self.catalog()?;
            let plan = MergePlanner::new(&catalog).plan(&group, keeper_id)?;
            let transaction = self.executor.execute(&plan, &*catalog)?;
            (plan, transaction)
        };

        let mut removed_files = Vec::with_capacity(plan.trash_list.len());
        {
            let mut catalog = self.catalog_mut()?;
            for file_id in &plan.trash_list {
                if let Some(file) = catalog.remove(*file_id) {
                    removed_files.push(file);
                }
            }
            catalog.set_metadata(keeper_id, plan.merged_metadata.clone());
        }
        self.groups_mut()?.retain(|g| g.group_id != group_id);
        self.merged.lock().map_err(|_| poisoned("merge ledger"))?.insert(
            transaction.id,
            MergedGroup {
                group,
                removed_files,
                keeper_metadata: plan.keeper_metadata,
            },
        );

        info!(
            "Group {} merged into {} ({} bytes freed)",
            group_id, keeper_id, transaction.space_freed
        );
        Ok(transaction)
    }

    /// Reverse the most recent merge.
    pub fn undo_last_merge(&self) -> Result<MergeTransaction, Error> {
        let transaction = self.executor.undo_last_transaction()?;

        let merged = self
            .merged
            .lock()
            .map_err(|_| poisoned("merge ledger"))?
            .remove(&transaction.id);
        if let Some(merged) = merged {
            {
                let mut catalog = self.catalog_mut()?;
                for file in merged.removed_files {
                    catalog.insert(file);
                }
                catalog.set_metadata(transaction.keeper_file_id, merged.keeper_metadata);
            }
            let mut groups = self.groups_mut()?;
            groups.push(merged.group);
            sort_groups(&mut groups);
        }

        info!("Merge {} undone", transaction.id);
        Ok(transaction)
    }

    /// Recent merges, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<MergeTransaction>, Error> {
        self.executor.fetch_recent_transactions(limit)
    }

    /// Drop a merge from history, making it permanent.
    pub fn delete_history_entry(&self, transaction_id: Uuid) -> Result<bool, Error> {
        let deleted = self.executor.delete_merge_transaction(transaction_id)?;
        if deleted {
            self.merged
                .lock()
                .map_err(|_| poisoned("merge ledger"))?
                .remove(&transaction_id);
        }
        Ok(deleted)
    }
}

fn poisoned(what: &str) -> Error {
    Error::Other(format!("{} lock poisoned", what))
}
