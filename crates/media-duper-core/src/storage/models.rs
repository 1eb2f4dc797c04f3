use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::media::FieldValue;

/// One file moved out of the way by a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedFile {
    pub file_id: Uuid,
    pub original_path: PathBuf,
    pub trash_path: PathBuf,
    /// Size on disk when the file was trashed.
    pub file_size: u64,
}

/// State of the keeper's metadata target before a merge wrote to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub target: PathBuf,
    /// `None` when the target did not exist.
    pub previous: Option<String>,
}

/// Durable record of an executed merge; the unit of undo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeTransaction {
    pub id: Uuid,
    pub group_id: Uuid,
    pub keeper_file_id: Uuid,
    pub keeper_path: PathBuf,
    pub removed: Vec<RemovedFile>,
    pub created_at: DateTime<Utc>,
    pub space_freed: u64,
    pub exif_writes: BTreeMap<String, FieldValue>,
    pub metadata_snapshot: Option<MetadataSnapshot>,
}

impl MergeTransaction {
    pub fn removed_file_ids(&self) -> Vec<Uuid> {
        self.removed.iter().map(|r| r.file_id).collect()
    }
}
