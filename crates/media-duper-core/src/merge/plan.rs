use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::cluster::DuplicateGroupResult;
use crate::error::Error;
use crate::media::{FieldValue, FileCatalog, MediaFile, MediaMetadata, MetadataField};

/// One metadata field's reconciliation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlanField {
    pub id: String,
    pub label: String,
    /// The discarded value.
    pub from: Option<String>,
    /// The value the keeper ends up with. `None` means no change.
    pub into: Option<String>,
    /// How a disagreement was resolved, when there was one.
    pub note: Option<String>,
}

/// Everything the executor needs to collapse one group. Built once, consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub group_id: Uuid,
    pub keeper_id: Uuid,
    pub keeper_metadata: MediaMetadata,
    pub merged_metadata: MediaMetadata,
    /// Only fields whose value actually changes, keyed by field id.
    pub exif_writes: BTreeMap<String, FieldValue>,
    pub trash_list: Vec<Uuid>,
    pub field_changes: Vec<MergePlanField>,
    /// Sum of the trashed members' sizes as known at plan time.
    pub space_to_free: u64,
}

/// Pure planner; safe to call repeatedly for previews.
pub struct MergePlanner<'a> {
    catalog: &'a FileCatalog,
}

struct Donor<'a> {
    file: &'a MediaFile,
    confidence: f64,
}

impl<'a> MergePlanner<'a> {
    pub fn new(catalog: &'a FileCatalog) -> Self {
        Self { catalog }
    }

    pub fn plan(&self, group: &DuplicateGroupResult, keeper_id: Uuid) -> Result<MergePlan, Error> {
        if !group.contains(keeper_id) {
            return Err(Error::KeeperNotInGroup {
                group_id: group.group_id,
                keeper_id,
            });
        }
        let keeper = self
            .catalog
            .get(keeper_id)
            .ok_or(Error::UnknownFile(keeper_id))?;

        let mut donors: Vec<Donor<'_>> = Vec::new();
        for member in group.members.iter().filter(|m| m.file_id != keeper_id) {
            let file = self
                .catalog
                .get(member.file_id)
                .ok_or(Error::UnknownFile(member.file_id))?;
            donors.push(Donor {
                file,
                confidence: member.confidence,
            });
        }
        let trash_list: Vec<Uuid> = donors.iter().map(|d| d.file.id).collect();
        let space_to_free = group.reclaimable_bytes(keeper_id);

        // Tie-break order for conflicting donors: highest confidence, then smallest id.
        donors.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.file.id.cmp(&b.file.id))
        });

        let keeper_metadata = keeper.metadata.clone();
        let mut merged_metadata = keeper_metadata.clone();
        let mut exif_writes = BTreeMap::new();
        let mut field_changes = Vec::new();

        for field in MetadataField::ALL {
            let reconciled = if field.is_list() {
                reconcile_list(field, &keeper_metadata, &donors)
            } else {
                reconcile_scalar(field, &keeper_metadata, &donors)
            };
            let Some((change, write)) = reconciled else {
                continue;
            };
            if let Some(value) = write {
                merged_metadata.set(field, value.clone());
                exif_writes.insert(field.id().to_string(), value);
            }
            field_changes.push(change);
        }

        Ok(MergePlan {
            group_id: group.group_id,
            keeper_id,
            keeper_metadata,
            merged_metadata,
            exif_writes,
            trash_list,
            field_changes,
            space_to_free,
        })
    }
}

fn plan_field(field: MetadataField, from: Option<String>, into: Option<String>, note: Option<String>) -> MergePlanField {
    MergePlanField {
        id: field.id().to_string(),
        label: field.label().to_string(),
        from,
        into,
        note,
    }
}

/// Scalar fields: the keeper's value always wins; a missing value is filled from a donor.
fn reconcile_scalar(
    field: MetadataField,
    keeper: &MediaMetadata,
    donors: &[Donor<'_>],
) -> Option<(MergePlanField, Option<FieldValue>)> {
    let donated: Vec<(&MediaFile, FieldValue)> = donors
        .iter()
        .filter_map(|d| d.file.metadata.get(field).map(|v| (d.file, v)))
        .collect();

    match keeper.get(field) {
        Some(kept) => {
            let differing: Vec<&FieldValue> = donated
                .iter()
                .map(|(_, v)| v)
                .filter(|v| **v != kept)
                .collect();
            let first = differing.first()?;
            let note = if differing.len() > 1 {
                format!("Keeper value kept over {} differing values", differing.len())
            } else {
                "Keeper value kept".to_string()
            };
            Some((
                plan_field(field, Some(first.to_string()), Some(kept.to_string()), Some(note)),
                None,
            ))
        }
        None => {
            let (source, chosen) = donated.first()?;
            let mut distinct: Vec<&FieldValue> = Vec::new();
            for (_, v) in &donated {
                if !distinct.contains(&v) {
                    distinct.push(v);
                }
            }
            let note = if distinct.len() > 1 {
                Some(format!(
                    "{} members disagree; took {} from {} (highest confidence, then file id)",
                    distinct.len(),
                    chosen,
                    source.file_name()
                ))
            } else {
                None
            };
            Some((
                plan_field(field, None, Some(chosen.to_string()), note),
                Some(chosen.clone()),
            ))
        }
    }
}

/// List fields: union of the keeper's items followed by donor items, first occurrence wins.
fn reconcile_list(
    field: MetadataField,
    keeper: &MediaMetadata,
    donors: &[Donor<'_>],
) -> Option<(MergePlanField, Option<FieldValue>)> {
    let kept = as_items(keeper.get(field));
    let mut union: Vec<String> = Vec::new();
    let mut added: Vec<String> = Vec::new();
    for item in &kept {
        push_unique(&mut union, item);
    }
    for donor in donors {
        for item in as_items(donor.file.metadata.get(field)) {
            if push_unique(&mut union, &item) {
                added.push(item);
            }
        }
    }
    if added.is_empty() {
        return None;
    }
    let note = if kept.is_empty() {
        None
    } else {
        Some("Keeper values kept; new values appended".to_string())
    };
    Some((
        plan_field(field, Some(added.join(", ")), Some(union.join(", ")), note),
        Some(FieldValue::List(union)),
    ))
}

fn as_items(value: Option<FieldValue>) -> Vec<String> {
    match value {
        Some(FieldValue::List(items)) => items,
        Some(FieldValue::Text(text)) => vec![text],
        None => Vec::new(),
    }
}

fn push_unique(items: &mut Vec<String>, item: &str) -> bool {
    let item = item.trim();
    if item.is_empty() || items.iter().any(|i| i.eq_ignore_ascii_case(item)) {
        return false;
    }
    items.push(item.to_string());
    true
}
