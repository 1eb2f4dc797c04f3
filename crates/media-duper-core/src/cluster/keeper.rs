use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::media::MediaFile;

/// The rule that decided which member should be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperCriterion {
    Resolution,
    Bitrate,
    FileSize,
    EarliestCapture,
    ShortestName,
    FileId,
}

impl KeeperCriterion {
    pub fn describe(&self) -> &'static str {
        match self {
            KeeperCriterion::Resolution => "highest resolution",
            KeeperCriterion::Bitrate => "highest bitrate",
            KeeperCriterion::FileSize => "largest file size",
            KeeperCriterion::EarliestCapture => "earliest capture date",
            KeeperCriterion::ShortestName => "shortest file name",
            KeeperCriterion::FileId => "file id order (all criteria tied)",
        }
    }
}

/// Pick the member to keep.
///
/// Criteria run in order; each one narrows the candidates to those with the best
/// value, dropping candidates that lack it. The first criterion that leaves a
/// single candidate wins. Any remaining tie goes to the smallest file id.
pub fn suggest_keeper(members: &[&MediaFile]) -> Option<(Uuid, KeeperCriterion)> {
    let mut candidates: Vec<&MediaFile> = members.to_vec();
    candidates.sort_by_key(|f| f.id);
    let first = candidates.first()?.id;
    if candidates.len() == 1 {
        return Some((first, KeeperCriterion::FileId));
    }

    let criteria: [(KeeperCriterion, fn(&MediaFile, &MediaFile) -> Option<Ordering>); 5] = [
        (KeeperCriterion::Resolution, |a, b| {
            cmp_present(a.features.pixel_count(), b.features.pixel_count())
        }),
        (KeeperCriterion::Bitrate, |a, b| {
            cmp_present(a.features.bitrate, b.features.bitrate)
        }),
        (KeeperCriterion::FileSize, |a, b| Some(a.file_size.cmp(&b.file_size))),
        (KeeperCriterion::EarliestCapture, |a, b| {
            match (a.features.captured_at, b.features.captured_at) {
                // Earlier is better.
                (Some(x), Some(y)) => Some(y.cmp(&x)),
                (x, y) => cmp_present(x.map(|_| ()), y.map(|_| ())),
            }
        }),
        (KeeperCriterion::ShortestName, |a, b| {
            Some(b.file_name().chars().count().cmp(&a.file_name().chars().count()))
        }),
    ];

    for (criterion, compare) in criteria {
        let narrowed = best_by(&candidates, compare);
        if narrowed.len() == candidates.len() {
            continue;
        }
        candidates = narrowed;
        if candidates.len() == 1 {
            return Some((candidates[0].id, criterion));
        }
    }

    candidates.first().map(|f| (f.id, KeeperCriterion::FileId))
}

/// Compare two optional values where a present value beats an absent one.
/// `None` when both are absent, meaning this criterion cannot judge the pair.
fn cmp_present<T: Ord>(a: Option<T>, b: Option<T>) -> Option<Ordering> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        (Some(_), None) => Some(Ordering::Greater),
        (None, Some(_)) => Some(Ordering::Less),
        (None, None) => None,
    }
}

/// Candidates tied for the best value under `compare`, preserving order.
fn best_by<'a>(
    candidates: &[&'a MediaFile],
    compare: fn(&MediaFile, &MediaFile) -> Option<Ordering>,
) -> Vec<&'a MediaFile> {
    let mut best: Vec<&MediaFile> = Vec::new();
    for &candidate in candidates {
        match best.first() {
            None => best.push(candidate),
            Some(current) => match compare(candidate, current) {
                Some(Ordering::Greater) => {
                    best.clear();
                    best.push(candidate);
                }
                Some(Ordering::Equal) | None => best.push(candidate),
                Some(Ordering::Less) => {}
            },
        }
    }
    best
}
