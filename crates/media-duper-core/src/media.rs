use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::signal::SignalKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Video,
    Audio,
    Other,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Other => "other",
        }
    }

    /// Signal that must be measurable for a pair of this type to be scored at all.
    pub fn required_signal(&self) -> Option<SignalKind> {
        match self {
            MediaType::Photo => Some(SignalKind::PerceptualHash),
            MediaType::Video => Some(SignalKind::FrameSequence),
            MediaType::Audio => Some(SignalKind::Duration),
            MediaType::Other => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque measurements computed by the host for one file.
///
/// Nothing here is derived by this crate: hashes and fingerprints arrive precomputed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaFeatures {
    pub checksum: Option<String>,
    pub perceptual_hash: Option<u64>,
    #[serde(default)]
    pub frame_hashes: Vec<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bits per second, for video and audio.
    pub bitrate: Option<u64>,
    pub duration_secs: Option<f64>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl MediaFeatures {
    pub fn pixel_count(&self) -> Option<u64> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(w as u64 * h as u64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    CaptureDate,
    Gps,
    CameraModel,
    Title,
    Caption,
    Keywords,
}

impl MetadataField {
    pub const ALL: [MetadataField; 6] = [
        MetadataField::CaptureDate,
        MetadataField::Gps,
        MetadataField::CameraModel,
        MetadataField::Title,
        MetadataField::Caption,
        MetadataField::Keywords,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            MetadataField::CaptureDate => "capture_date",
            MetadataField::Gps => "gps",
            MetadataField::CameraModel => "camera_model",
            MetadataField::Title => "title",
            MetadataField::Caption => "caption",
            MetadataField::Keywords => "keywords",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetadataField::CaptureDate => "Capture date",
            MetadataField::Gps => "Location",
            MetadataField::CameraModel => "Camera model",
            MetadataField::Title => "Title",
            MetadataField::Caption => "Caption",
            MetadataField::Keywords => "Keywords",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, MetadataField::Keywords)
    }
}

/// A metadata value as written to a keeper file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|i| i.trim().is_empty()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub capture_date: Option<String>,
    pub gps: Option<String>,
    pub camera_model: Option<String>,
    pub title: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl MediaMetadata {
    /// Returns the field's value, treating blank strings and empty lists as absent.
    pub fn get(&self, field: MetadataField) -> Option<FieldValue> {
        let value = match field {
            MetadataField::CaptureDate => self.capture_date.clone().map(FieldValue::Text),
            MetadataField::Gps => self.gps.clone().map(FieldValue::Text),
            MetadataField::CameraModel => self.camera_model.clone().map(FieldValue::Text),
            MetadataField::Title => self.title.clone().map(FieldValue::Text),
            MetadataField::Caption => self.caption.clone().map(FieldValue::Text),
            MetadataField::Keywords => Some(FieldValue::List(self.keywords.clone())),
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, field: MetadataField, value: FieldValue) {
        let text = |v: FieldValue| match v {
            FieldValue::Text(s) => s,
            FieldValue::List(items) => items.join(", "),
        };
        match field {
            MetadataField::CaptureDate => self.capture_date = Some(text(value)),
            MetadataField::Gps => self.gps = Some(text(value)),
            MetadataField::CameraModel => self.camera_model = Some(text(value)),
            MetadataField::Title => self.title = Some(text(value)),
            MetadataField::Caption => self.caption = Some(text(value)),
            MetadataField::Keywords => {
                self.keywords = match value {
                    FieldValue::List(items) => items,
                    FieldValue::Text(s) => vec![s],
                }
            }
        }
    }
}

/// A file handed to the core by the host scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: Uuid,
    pub path: PathBuf,
    pub media_type: MediaType,
    pub file_size: u64,
    #[serde(default)]
    pub features: MediaFeatures,
    #[serde(default)]
    pub metadata: MediaMetadata,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>, media_type: MediaType, file_size: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            media_type,
            file_size,
            features: MediaFeatures::default(),
            metadata: MediaMetadata::default(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Resolves file ids to their current on-disk location.
pub trait PathResolver: Send + Sync {
    fn resolve_file_path(&self, file_id: Uuid) -> Option<PathBuf>;
}

/// In-memory index of the files under consideration.
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    files: AHashMap<Uuid, MediaFile>,
}

impl FileCatalog {
    pub fn new(files: impl IntoIterator<Item = MediaFile>) -> Self {
        Self {
            files: files.into_iter().map(|f| (f.id, f)).collect(),
        }
    }

    pub fn insert(&mut self, file: MediaFile) {
        self.files.insert(file.id, file);
    }

    pub fn get(&self, id: Uuid) -> Option<&MediaFile> {
        self.files.get(&id)
    }

    pub fn remove(&mut self, id: Uuid) -> Option<MediaFile> {
        self.files.remove(&id)
    }

    pub fn set_metadata(&mut self, id: Uuid, metadata: MediaMetadata) -> bool {
        match self.files.get_mut(&id) {
            Some(file) => {
                file.metadata = metadata;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &MediaFile> {
        self.files.values()
    }
}

impl PathResolver for FileCatalog {
    fn resolve_file_path(&self, file_id: Uuid) -> Option<PathBuf> {
        self.files.get(&file_id).map(|f| f.path.clone())
    }
}
