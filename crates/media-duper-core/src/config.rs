use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::signal::weights::WeightTable;

/// Per-media-type cutoffs and the confidence thresholds used for banding and grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Max perceptual-hash Hamming distance for two photos to count as visually equal.
    pub image_hash_distance: u32,
    /// Max per-frame hash distance for video frames.
    pub video_frame_distance: u32,
    /// Allowed duration difference, in percent of the longer file.
    pub duration_tolerance_pct: f64,
    pub capture_window_secs: i64,
    /// Aggregate confidence a pair needs to be a duplicate match.
    pub acceptance: f64,
    /// Added to `acceptance` to get the group-cohesion threshold.
    pub cohesion_margin: f64,
    /// Below this a pair is banded as a fail; between it and `acceptance` it needs review.
    pub review_floor: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            image_hash_distance: 10,
            video_frame_distance: 5,
            duration_tolerance_pct: 10.0,
            capture_window_secs: 300,
            acceptance: 0.8,
            cohesion_margin: 0.05,
            review_floor: 0.5,
        }
    }
}

impl Thresholds {
    pub fn cohesion(&self) -> f64 {
        (self.acceptance + self.cohesion_margin).min(1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub weights: WeightTable,
    pub thresholds: Thresholds,
    /// Worker threads for pairwise comparison; `None` uses one per core.
    pub concurrency: Option<usize>,
    /// Time limit for scoring a single pair before it is penalized.
    pub pair_timeout_ms: Option<u64>,
    /// Caps how many partners each file is compared against.
    pub max_comparisons_per_file: Option<usize>,
    pub trash_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            weights: WeightTable::default(),
            thresholds: Thresholds::default(),
            concurrency: None,
            pair_timeout_ms: None,
            max_comparisons_per_file: None,
            trash_dir: PathBuf::from(".media-duper-trash"),
            db_path: PathBuf::from("media_duper.db"),
        }
    }
}

impl AppConfig {
    pub fn pair_timeout(&self) -> Option<Duration> {
        self.pair_timeout_ms.map(Duration::from_millis)
    }
}

/// Load `MediaDuper.*` (optional) overlaid with `MEDIA_DUPER__*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    dotenv::dotenv().ok();
    load_configuration_from("MediaDuper")
}

pub fn load_configuration_from(file_stem: &str) -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix("MEDIA_DUPER")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
