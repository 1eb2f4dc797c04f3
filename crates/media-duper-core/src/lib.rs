pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod media;
pub mod merge;
pub mod progress;
pub mod scoring;
pub mod service;
pub mod signal;
pub mod storage;

pub use cluster::{ClusterReport, DuplicateGroupResult, GroupMember};
pub use config::{AppConfig, Thresholds};
pub use engine::{CancelToken, DedupeEngine, DedupeResult};
pub use error::Error;
pub use media::{FileCatalog, MediaFile, MediaType};
pub use merge::{MergePlan, MergePlanField, MergeState};
pub use progress::{ProgressReporter, SilentReporter};
pub use scoring::PairVerdict;
pub use service::MergeService;
pub use signal::weights::WeightTable;
pub use storage::models::MergeTransaction;
