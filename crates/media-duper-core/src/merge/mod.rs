pub mod executor;
pub mod lock;
pub mod metadata_writer;
pub mod plan;
pub mod trash;

pub use executor::{MergeExecutor, MergeState};
pub use lock::FileLocks;
pub use metadata_writer::{MetadataWriter, SidecarWriter};
pub use plan::{MergePlan, MergePlanField, MergePlanner};
pub use trash::TrashBin;
