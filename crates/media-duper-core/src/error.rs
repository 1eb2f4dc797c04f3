use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Duplicate group {0} not found")]
    GroupNotFound(Uuid),

    #[error("File {0} is not known to the catalog")]
    UnknownFile(Uuid),

    #[error("Keeper {keeper_id} is not a member of group {group_id}")]
    KeeperNotInGroup { group_id: Uuid, keeper_id: Uuid },

    /// A merge failed part-way. Files already moved were put back before this was returned.
    #[error("Merge of group {group_id} failed ({rolled_back} file(s) rolled back): {reason}")]
    MergeExecution {
        group_id: Uuid,
        reason: String,
        rolled_back: usize,
    },

    /// Rollback itself failed; the listed paths need manual attention.
    #[error("Rollback failed, files left in trash: {0:?}")]
    RollbackFailed(Vec<String>),

    #[error("Undo unavailable: {0}")]
    UndoUnavailable(String),

    #[error("Invalid merge state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
