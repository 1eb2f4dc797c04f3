pub mod log;
pub mod models;
mod queries;
mod sqlite;

pub use log::TransactionLog;
pub use sqlite::Database;
