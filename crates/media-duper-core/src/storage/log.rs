use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

use super::models::MergeTransaction;
use super::sqlite::Database;
use crate::error::Error;

/// The persistent merge history.
///
/// All writes go through one connection behind a mutex. File-backed logs keep a
/// second connection for history reads so a slow writer does not block them.
pub struct TransactionLog {
    writer: Mutex<Database>,
    reader: Option<Mutex<Database>>,
}

impl TransactionLog {
    pub fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path.to_string_lossy();
        let writer = Database::open(&path_str)?;
        let reader = Database::open(&path_str)?;
        info!("Opened transaction log at {}", path.display());
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self {
            writer: Mutex::new(Database::open_in_memory()?),
            reader: None,
        })
    }

    fn write(&self) -> Result<MutexGuard<'_, Database>, Error> {
        self.writer
            .lock()
            .map_err(|_| Error::Other("transaction log writer lock poisoned".to_string()))
    }

    fn read(&self) -> Result<MutexGuard<'_, Database>, Error> {
        match &self.reader {
            Some(reader) => reader
                .lock()
                .map_err(|_| Error::Other("transaction log reader lock poisoned".to_string())),
            None => self.write(),
        }
    }

    pub fn record(&self, txn: &MergeTransaction) -> Result<(), Error> {
        self.write()?.insert_merge_transaction(txn)?;
        Ok(())
    }

    pub fn latest(&self) -> Result<Option<MergeTransaction>, Error> {
        Ok(self.read()?.latest_merge_transaction()?)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<MergeTransaction>, Error> {
        Ok(self.read()?.get_merge_transaction(id)?)
    }

    pub fn fetch_recent_transactions(&self, limit: usize) -> Result<Vec<MergeTransaction>, Error> {
        Ok(self.read()?.fetch_recent_transactions(limit)?)
    }

    pub fn delete(&self, id: Uuid) -> Result<bool, Error> {
        Ok(self.write()?.delete_merge_transaction(id)?)
    }

    pub fn is_file_in_trash(&self, file_id: Uuid) -> Result<bool, Error> {
        Ok(self.read()?.is_file_in_trash(file_id)?)
    }

    pub fn total_space_freed(&self) -> Result<u64, Error> {
        Ok(self.read()?.total_space_freed()?)
    }
}
