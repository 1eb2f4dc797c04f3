use ahash::AHashSet;
use std::sync::{Condvar, Mutex};
use uuid::Uuid;

use crate::error::Error;

/// Advisory locks over sets of file ids.
///
/// A merge holds every id it touches. Merges over overlapping sets wait for each
/// other; disjoint sets proceed concurrently.
#[derive(Default)]
pub struct FileLocks {
    held: Mutex<AHashSet<Uuid>>,
    released: Condvar,
}

pub struct FileLockGuard<'a> {
    locks: &'a FileLocks,
    ids: Vec<Uuid>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until none of `ids` is held, then hold all of them.
    pub fn acquire(&self, ids: &[Uuid]) -> Result<FileLockGuard<'_>, Error> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut held = self.held.lock().map_err(|_| poisoned())?;
        while ids.iter().any(|id| held.contains(id)) {
            held = self.released.wait(held).map_err(|_| poisoned())?;
        }
        held.extend(ids.iter().copied());
        Ok(FileLockGuard { locks: self, ids })
    }

    /// Hold `ids` only if none is currently held.
    pub fn try_acquire(&self, ids: &[Uuid]) -> Result<Option<FileLockGuard<'_>>, Error> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut held = self.held.lock().map_err(|_| poisoned())?;
        if ids.iter().any(|id| held.contains(id)) {
            return Ok(None);
        }
        held.extend(ids.iter().copied());
        Ok(Some(FileLockGuard { locks: self, ids }))
    }

    pub fn is_held(&self, id: Uuid) -> bool {
        self.held.lock().map(|held| held.contains(&id)).unwrap_or(false)
    }
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            for id in &self.ids {
                held.remove(id);
            }
        }
        self.locks.released.notify_all();
    }
}

fn poisoned() -> Error {
    Error::Other("file lock table poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_overlapping_sets_exclude() {
        let locks = FileLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let guard = locks.acquire(&[a, b]).unwrap();
        assert!(locks.try_acquire(&[b, c]).unwrap().is_none());
        assert!(locks.try_acquire(&[c]).unwrap().is_some());
        drop(guard);
        assert!(!locks.is_held(a));
        assert!(locks.try_acquire(&[b, c]).unwrap().is_some());
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let locks = Arc::new(FileLocks::new());
        let id = Uuid::new_v4();
        let guard = locks.acquire(&[id]).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.acquire(&[id]).unwrap();
                true
            })
        };
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
