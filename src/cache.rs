//! Read-through snapshot of the person catalog.
//!
//! Consumers that scan the whole catalog (online matching, lookup) share one
//! snapshot instead of re-reading the store per call. The snapshot is tagged
//! with the store generation it was read at and reloads when the store has
//! moved on, or when a writer calls [`CatalogCache::invalidate`].

use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::person::PersonRecord;
use crate::storage::{CatalogStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Clone)]
struct Snapshot {
    generation: u64,
    records: Arc<[PersonRecord]>,
}

/// Shared, invalidatable view of every live person.
pub struct CatalogCache {
    store: Arc<dyn CatalogStore>,
    current: RwLock<Option<Snapshot>>,
}

impl std::fmt::Debug for CatalogCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCache").finish_non_exhaustive()
    }
}

impl CatalogCache {
    /// Creates an empty cache over `store`. Nothing is read until the first
    /// snapshot.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Every live person, ordered by id.
    ///
    /// # Errors
    /// Propagates store errors from the reload.
    pub fn snapshot(&self) -> Result<Arc<[PersonRecord]>, StorageError> {
        let generation = self.store.generation()?;
        {
            let current = self.current.read().map_err(|_| lock_err("cache.snapshot"))?;
            if let Some(snapshot) = current.as_ref().filter(|s| s.generation == generation) {
                return Ok(Arc::clone(&snapshot.records));
            }
        }

        // Generation is read before the rows, so a write racing the reload
        // leaves an older tag on newer rows and the next call reloads again.
        let records: Arc<[PersonRecord]> = self.store.all_persons()?.into();
        trace!(generation, persons = records.len(), "reloaded catalog snapshot");
        let mut current = self.current.write().map_err(|_| lock_err("cache.reload"))?;
        *current = Some(Snapshot {
            generation,
            records: Arc::clone(&records),
        });
        Ok(records)
    }

    /// Drops the snapshot so the next read goes to the store.
    pub fn invalidate(&self) {
        // A poisoned lock only ever guards a stale snapshot; clear it anyway.
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::person::NewPerson;
    use crate::storage::InMemoryCatalog;

    #[test]
    fn snapshot_is_shared_until_the_store_moves() {
        let store = Arc::new(InMemoryCatalog::new());
        let cache = CatalogCache::new(store.clone());

        store.insert_person(NewPerson::named("Jeffrey Epstein")).unwrap();
        let first = cache.snapshot().unwrap();
        let again = cache.snapshot().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        store.insert_person(NewPerson::named("Ghislaine Maxwell")).unwrap();
        let reloaded = cache.snapshot().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }

    #[test]
    fn invalidate_forces_reload() {
        let store = Arc::new(InMemoryCatalog::new());
        store.insert_person(NewPerson::named("Bill Clinton")).unwrap();
        let cache = CatalogCache::new(store);

        let first = cache.snapshot().unwrap();
        cache.invalidate();
        let second = cache.snapshot().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first[..], second[..]);
    }
}
