//! Abstract store adapter for the person catalog.
//!
//! The relational store and its schema live outside this crate. This trait
//! is the contract a backend must honor so the online insert path and the
//! batch merge pass can run against it:
//! - a uniqueness constraint on the normalized display-name key
//! - a per-record version stamp checked on every write
//! - an atomic merge that rewrites every reference before deleting rows

use thiserror::Error;

use crate::merge::{DocumentLink, EventRecord, MergeApplication, RemapSummary, Relationship};
use crate::person::{DocumentId, NewPerson, PersonId, PersonRecord};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Person not found.
    #[error("Person not found: {0}")]
    PersonNotFound(PersonId),

    /// The normalized name key is already taken.
    #[error("Duplicate normalized name key: {0}")]
    DuplicateKey(String),

    /// The record changed since it was read.
    #[error("Stale record {id}: expected version {expected}, found {actual}")]
    StaleRecord {
        /// Record that moved.
        id: PersonId,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Storage trait for the person catalog and its dependent tables.
///
/// # Safety Considerations
/// - `insert_person`, `update_person` and `apply_merge` must each be atomic
/// - implementations must be safe to share across ingest workers
pub trait CatalogStore: Send + Sync {
    /// Get a live person by id. Removed ids return `None`.
    fn get(&self, id: PersonId) -> Result<Option<PersonRecord>, StorageError>;

    /// Every live person, ordered by id.
    fn all_persons(&self) -> Result<Vec<PersonRecord>, StorageError>;

    /// Persons whose display name or an alias normalizes to `key`.
    fn find_by_normalized(&self, key: &str) -> Result<Vec<PersonRecord>, StorageError>;

    /// Insert a new person and assign its id.
    ///
    /// # Errors
    /// - `DuplicateKey`: a live person already has the same normalized display name
    fn insert_person(&self, person: NewPerson) -> Result<PersonRecord, StorageError>;

    /// Overwrite a person if its stored version equals `expected_version`.
    /// Returns the stored record with its bumped version.
    ///
    /// # Errors
    /// - `PersonNotFound`: the id is not live
    /// - `StaleRecord`: the version moved since the caller read it
    /// - `DuplicateKey`: a rename collides with another person's key
    fn update_person(
        &self,
        person: PersonRecord,
        expected_version: u64,
    ) -> Result<PersonRecord, StorageError>;

    /// Link a person to a document. Linking twice is a no-op.
    fn link_document(&self, person: PersonId, document: &DocumentId) -> Result<(), StorageError>;

    /// Relationship edges with `person` at either end.
    fn relationships_for(&self, person: PersonId) -> Result<Vec<Relationship>, StorageError>;

    /// Document links of `person`.
    fn document_links_for(&self, person: PersonId) -> Result<Vec<DocumentLink>, StorageError>;

    /// Events whose person list mentions `person`.
    fn events_referencing(&self, person: PersonId) -> Result<Vec<EventRecord>, StorageError>;

    /// Apply a merge atomically: check member versions, rewrite every
    /// reference from removed ids to the canonical id, deduplicate collided
    /// edges, recompute counters, then delete the removed rows.
    ///
    /// Nothing is written unless every step succeeds.
    fn apply_merge(&self, merge: &MergeApplication) -> Result<RemapSummary, StorageError>;

    /// Follow merge redirects. Returns the live id a removed id was merged
    /// into, the id itself if live, or `None` if unknown.
    fn resolve_id(&self, id: PersonId) -> Result<Option<PersonId>, StorageError>;

    /// Counter bumped on every write. Readers compare it to detect staleness.
    fn generation(&self) -> Result<u64, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_catalog_store_object_safe(_: &dyn CatalogStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::PersonNotFound(PersonId::new(5));
        assert!(err.to_string().contains("Person not found"));

        let err = StorageError::StaleRecord {
            id: PersonId::new(5),
            expected: 2,
            actual: 3,
        };
        assert!(err.to_string().contains("expected version 2"));
    }
}
