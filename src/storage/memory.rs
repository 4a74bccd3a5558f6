//! In-memory storage backend.
//!
//! `InMemoryCatalog` is the reference implementation of [`CatalogStore`]:
//! one `RwLock` over the person rows and every dependent table, so a merge
//! computes its full result and commits it under a single write guard.
//! It is intended for embedded usage and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;

use crate::merge::remap::{connection_count, document_count};
use crate::merge::{
    DocumentLink, EventRecord, MergeApplication, ReferenceRemapper, Relationship, RemapSummary,
};
use crate::normalize::normalize_name;
use crate::person::{DocumentId, NewPerson, PersonId, PersonRecord};
use crate::storage::traits::{CatalogStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct CatalogState {
    by_id: BTreeMap<PersonId, PersonRecord>,
    /// Normalized display name -> ids. More than one id per key only for
    /// rows loaded through `from_records`.
    by_key: HashMap<String, BTreeSet<PersonId>>,
    /// Normalized display name or alias -> ids.
    by_name: HashMap<String, BTreeSet<PersonId>>,
    relationships: Vec<Relationship>,
    document_links: BTreeSet<DocumentLink>,
    events: Vec<EventRecord>,
    merged_into: HashMap<PersonId, PersonId>,
    next_id: i64,
    generation: u64,
}

impl CatalogState {
    fn index_insert(&mut self, record: &PersonRecord) {
        let key = normalize_name(&record.display_name);
        if !key.is_empty() {
            self.by_key.entry(key).or_default().insert(record.id);
        }
        for name in record.names() {
            let key = normalize_name(name);
            if !key.is_empty() {
                self.by_name.entry(key).or_default().insert(record.id);
            }
        }
    }

    fn index_remove(&mut self, record: &PersonRecord) {
        let id = record.id;
        let remove = |index: &mut HashMap<String, BTreeSet<PersonId>>, key: String| {
            if let Some(set) = index.get_mut(&key) {
                set.remove(&id);
                if set.is_empty() {
                    index.remove(&key);
                }
            }
        };
        remove(&mut self.by_key, normalize_name(&record.display_name));
        for name in record.names() {
            remove(&mut self.by_name, normalize_name(name));
        }
    }

    /// A live id other than `except` already owns the display key of `name`.
    fn key_taken(&self, name: &str, except: Option<PersonId>) -> Option<String> {
        let key = normalize_name(name);
        let taken = self
            .by_key
            .get(&key)
            .is_some_and(|ids| ids.iter().any(|id| Some(*id) != except));
        taken.then_some(key)
    }

    fn live(&self, id: PersonId) -> Result<&PersonRecord, StorageError> {
        self.by_id.get(&id).ok_or(StorageError::PersonNotFound(id))
    }

    fn refresh_counters(&mut self, id: PersonId) {
        let docs = document_count(&self.document_links, id);
        let connections = connection_count(&self.relationships, id);
        if let Some(record) = self.by_id.get_mut(&id) {
            record.document_count = docs;
            record.connection_count = connections;
        }
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

fn resolve_canonical_id(state: &CatalogState, id: PersonId) -> Result<PersonId, StorageError> {
    let mut current = id;
    for _ in 0..128 {
        let Some(next) = state.merged_into.get(&current).copied() else {
            return Ok(current);
        };
        if next == current {
            return Err(StorageError::BackendError(
                "person merge map contains a self-cycle".to_string(),
            ));
        }
        current = next;
    }

    Err(StorageError::BackendError(
        "person merge map resolution exceeded hop limit".to_string(),
    ))
}

fn next_version(record: &PersonRecord) -> Result<u64, StorageError> {
    record
        .version
        .checked_add(1)
        .ok_or_else(|| StorageError::BackendError("person version overflow".to_string()))
}

/// Thread-safe in-memory person catalog with its dependent tables.
#[derive(Debug)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self {
            state: RwLock::new(CatalogState {
                next_id: 1,
                ..CatalogState::default()
            }),
        }
    }
}

impl InMemoryCatalog {
    /// Create a new empty catalog. Ids are assigned from 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load existing rows as they are, ids and versions included.
    ///
    /// Rows sharing a normalized display name are accepted here: they model
    /// a catalog that predates the uniqueness constraint and is waiting for
    /// a batch pass. Later inserts and renames are checked.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = PersonRecord>) -> Self {
        let mut state = CatalogState {
            next_id: 1,
            ..CatalogState::default()
        };
        for record in records {
            if let Some(prev) = state.by_id.remove(&record.id) {
                state.index_remove(&prev);
            }
            state.next_id = state.next_id.max(record.id.get().saturating_add(1));
            state.index_insert(&record);
            state.by_id.insert(record.id, record);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Number of live persons.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.len"))?;
        Ok(state.by_id.len())
    }

    /// True if the catalog holds no live persons.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Record a relationship edge. An edge with the same endpoints and kind
    /// is folded into the existing one.
    ///
    /// # Errors
    /// - `PersonNotFound`: an endpoint is not live
    pub fn add_relationship(&self, edge: Relationship) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("catalog.add_relationship"))?;
        state.live(edge.a)?;
        state.live(edge.b)?;
        let (a, b) = (edge.a, edge.b);
        let key = edge.key();
        if let Some(existing) = state.relationships.iter_mut().find(|e| e.key() == key) {
            existing.absorb(edge);
        } else {
            state.relationships.push(edge);
        }
        state.refresh_counters(a);
        state.refresh_counters(b);
        state.bump();
        Ok(())
    }

    /// Record an event referencing persons. Ids are stored as given.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn add_event(&self, event: EventRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("catalog.add_event"))?;
        state.events.push(event);
        state.bump();
        Ok(())
    }

    /// Every relationship edge.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn relationships(&self) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.relationships"))?;
        Ok(state.relationships.clone())
    }

    /// Every document link.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn document_links(&self) -> Result<Vec<DocumentLink>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.document_links"))?;
        Ok(state.document_links.iter().cloned().collect())
    }

    /// Every event record.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn events(&self) -> Result<Vec<EventRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.events"))?;
        Ok(state.events.clone())
    }

    /// Rows in any dependent table that still mention `id`.
    ///
    /// # Errors
    /// Returns `BackendError` if the lock is poisoned.
    pub fn references_to(&self, id: PersonId) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.references_to"))?;
        let edges = state.relationships.iter().filter(|e| e.touches(id)).count();
        let links = state.document_links.iter().filter(|l| l.person == id).count();
        let events = state
            .events
            .iter()
            .filter(|e| e.person_ids.contains(&id))
            .count();
        Ok(edges + links + events)
    }
}

impl CatalogStore for InMemoryCatalog {
    fn get(&self, id: PersonId) -> Result<Option<PersonRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn all_persons(&self) -> Result<Vec<PersonRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.all_persons"))?;
        Ok(state.by_id.values().cloned().collect())
    }

    fn find_by_normalized(&self, key: &str) -> Result<Vec<PersonRecord>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("catalog.find_by_normalized"))?;
        let Some(ids) = state.by_name.get(key) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .cloned()
            .collect())
    }

    fn insert_person(&self, person: NewPerson) -> Result<PersonRecord, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("catalog.insert"))?;
        if normalize_name(&person.display_name).is_empty() {
            return Err(StorageError::BackendError(format!(
                "display name normalizes to an empty key: {:?}",
                person.display_name
            )));
        }
        if let Some(key) = state.key_taken(&person.display_name, None) {
            return Err(StorageError::DuplicateKey(key));
        }

        let id = PersonId::new(state.next_id);
        state.next_id = state
            .next_id
            .checked_add(1)
            .ok_or_else(|| StorageError::BackendError("person id overflow".to_string()))?;

        let mut record = PersonRecord::new(id, person.display_name).with_aliases(person.aliases);
        record.category = person.category;
        record.role = person.role;

        state.index_insert(&record);
        state.by_id.insert(id, record.clone());
        state.bump();
        debug!(person_id = %id, "inserted person");
        Ok(record)
    }

    fn update_person(
        &self,
        mut person: PersonRecord,
        expected_version: u64,
    ) -> Result<PersonRecord, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("catalog.update"))?;
        let prev = state.live(person.id)?.clone();
        if prev.version != expected_version {
            return Err(StorageError::StaleRecord {
                id: person.id,
                expected: expected_version,
                actual: prev.version,
            });
        }
        if let Some(key) = state.key_taken(&person.display_name, Some(person.id)) {
            if normalize_name(&prev.display_name) != key {
                return Err(StorageError::DuplicateKey(key));
            }
        }

        person.version = next_version(&prev)?;
        person.updated_at = Utc::now();
        person.document_count = prev.document_count;
        person.connection_count = prev.connection_count;

        state.index_remove(&prev);
        state.index_insert(&person);
        state.by_id.insert(person.id, person.clone());
        state.bump();
        Ok(person)
    }

    fn link_document(&self, person: PersonId, document: &DocumentId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("catalog.link_document"))?;
        let id = resolve_canonical_id(&state, person)?;
        let version = next_version(state.live(id)?)?;
        let link = DocumentLink {
            person: id,
            document: document.clone(),
        };
        if !state.document_links.insert(link) {
            return Ok(());
        }
        state.refresh_counters(id);
        if let Some(record) = state.by_id.get_mut(&id) {
            record.version = version;
            record.updated_at = Utc::now();
        }
        state.bump();
        Ok(())
    }

    fn relationships_for(&self, person: PersonId) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.relationships_for"))?;
        Ok(state
            .relationships
            .iter()
            .filter(|e| e.touches(person))
            .cloned()
            .collect())
    }

    fn document_links_for(&self, person: PersonId) -> Result<Vec<DocumentLink>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.document_links_for"))?;
        Ok(state
            .document_links
            .iter()
            .filter(|l| l.person == person)
            .cloned()
            .collect())
    }

    fn events_referencing(&self, person: PersonId) -> Result<Vec<EventRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.events_referencing"))?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.person_ids.contains(&person))
            .cloned()
            .collect())
    }

    fn apply_merge(&self, merge: &MergeApplication) -> Result<RemapSummary, StorageError> {
        let canonical_id = merge.canonical.id;
        if merge.removed.contains(&canonical_id) {
            return Err(StorageError::BackendError(
                "cannot merge a person into itself".to_string(),
            ));
        }

        let mut state = self.state.write().map_err(|_| lock_err("catalog.apply_merge"))?;

        for (&id, &expected) in &merge.expected_versions {
            let actual = state.live(id)?.version;
            if actual != expected {
                return Err(StorageError::StaleRecord {
                    id,
                    expected,
                    actual,
                });
            }
        }
        for &id in &merge.removed {
            state.live(id)?;
        }
        let prev = state.live(canonical_id)?.clone();
        let version = next_version(&prev)?;

        // Compute every table's new contents before touching the state.
        let remapper = ReferenceRemapper::new(canonical_id, merge.removed.iter().copied());
        let mut neighbours: BTreeSet<PersonId> = BTreeSet::new();
        for edge in &state.relationships {
            if merge.removed.iter().any(|id| edge.touches(*id)) {
                neighbours.insert(edge.a);
                neighbours.insert(edge.b);
            }
        }
        let relationships = remapper.remap_relationships(state.relationships.clone());
        let (links, link_rewrites) = remapper.remap_document_links(state.document_links.clone());
        let (events, event_rewrites) = remapper.remap_events(state.events.clone());

        // Commit.
        state.relationships = relationships.edges;
        state.document_links = links;
        state.events = events;

        for &id in &merge.removed {
            if let Some(row) = state.by_id.remove(&id) {
                state.index_remove(&row);
            }
            state.merged_into.insert(id, canonical_id);
        }

        let mut canonical = merge.canonical.clone();
        canonical.version = version;
        canonical.updated_at = Utc::now();
        state.index_remove(&prev);
        state.index_insert(&canonical);
        state.by_id.insert(canonical_id, canonical);

        state.refresh_counters(canonical_id);
        for id in neighbours {
            if !remapper.is_removed(id) {
                state.refresh_counters(id);
            }
        }
        state.bump();

        let (document_count, connection_count) = state
            .by_id
            .get(&canonical_id)
            .map_or((0, 0), |r| (r.document_count, r.connection_count));

        let mut rewrites = relationships.rewrites;
        rewrites.extend(link_rewrites);
        rewrites.extend(event_rewrites);

        Ok(RemapSummary {
            rewrites,
            collisions: relationships.collisions,
            self_loops_dropped: relationships.self_loops_dropped,
            document_count,
            connection_count,
        })
    }

    fn resolve_id(&self, id: PersonId) -> Result<Option<PersonId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.resolve_id"))?;
        let canonical = resolve_canonical_id(&state, id)?;
        Ok(state.by_id.contains_key(&canonical).then_some(canonical))
    }

    fn generation(&self) -> Result<u64, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("catalog.generation"))?;
        Ok(state.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> PersonId {
        PersonId::new(n)
    }

    fn seeded() -> InMemoryCatalog {
        InMemoryCatalog::from_records([
            PersonRecord::new(id(1), "Jeffrey Epstein"),
            PersonRecord::new(id(2), "Epstein, Jeffrey"),
            PersonRecord::new(id(3), "J. Epstein").with_aliases(["Jeffrey E."]),
            PersonRecord::new(id(4), "Ghislaine Maxwell"),
        ])
    }

    fn application(store: &InMemoryCatalog, canonical: i64, removed: &[i64]) -> MergeApplication {
        let canonical = store.get(id(canonical)).unwrap().unwrap();
        let mut expected_versions = BTreeMap::from([(canonical.id, canonical.version)]);
        for &r in removed {
            expected_versions.insert(id(r), store.get(id(r)).unwrap().unwrap().version);
        }
        MergeApplication {
            canonical,
            removed: removed.iter().copied().map(id).collect(),
            expected_versions,
        }
    }

    #[test]
    fn insert_assigns_ids_and_enforces_normalized_uniqueness() {
        let store = InMemoryCatalog::new();
        let a = store.insert_person(NewPerson::named("Jeffrey Epstein")).unwrap();
        assert_eq!(a.id, id(1));
        assert_eq!(a.version, 1);

        let err = store.insert_person(NewPerson::named("EPSTEIN, Jeffrey")).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey(ref k) if k == "jeffrey epstein"));

        let b = store.insert_person(NewPerson::named("Ghislaine Maxwell")).unwrap();
        assert_eq!(b.id, id(2));
        assert!(store.insert_person(NewPerson::named("  ")).is_err());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn from_records_keeps_legacy_duplicates_and_continues_ids() {
        let store = seeded();
        assert_eq!(store.find_by_normalized("jeffrey epstein").unwrap().len(), 2);
        assert_eq!(store.find_by_normalized("jeffrey e").unwrap()[0].id, id(3));
        let next = store.insert_person(NewPerson::named("Bill Clinton")).unwrap();
        assert_eq!(next.id, id(5));
    }

    #[test]
    fn update_checks_version_and_reindexes() {
        let store = seeded();
        let mut p = store.get(id(4)).unwrap().unwrap();
        p.add_alias("G. Maxwell");
        let stored = store.update_person(p.clone(), 1).unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(store.find_by_normalized("g maxwell").unwrap()[0].id, id(4));

        let err = store.update_person(p, 1).unwrap_err();
        assert!(matches!(err, StorageError::StaleRecord { expected: 1, actual: 2, .. }));

        let mut renamed = store.get(id(4)).unwrap().unwrap();
        renamed.display_name = "Jeffrey Epstein".to_string();
        assert!(matches!(
            store.update_person(renamed, 2),
            Err(StorageError::DuplicateKey(_))
        ));
    }

    #[test]
    fn link_document_is_idempotent_and_recounts() {
        let store = seeded();
        let doc = DocumentId::new("doc-1");
        store.link_document(id(1), &doc).unwrap();
        store.link_document(id(1), &doc).unwrap();
        let p = store.get(id(1)).unwrap().unwrap();
        assert_eq!(p.document_count, 1);
        assert_eq!(p.version, 2);
        assert_eq!(store.document_links_for(id(1)).unwrap().len(), 1);
    }

    #[test]
    fn apply_merge_rewrites_every_reference_and_redirects() {
        let store = seeded();
        store
            .add_relationship(Relationship::new(id(2), id(4), "associate", 0.4).with_document("d1"))
            .unwrap();
        store
            .add_relationship(Relationship::new(id(3), id(4), "associate", 0.9).with_document("d2"))
            .unwrap();
        store.add_relationship(Relationship::new(id(1), id(2), "alias", 1.0)).unwrap();
        store.link_document(id(2), &DocumentId::new("d1")).unwrap();
        store.link_document(id(3), &DocumentId::new("d1")).unwrap();
        store.link_document(id(3), &DocumentId::new("d2")).unwrap();
        store
            .add_event(EventRecord {
                id: 7,
                person_ids: vec![id(3), id(4), id(1)],
            })
            .unwrap();

        let generation = store.generation().unwrap();
        let summary = store.apply_merge(&application(&store, 1, &[2, 3])).unwrap();

        for removed in [2, 3] {
            assert_eq!(store.references_to(id(removed)).unwrap(), 0);
            assert!(store.get(id(removed)).unwrap().is_none());
            assert_eq!(store.resolve_id(id(removed)).unwrap(), Some(id(1)));
        }
        assert_eq!(store.resolve_id(id(99)).unwrap(), None);
        assert!(store.generation().unwrap() > generation);

        let edges = store.relationships().unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].strength - 0.9).abs() < f64::EPSILON);
        assert_eq!(edges[0].documents.len(), 2);
        assert_eq!(summary.collisions.len(), 1);
        assert_eq!(summary.self_loops_dropped, 1);
        assert_eq!(summary.document_count, 2);
        assert_eq!(summary.connection_count, 1);

        assert_eq!(store.events().unwrap()[0].person_ids, vec![id(1), id(4)]);
        assert_eq!(store.get(id(4)).unwrap().unwrap().connection_count, 1);
    }

    #[test]
    fn apply_merge_rejects_stale_versions_without_writing() {
        let store = seeded();
        let app = application(&store, 1, &[2]);
        store.link_document(id(2), &DocumentId::new("late")).unwrap();

        let err = store.apply_merge(&app).unwrap_err();
        assert!(matches!(err, StorageError::StaleRecord { .. }));
        assert!(store.get(id(2)).unwrap().is_some());
        assert_eq!(store.references_to(id(2)).unwrap(), 1);
    }

    #[test]
    fn link_document_follows_redirects() {
        let store = seeded();
        store.apply_merge(&application(&store, 1, &[2])).unwrap();
        store.link_document(id(2), &DocumentId::new("after")).unwrap();
        assert_eq!(store.document_links_for(id(1)).unwrap().len(), 1);
        assert_eq!(store.references_to(id(2)).unwrap(), 0);
    }
}
