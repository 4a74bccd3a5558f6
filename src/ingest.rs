//! Online ingestion of extracted name mentions.
//!
//! Each mention is matched against the catalog and either folded into an
//! existing person or inserted as a new one. The in-process check is only a
//! fast path: two workers can both miss and both insert, so the store's
//! uniqueness constraint on the normalized display name decides, and the
//! loser re-fetches the winner and folds its mention in instead.
//!
//! [`IngestPool`] runs ingestion on a fixed set of worker threads behind a
//! bounded queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CatalogCache;
use crate::config::ResolverConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::matcher::{match_candidates, CandidateSet, MatchRule};
use crate::normalize::normalize_name;
use crate::person::{is_placeholder, Mention, NewPerson, PersonId, PersonRecord};
use crate::storage::{CatalogStore, StorageError};

/// What happened to one mention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// A new person was inserted.
    Created {
        /// Id assigned by the store.
        id: PersonId,
    },
    /// The mention was folded into an existing person.
    Matched {
        /// Person that absorbed the mention.
        id: PersonId,
    },
    /// The name normalizes to nothing.
    Rejected,
    /// Concurrent writers kept winning; the mention was not applied this
    /// cycle and can be resubmitted.
    Skipped {
        /// What kept the mention from being applied.
        reason: String,
    },
}

impl IngestOutcome {
    /// The person the mention ended up on, if any.
    #[must_use]
    pub const fn person_id(&self) -> Option<PersonId> {
        match self {
            Self::Created { id } | Self::Matched { id } => Some(*id),
            Self::Rejected | Self::Skipped { .. } => None,
        }
    }
}

/// Matches mentions against the catalog and writes the result.
pub struct Ingestor {
    store: Arc<dyn CatalogStore>,
    cache: Arc<CatalogCache>,
    config: ResolverConfig,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Creates an ingestor with its own cache and default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        let cache = Arc::new(CatalogCache::new(Arc::clone(&store)));
        Self::with_cache(store, cache, ResolverConfig::default())
    }

    /// Creates an ingestor sharing `cache` with other consumers.
    #[must_use]
    pub fn with_cache(
        store: Arc<dyn CatalogStore>,
        cache: Arc<CatalogCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// The snapshot cache this ingestor reads and invalidates.
    #[must_use]
    pub fn cache(&self) -> &Arc<CatalogCache> {
        &self.cache
    }

    /// Ingests one mention.
    ///
    /// # Errors
    /// Returns `Storage` for backend failures. Lost races are not errors:
    /// they resolve to `Matched`, or to `Skipped` once retries run out.
    pub fn ingest(&self, mention: &Mention) -> ResolverResult<IngestOutcome> {
        let key = normalize_name(&mention.name);
        if key.is_empty() {
            debug!(name = %mention.name, "rejected mention with empty normalized name");
            return Ok(IngestOutcome::Rejected);
        }

        if let Some((existing, basis)) = self.find_existing(mention, &key)? {
            return self.absorb(existing, mention, &key, basis);
        }

        let person = NewPerson {
            display_name: mention.name.trim().to_string(),
            aliases: Vec::new(),
            category: mention.category.clone(),
            role: mention.role.clone(),
        };
        match self.store.insert_person(person) {
            Ok(record) => {
                if let Some(document) = &mention.document {
                    self.store.link_document(record.id, document)?;
                }
                self.cache.invalidate();
                info!(person_id = %record.id, name = %record.display_name, "created person");
                Ok(IngestOutcome::Created { id: record.id })
            }
            Err(StorageError::DuplicateKey(taken)) => {
                info!(key = %taken, "lost insert race on normalized name, folding into existing person");
                let owner = self
                    .store
                    .find_by_normalized(&key)?
                    .into_iter()
                    .find(|r| normalize_name(&r.display_name) == key);
                match owner {
                    Some(owner) => self.absorb(owner.id, mention, &key, MatchBasis::NormalizedKey),
                    None => Ok(skipped(&key, "normalized key owner vanished")),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Lowest-id person that the mention matches: exact key hits from the
    /// store first, then a matcher scan over the cached snapshot.
    fn find_existing(
        &self,
        mention: &Mention,
        key: &str,
    ) -> ResolverResult<Option<(PersonId, MatchBasis)>> {
        let exact = self.store.find_by_normalized(key)?;
        if let Some(hit) = exact.iter().map(|r| r.id).min() {
            return Ok(Some((hit, MatchBasis::NormalizedKey)));
        }

        let incoming = CandidateSet::from_names([mention.name.as_str()]);
        let snapshot = self.cache.snapshot()?;
        let hit = snapshot.iter().find_map(|r| {
            match_candidates(&incoming, &CandidateSet::of(r)).map(|rule| (r.id, MatchBasis::Rule(rule)))
        });
        Ok(hit)
    }

    /// Folds the mention into `id`: alias if the name is new, category and
    /// role if the record only has placeholders, and the document link.
    fn absorb(
        &self,
        mut id: PersonId,
        mention: &Mention,
        key: &str,
        basis: MatchBasis,
    ) -> ResolverResult<IngestOutcome> {
        for attempt in 0..=self.config.insert_retry_limit {
            let Some(record) = self.store.get(id)? else {
                // Merged away since we looked; follow the redirect.
                match self.store.resolve_id(id)? {
                    Some(canonical) => {
                        id = canonical;
                        continue;
                    }
                    None => return Ok(skipped(key, "matched person no longer exists")),
                }
            };

            if let Some(updated) = self.enrich(&record, mention, key) {
                match self.store.update_person(updated, record.version) {
                    Ok(_) => {}
                    Err(StorageError::StaleRecord { .. }) => {
                        warn!(person_id = %id, attempt, "person changed during ingest, retrying");
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            if let Some(document) = &mention.document {
                self.store.link_document(id, document)?;
            }
            self.cache.invalidate();
            info!(person_id = %id, name = %mention.name, rule = %basis, "matched mention to existing person");
            return Ok(IngestOutcome::Matched { id });
        }

        Ok(skipped(key, "retry limit reached on concurrent updates"))
    }

    fn enrich(&self, record: &PersonRecord, mention: &Mention, key: &str) -> Option<PersonRecord> {
        let placeholders = &self.config.placeholder_categories;
        let mut updated = record.clone();
        let mut changed = false;

        let known = CandidateSet::of(record).iter().any(|c| c.text() == key);
        if !known {
            changed |= updated.add_alias(mention.name.trim());
        }
        if is_placeholder(record.category.as_deref(), placeholders)
            && !is_placeholder(mention.category.as_deref(), placeholders)
        {
            updated.category.clone_from(&mention.category);
            changed = true;
        }
        if is_placeholder(record.role.as_deref(), placeholders)
            && !is_placeholder(mention.role.as_deref(), placeholders)
        {
            updated.role.clone_from(&mention.role);
            changed = true;
        }
        changed.then_some(updated)
    }
}

/// Why a mention was folded into an existing person.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchBasis {
    /// Same normalized name as a stored display name or alias.
    NormalizedKey,
    Rule(MatchRule),
}

impl std::fmt::Display for MatchBasis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NormalizedKey => f.write_str("normalized_key"),
            Self::Rule(rule) => write!(f, "{rule}"),
        }
    }
}

fn skipped(key: &str, reason: &str) -> IngestOutcome {
    warn!(key = %key, reason, "skipped mention; resubmit next cycle");
    IngestOutcome::Skipped {
        reason: reason.to_string(),
    }
}

/// Ingest pool sizing.
#[derive(Debug, Clone)]
pub struct IngestPoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued mentions.
    pub queue_capacity: usize,
}

impl Default for IngestPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

struct Job {
    mention: Mention,
    reply: Sender<ResolverResult<IngestOutcome>>,
}

/// Fixed pool of ingest workers fed by a bounded queue.
pub struct IngestPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl std::fmt::Debug for IngestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPool")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl IngestPool {
    /// Spawns the workers.
    ///
    /// # Errors
    /// Returns `Spawn` if a worker thread cannot be started; workers already
    /// running exit once the partially built pool is dropped.
    pub fn start(ingestor: Arc<Ingestor>, config: &IngestPoolConfig) -> ResolverResult<Self> {
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let ingestor = Arc::clone(&ingestor);
            let handle = thread::Builder::new()
                .name(format!("person-ingest-{idx}"))
                .spawn(move || {
                    while let Ok(Job { mention, reply }) = rx.recv() {
                        let _ = reply.send(ingestor.ingest(&mention));
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    /// Queues a mention, waiting for room if the queue is full.
    ///
    /// # Errors
    /// Returns `Disconnected` if every worker has exited.
    pub fn submit(&self, mention: Mention) -> ResolverResult<IngestTicket> {
        let (reply, rx) = bounded(1);
        self.tx
            .send(Job { mention, reply })
            .map_err(|_| ResolverError::Disconnected)?;
        Ok(IngestTicket { rx })
    }

    /// Queues a mention without blocking.
    ///
    /// # Errors
    /// - `QueueFull`: the queue is at capacity
    /// - `Disconnected`: every worker has exited
    pub fn try_submit(&self, mention: Mention) -> ResolverResult<IngestTicket> {
        let (reply, rx) = bounded(1);
        match self.tx.try_send(Job { mention, reply }) {
            Ok(()) => Ok(IngestTicket { rx }),
            Err(TrySendError::Full(_)) => Err(ResolverError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(ResolverError::Disconnected),
        }
    }

    /// Closes the queue, lets workers drain it, and joins them.
    pub fn shutdown(self) {
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Pending result of a submitted mention.
#[derive(Debug)]
pub struct IngestTicket {
    rx: Receiver<ResolverResult<IngestOutcome>>,
}

impl IngestTicket {
    /// Waits for the worker's answer.
    ///
    /// # Errors
    /// Returns the ingest error, or `Disconnected` if the worker died first.
    pub fn wait(self) -> ResolverResult<IngestOutcome> {
        self.rx.recv().map_err(|_| ResolverError::Disconnected)?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::merge::{DocumentLink, EventRecord, MergeApplication, RemapSummary, Relationship};
    use crate::person::DocumentId;
    use crate::storage::InMemoryCatalog;

    /// Catalog that loses every update race, or hides its rows from reads.
    struct Contended {
        inner: InMemoryCatalog,
        stale_updates: bool,
        hide_rows: bool,
        update_attempts: AtomicUsize,
    }

    impl Contended {
        fn new(inner: InMemoryCatalog) -> Self {
            Self {
                inner,
                stale_updates: false,
                hide_rows: false,
                update_attempts: AtomicUsize::new(0),
            }
        }
    }

    impl CatalogStore for Contended {
        fn get(&self, id: PersonId) -> Result<Option<PersonRecord>, StorageError> {
            self.inner.get(id)
        }

        fn all_persons(&self) -> Result<Vec<PersonRecord>, StorageError> {
            if self.hide_rows {
                return Ok(Vec::new());
            }
            self.inner.all_persons()
        }

        fn find_by_normalized(&self, key: &str) -> Result<Vec<PersonRecord>, StorageError> {
            if self.hide_rows {
                return Ok(Vec::new());
            }
            self.inner.find_by_normalized(key)
        }

        fn insert_person(&self, person: NewPerson) -> Result<PersonRecord, StorageError> {
            self.inner.insert_person(person)
        }

        fn update_person(
            &self,
            person: PersonRecord,
            expected_version: u64,
        ) -> Result<PersonRecord, StorageError> {
            self.update_attempts.fetch_add(1, Ordering::SeqCst);
            if self.stale_updates {
                return Err(StorageError::StaleRecord {
                    id: person.id,
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.inner.update_person(person, expected_version)
        }

        fn link_document(&self, person: PersonId, document: &DocumentId) -> Result<(), StorageError> {
            self.inner.link_document(person, document)
        }

        fn relationships_for(&self, person: PersonId) -> Result<Vec<Relationship>, StorageError> {
            self.inner.relationships_for(person)
        }

        fn document_links_for(&self, person: PersonId) -> Result<Vec<DocumentLink>, StorageError> {
            self.inner.document_links_for(person)
        }

        fn events_referencing(&self, person: PersonId) -> Result<Vec<EventRecord>, StorageError> {
            self.inner.events_referencing(person)
        }

        fn apply_merge(&self, merge: &MergeApplication) -> Result<RemapSummary, StorageError> {
            self.inner.apply_merge(merge)
        }

        fn resolve_id(&self, id: PersonId) -> Result<Option<PersonId>, StorageError> {
            self.inner.resolve_id(id)
        }

        fn generation(&self) -> Result<u64, StorageError> {
            self.inner.generation()
        }
    }

    fn ingestor() -> (Arc<InMemoryCatalog>, Ingestor) {
        let store = Arc::new(InMemoryCatalog::new());
        let ingestor = Ingestor::new(store.clone());
        (store, ingestor)
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let (store, ingestor) = ingestor();
        assert_eq!(ingestor.ingest(&Mention::named("")).unwrap(), IngestOutcome::Rejected);
        assert_eq!(ingestor.ingest(&Mention::named(" ,. ")).unwrap(), IngestOutcome::Rejected);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_variant_names_fold_into_first_person() {
        let (store, ingestor) = ingestor();
        let first = ingestor
            .ingest(&Mention::named("Jeffrey Epstein").in_document("doc-1"))
            .unwrap();
        let id = first.person_id().unwrap();
        assert_eq!(first, IngestOutcome::Created { id });

        for name in ["Epstein, Jeffrey", "Jeff Epstein", "JEFFREY EPSTEIN"] {
            let outcome = ingestor.ingest(&Mention::named(name).in_document("doc-2")).unwrap();
            assert_eq!(outcome, IngestOutcome::Matched { id });
        }

        let person = store.get(id).unwrap().unwrap();
        // Only the name with a new normalized form becomes an alias.
        assert_eq!(person.aliases, vec!["Jeff Epstein"]);
        assert_eq!(person.document_count, 2);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_unrelated_names_create_separate_people() {
        let (store, ingestor) = ingestor();
        ingestor.ingest(&Mention::named("John Smith")).unwrap();
        ingestor.ingest(&Mention::named("Jane Smith")).unwrap();
        ingestor.ingest(&Mention::named("Jeffrey")).unwrap();
        ingestor.ingest(&Mention::named("Jeffrey")).unwrap();
        // Identical single tokens share a normalized key: the second folds in.
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_category_fills_placeholder_only() {
        let (store, ingestor) = ingestor();
        let mut m = Mention::named("Ghislaine Maxwell");
        m.category = Some("unknown".to_string());
        let id = ingestor.ingest(&m).unwrap().person_id().unwrap();

        m.category = Some("socialite".to_string());
        ingestor.ingest(&m).unwrap();
        m.category = Some("pilot".to_string());
        ingestor.ingest(&m).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().category.as_deref(), Some("socialite"));
    }

    #[test]
    fn test_mention_of_merged_name_lands_on_canonical() {
        let store = Arc::new(InMemoryCatalog::from_records([
            PersonRecord::new(PersonId::new(1), "Bob Smith"),
            PersonRecord::new(PersonId::new(2), "Robert Smith"),
        ]));
        let ingestor = Ingestor::new(store.clone());
        crate::batch::BatchJob::new(store.clone()).run().unwrap();

        let outcome = ingestor
            .ingest(&Mention::named("Robert Smith").in_document("late"))
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Matched { id: PersonId::new(1) });
        assert_eq!(
            store.document_links_for(PersonId::new(1)).unwrap()[0].document,
            DocumentId::new("late")
        );
    }

    #[test]
    fn test_single_worker_pool_folds_nicknames() {
        let (store, ingestor) = ingestor();
        let config = IngestPoolConfig {
            workers: 1,
            queue_capacity: 8,
        };
        let pool = IngestPool::start(Arc::new(ingestor), &config).unwrap();
        let tickets: Vec<IngestTicket> = ["Bill Clinton", "William Clinton", "Bill Clinton"]
            .into_iter()
            .map(|n| pool.submit(Mention::named(n)).unwrap())
            .collect();
        let outcomes: Vec<IngestOutcome> = tickets.into_iter().map(|t| t.wait().unwrap()).collect();
        assert!(outcomes.iter().all(|o| o.person_id().is_some()));
        pool.shutdown();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_update_races_exhaust_retries_and_skip() {
        let mut contended = Contended::new(InMemoryCatalog::from_records([PersonRecord::new(
            PersonId::new(1),
            "Jeffrey Epstein",
        )]));
        contended.stale_updates = true;
        let store = Arc::new(contended);
        let config = ResolverConfig {
            insert_retry_limit: 2,
            ..ResolverConfig::default()
        };
        let cache = Arc::new(CatalogCache::new(store.clone()));
        let ingestor = Ingestor::with_cache(store.clone(), cache, config.clone());

        let outcome = ingestor
            .ingest(&Mention::named("Jeff Epstein").in_document("doc-9"))
            .unwrap();
        assert!(
            matches!(&outcome, IngestOutcome::Skipped { reason } if reason.contains("retry limit")),
            "{outcome:?}"
        );
        assert_eq!(
            store.update_attempts.load(Ordering::SeqCst),
            config.insert_retry_limit + 1
        );

        let person = store.get(PersonId::new(1)).unwrap().unwrap();
        assert!(person.aliases.is_empty());
        assert_eq!(person.version, 1);
        assert!(store.document_links_for(PersonId::new(1)).unwrap().is_empty());
    }

    #[test]
    fn test_existing_match_reports_its_basis() {
        let store = Arc::new(InMemoryCatalog::from_records([PersonRecord::new(
            PersonId::new(1),
            "Jeffrey Epstein",
        )]));
        let ingestor = Ingestor::new(store);

        let by_key = ingestor
            .find_existing(&Mention::named("Epstein, Jeffrey"), "jeffrey epstein")
            .unwrap();
        assert_eq!(by_key, Some((PersonId::new(1), MatchBasis::NormalizedKey)));

        let by_rule = ingestor
            .find_existing(&Mention::named("Jeff Epstein"), "jeff epstein")
            .unwrap();
        assert_eq!(
            by_rule,
            Some((PersonId::new(1), MatchBasis::Rule(MatchRule::TokenCorrespondence)))
        );
        assert_eq!(MatchBasis::NormalizedKey.to_string(), "normalized_key");

        let bare = ingestor.find_existing(&Mention::named("Epstein"), "epstein").unwrap();
        assert_eq!(bare, Some((PersonId::new(1), MatchBasis::Rule(MatchRule::AliasCorroboration))));
    }

    #[test]
    fn test_vanished_key_owner_skips() {
        let mut contended = Contended::new(InMemoryCatalog::from_records([PersonRecord::new(
            PersonId::new(1),
            "Jeffrey Epstein",
        )]));
        contended.hide_rows = true;
        let store = Arc::new(contended);
        let ingestor = Ingestor::new(store.clone());

        let outcome = ingestor.ingest(&Mention::named("Epstein, Jeffrey")).unwrap();
        assert!(matches!(outcome, IngestOutcome::Skipped { .. }), "{outcome:?}");
        assert_eq!(outcome.person_id(), None);
        assert_eq!(store.inner.len().unwrap(), 1);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&IngestOutcome::Created { id: PersonId::new(4) }).unwrap();
        assert_eq!(json, r#"{"outcome":"created","id":4}"#);
    }
}
