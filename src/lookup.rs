//! Name and id lookup against canonical records.
//!
//! Retrieval consumers resolve user-supplied names with the same normalizer
//! and matcher the engine merges with, and never see a removed id.

use std::sync::Arc;

use crate::cache::CatalogCache;
use crate::error::ResolverResult;
use crate::matcher::{match_candidates, CandidateSet};
use crate::normalize::normalize_name;
use crate::person::{PersonId, PersonRecord};

/// Read-side view over the catalog cache.
#[derive(Debug, Clone)]
pub struct PersonLookup {
    cache: Arc<CatalogCache>,
}

impl PersonLookup {
    /// Creates a lookup over a shared cache.
    #[must_use]
    pub fn new(cache: Arc<CatalogCache>) -> Self {
        Self { cache }
    }

    /// Persons matching `name`, at most `limit` of them.
    ///
    /// Records with a name that normalizes exactly to the query come first,
    /// then records the matcher accepts. Within each group, better-attested
    /// records (more documents) lead, then lower ids.
    ///
    /// # Errors
    /// Propagates store errors from a snapshot reload.
    pub fn find(&self, name: &str, limit: usize) -> ResolverResult<Vec<PersonRecord>> {
        let key = normalize_name(name);
        if key.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query = CandidateSet::from_names([name]);
        let snapshot = self.cache.snapshot()?;

        let mut exact = Vec::new();
        let mut matched = Vec::new();
        for record in snapshot.iter() {
            let candidates = CandidateSet::of(record);
            if candidates.iter().any(|c| c.text() == key) {
                exact.push(record);
            } else if match_candidates(&query, &candidates).is_some() {
                matched.push(record);
            }
        }
        let rank = |r: &&PersonRecord| (std::cmp::Reverse(r.document_count), r.id);
        exact.sort_by_key(rank);
        matched.sort_by_key(rank);

        Ok(exact
            .into_iter()
            .chain(matched)
            .take(limit)
            .cloned()
            .collect())
    }

    /// The live record for `id`, following merge redirects. `None` if the
    /// id never existed.
    ///
    /// # Errors
    /// Propagates store errors.
    pub fn resolve(&self, id: PersonId) -> ResolverResult<Option<PersonRecord>> {
        let store = self.cache.store();
        match store.resolve_id(id)? {
            Some(canonical) => Ok(store.get(canonical)?),
            None => Ok(None),
        }
    }
}
