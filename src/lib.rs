//! # person-resolver - Person entity resolution for extracted documents
//!
//! Decides when two catalog records name the same real individual, groups
//! such records into clusters, and merges each confirmed cluster into one
//! canonical record while rewriting every reference to the removed ids.
//!
//! ## Core Concepts
//!
//! - **Normalizer**: folds a raw name to a comparison key (`normalize_name`)
//! - **Matcher**: a conservative, symmetric same-person predicate (`is_same_person`)
//! - **Clusters**: clique-verified groups of matching records (`build_clusters`)
//! - **Merge**: canonical selection, attribute union and reference remap (`merge_cluster`)
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use person_resolver::{BatchJob, CatalogStore, InMemoryCatalog, PersonId, PersonRecord};
//!
//! let store = Arc::new(InMemoryCatalog::from_records([
//!     PersonRecord::new(PersonId::new(1), "Jeffrey Epstein"),
//!     PersonRecord::new(PersonId::new(2), "Epstein, Jeffrey"),
//!     PersonRecord::new(PersonId::new(3), "J. Epstein").with_aliases(["Jeffrey E."]),
//! ]));
//!
//! let report = BatchJob::new(store.clone()).run()?;
//! assert_eq!(report.merges.len(), 1);
//! assert_eq!(store.resolve_id(PersonId::new(3))?, Some(PersonId::new(1)));
//! # Ok::<(), person_resolver::ResolverError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Pure matching
pub mod matcher;
pub mod nickname;
pub mod normalize;
pub mod person;

// Batch resolution
pub mod batch;
pub mod cluster;
pub mod merge;

// Store, caching and online path
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod lookup;
pub mod storage;

pub use batch::{BatchJob, BatchReport, CancellationToken, SkippedCluster};
pub use cache::CatalogCache;
pub use cluster::{
    build_clusters, build_clusters_with, Cluster, ClusterKind, ClusterMember, ClusterOptions,
    ClusterSet, MatchEdge,
};
pub use config::ResolverConfig;
pub use error::{MergeError, ResolverError, ResolverResult};
pub use ingest::{IngestOutcome, IngestPool, IngestPoolConfig, IngestTicket, Ingestor};
pub use lookup::PersonLookup;
pub use matcher::{is_same_person, match_rule, CandidateSet, MatchRule};
pub use merge::{
    merge_cluster, merge_cluster_with, DocumentLink, EventRecord, MergeApplication, MergeResult,
    Relationship, RemapSummary,
};
pub use normalize::normalize_name;
pub use person::{DocumentId, Mention, NewPerson, PersonId, PersonRecord};
pub use storage::{CatalogStore, InMemoryCatalog, StorageError};
