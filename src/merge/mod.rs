//! Merging confirmed clusters into one canonical record.
//!
//! `merge_cluster` re-reads the members, checks nobody touched them since the
//! cluster was built, plans the attribute merge, and hands the store one
//! atomic `MergeApplication`. The store rewrites references via
//! [`ReferenceRemapper`] before deleting the removed rows.

pub mod policy;
pub mod remap;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::Cluster;
use crate::config::ResolverConfig;
use crate::error::{MergeError, ResolverResult};
use crate::person::{PersonId, PersonRecord};
use crate::storage::{CatalogStore, StorageError};

pub use policy::{choose_canonical, plan_merge, MergePlan};
pub use remap::{
    DocumentLink, EdgeCollision, EventRecord, ReferenceRemapper, ReferenceRewrite, ReferenceTable,
    Relationship,
};

/// Everything a store needs to commit one merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeApplication {
    /// Canonical record with merged attributes. Its `version` is the one
    /// read before planning.
    pub canonical: PersonRecord,
    /// Members deleted after their references move.
    pub removed: Vec<PersonId>,
    /// Version each member (canonical included) must still have.
    pub expected_versions: BTreeMap<PersonId, u64>,
}

/// What the store did while committing a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemapSummary {
    /// Reference rows rewritten, per table and removed id.
    pub rewrites: Vec<ReferenceRewrite>,
    /// Edges folded together after the rewrite.
    pub collisions: Vec<EdgeCollision>,
    /// Edges dropped because both ends became the canonical.
    pub self_loops_dropped: usize,
    /// Recomputed from document links after the rewrite.
    pub document_count: u32,
    /// Recomputed from relationship edges after the rewrite.
    pub connection_count: u32,
}

/// Outcome of one committed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Surviving record.
    pub canonical_id: PersonId,
    /// Records deleted, each now redirecting to the canonical.
    pub removed_ids: Vec<PersonId>,
    /// Alias list stored on the canonical.
    pub aliases: Vec<String>,
    /// Reference rows rewritten, per table and removed id.
    pub rewrites: Vec<ReferenceRewrite>,
    /// Edges folded together after the rewrite.
    pub collisions: Vec<EdgeCollision>,
    /// Distinct documents linked to the canonical.
    pub document_count: u32,
    /// Distinct persons connected to the canonical.
    pub connection_count: u32,
}

/// Merges a confirmed cluster using default configuration.
///
/// # Errors
/// See [`merge_cluster_with`].
pub fn merge_cluster(cluster: &Cluster, store: &dyn CatalogStore) -> ResolverResult<MergeResult> {
    merge_cluster_with(cluster, store, &ResolverConfig::default())
}

/// Merges a confirmed cluster into its canonical record.
///
/// # Errors
/// - `Merge(NotConfirmed)`: the cluster is ambiguous
/// - `Merge(TooFewMembers)` / `Merge(MissingMember)`: the cluster is stale
/// - `Storage(StaleRecord)`: a member changed since the cluster was built
pub fn merge_cluster_with(
    cluster: &Cluster,
    store: &dyn CatalogStore,
    config: &ResolverConfig,
) -> ResolverResult<MergeResult> {
    if !cluster.is_confirmed() {
        return Err(MergeError::NotConfirmed.into());
    }
    if cluster.len() < 2 {
        return Err(MergeError::TooFewMembers {
            count: cluster.len(),
        }
        .into());
    }

    let mut records = Vec::with_capacity(cluster.len());
    for member in &cluster.members {
        let record = store
            .get(member.id)?
            .ok_or(MergeError::MissingMember { id: member.id })?;
        if record.version != member.version {
            return Err(StorageError::StaleRecord {
                id: member.id,
                expected: member.version,
                actual: record.version,
            }
            .into());
        }
        records.push(record);
    }

    let plan = plan_merge(&records, &config.placeholder_categories)?;
    let canonical = records
        .iter()
        .find(|r| r.id == plan.canonical_id)
        .ok_or(MergeError::MissingMember {
            id: plan.canonical_id,
        })?;

    let application = MergeApplication {
        canonical: plan.apply_to(canonical),
        removed: plan.removed_ids.clone(),
        expected_versions: cluster.members.iter().map(|m| (m.id, m.version)).collect(),
    };
    let summary = store.apply_merge(&application)?;

    let rules: BTreeSet<String> = cluster.edges.iter().map(|e| e.rule.to_string()).collect();
    info!(
        canonical_id = %plan.canonical_id,
        removed_ids = ?plan.removed_ids,
        rules = ?rules,
        aliases = plan.aliases.len(),
        rewrites = summary.rewrites.len(),
        "merged person cluster"
    );
    for collision in &summary.collisions {
        info!(
            a = %collision.a,
            b = %collision.b,
            kind = %collision.kind,
            merged_rows = collision.merged_rows,
            strength = collision.strength,
            "relationship edges collided during remap; kept max strength"
        );
    }

    Ok(MergeResult {
        canonical_id: plan.canonical_id,
        removed_ids: plan.removed_ids,
        aliases: plan.aliases,
        rewrites: summary.rewrites,
        collisions: summary.collisions,
        document_count: summary.document_count,
        connection_count: summary.connection_count,
    })
}
