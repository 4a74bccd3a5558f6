//! The batch resolution job.
//!
//! Reads the whole catalog, builds clusters and merges every confirmed one.
//! Members are re-checked against their scan-time versions right before each
//! merge commits; a cluster that moved is re-verified on fresh data up to
//! `merge_retry_limit` times and otherwise skipped. One cluster failing never
//! stops the others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CatalogCache;
use crate::cluster::{build_clusters_with, Cluster, ClusterMember, ClusterOptions, MatchEdge};
use crate::config::ResolverConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::matcher::{match_candidates, CandidateSet};
use crate::merge::{merge_cluster_with, MergeResult};
use crate::person::PersonId;
use crate::storage::CatalogStore;

/// Cooperative cancellation flag shared between a job and its controller.
///
/// Checked between blocking buckets and between cluster merges, never inside
/// a merge.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once `cancel` has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A confirmed cluster the pass did not merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCluster {
    /// Member ids at scan time.
    pub members: Vec<PersonId>,
    /// The error or check that stopped the merge.
    pub reason: String,
}

/// What a batch run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Committed merges, in commit order.
    pub merges: Vec<MergeResult>,
    /// Left unmerged for external review.
    pub ambiguous: Vec<Cluster>,
    /// Confirmed clusters the last pass could not merge.
    pub skipped: Vec<SkippedCluster>,
    /// Cluster-and-merge passes run.
    pub passes: usize,
    /// The job stopped at a checkpoint before finishing.
    pub cancelled: bool,
}

impl BatchReport {
    /// Number of records merged away.
    #[must_use]
    pub fn removed_count(&self) -> usize {
        self.merges.iter().map(|m| m.removed_ids.len()).sum()
    }
}

/// Batch resolution over a store.
pub struct BatchJob {
    store: Arc<dyn CatalogStore>,
    config: ResolverConfig,
    cancel: CancellationToken,
    cache: Option<Arc<CatalogCache>>,
}

impl std::fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BatchJob {
    /// Creates a job with default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            config: ResolverConfig::default(),
            cancel: CancellationToken::new(),
            cache: None,
        }
    }

    /// Builder-style configuration.
    #[must_use]
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder-style cancellation token shared with a controller.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Builder-style cache to invalidate after merges.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<CatalogCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// A clone of the job's cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the job: passes of cluster building and merging until a pass
    /// merges nothing or `max_passes` is reached.
    ///
    /// Cancellation is reported through `BatchReport::cancelled`, not as an
    /// error; merges committed before the checkpoint stay committed.
    ///
    /// # Errors
    /// Returns `Config` for invalid configuration and `Storage` if the
    /// catalog cannot be read. Per-cluster failures land in `skipped`.
    pub fn run(&self) -> ResolverResult<BatchReport> {
        self.config.validate()?;
        let mut report = BatchReport::default();

        while report.passes < self.config.max_passes {
            report.passes += 1;
            let merged_before = report.merges.len();
            if !self.run_pass(&mut report)? || report.merges.len() == merged_before {
                break;
            }
            debug!(pass = report.passes, "pass merged clusters, rescanning for skipped or newly written records");
        }

        if !report.merges.is_empty() {
            if let Some(cache) = &self.cache {
                cache.invalidate();
            }
        }
        info!(
            passes = report.passes,
            merges = report.merges.len(),
            removed = report.removed_count(),
            ambiguous = report.ambiguous.len(),
            skipped = report.skipped.len(),
            cancelled = report.cancelled,
            "batch resolution finished"
        );
        Ok(report)
    }

    /// One scan and merge. Ambiguous and skipped clusters are replaced with
    /// this pass's view. Returns false if cancelled.
    fn run_pass(&self, report: &mut BatchReport) -> ResolverResult<bool> {
        let records = self.store.all_persons()?;
        let options = ClusterOptions {
            parallel: self.config.parallel_buckets,
            buckets_per_checkpoint: self.config.buckets_per_checkpoint,
            cancel: Some(&self.cancel),
        };
        let clusters = match build_clusters_with(&records, options) {
            Ok(clusters) => clusters,
            Err(ResolverError::Cancelled) => {
                info!(persons = records.len(), "batch pass cancelled while building clusters");
                report.cancelled = true;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        report.ambiguous = clusters.ambiguous;
        report.skipped.clear();

        let total = clusters.confirmed.len();
        for (done, cluster) in clusters.confirmed.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(merged = done, remaining = total - done, "batch pass cancelled between merges");
                report.cancelled = true;
                return Ok(false);
            }
            match self.merge_with_retry(cluster) {
                Ok(result) => report.merges.push(result),
                Err(skip) => report.skipped.push(skip),
            }
        }
        Ok(true)
    }

    fn merge_with_retry(&self, mut cluster: Cluster) -> Result<MergeResult, SkippedCluster> {
        let mut attempt = 0;
        loop {
            let err = match merge_cluster_with(&cluster, self.store.as_ref(), &self.config) {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };
            if !err.is_concurrency() || attempt >= self.config.merge_retry_limit {
                return Err(skip(&cluster, err.to_string()));
            }
            attempt += 1;
            warn!(
                members = ?cluster.ids(),
                attempt,
                error = %err,
                "cluster changed since scan, re-verifying on fresh data"
            );
            cluster = match self.reverify(&cluster) {
                Ok(Some(fresh)) => fresh,
                Ok(None) => return Err(skip(&cluster, "members no longer pairwise match".to_string())),
                Err(err) => return Err(skip(&cluster, err.to_string())),
            };
        }
    }

    /// Re-reads every member and rebuilds the cluster if it is still a
    /// clique. `None` if a member is gone or some pair stopped matching.
    fn reverify(&self, cluster: &Cluster) -> ResolverResult<Option<Cluster>> {
        let mut records = Vec::with_capacity(cluster.len());
        for id in cluster.ids() {
            match self.store.get(id)? {
                Some(record) => records.push(record),
                None => return Ok(None),
            }
        }

        let candidates: Vec<CandidateSet> = records.iter().map(CandidateSet::of).collect();
        let mut edges = Vec::new();
        for i in 0..records.len() {
            for j in i + 1..records.len() {
                let Some(rule) = match_candidates(&candidates[i], &candidates[j]) else {
                    return Ok(None);
                };
                edges.push(MatchEdge {
                    a: records[i].id.min(records[j].id),
                    b: records[i].id.max(records[j].id),
                    rule,
                });
            }
        }
        let members = records
            .iter()
            .map(|r| ClusterMember {
                id: r.id,
                version: r.version,
            })
            .collect();
        Ok(Some(Cluster::from_parts(members, edges)))
    }
}

fn skip(cluster: &Cluster, reason: String) -> SkippedCluster {
    warn!(members = ?cluster.ids(), reason = %reason, "skipped person cluster");
    SkippedCluster {
        members: cluster.ids(),
        reason,
    }
}
