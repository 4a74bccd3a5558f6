//! Batch cluster building over the whole catalog.
//!
//! Records are blocked so that only plausible pairs are compared, pairs are
//! evaluated with the matcher (in parallel across a checkpoint's buckets),
//! connected components are taken over the resulting edges, and each
//! component is verified as a clique. Only cliques are confirmed; anything
//! else is flagged ambiguous and left for review.
//!
//! Blocking keys per multi-token name are the edit-distance deletion
//! neighbourhood of its family token (tried as last and as first token),
//! gated by given-name initials. A single spaceless key per name catches
//! OCR-split names. Single-token names get corroboration keys (deletion
//! neighbourhood, nickname variants, initials) that only multi-token names
//! carrying a matching token join, and those buckets only pair a single-token
//! name with a multi-token one. A given-name typo in both of its first two
//! letters can split a true pair across buckets; that loss is accepted.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::CancellationToken;
use crate::error::{ResolverError, ResolverResult};
use crate::matcher::{edit_threshold, match_candidates, Candidate, CandidateSet, MatchRule};
use crate::nickname;
use crate::person::{PersonId, PersonRecord};

/// Whether a component may be merged automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    /// Every pair of members matched.
    Confirmed,
    /// Connected, but some pair did not match.
    Ambiguous,
}

/// A record id together with the version seen when the cluster was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Record id.
    pub id: PersonId,
    /// Record version when the cluster was built.
    pub version: u64,
}

/// An unordered matched pair, stored with the smaller id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchEdge {
    /// Smaller id.
    pub a: PersonId,
    /// Larger id.
    pub b: PersonId,
    /// First rule that fired for the pair.
    pub rule: MatchRule,
}

/// Two or more records connected by match edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Whether the cluster may be merged.
    pub kind: ClusterKind,
    /// Sorted by id.
    pub members: Vec<ClusterMember>,
    /// Sorted by `(a, b)`.
    pub edges: Vec<MatchEdge>,
}

impl Cluster {
    /// Member ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<PersonId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the cluster has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// True if `id` is a member.
    #[must_use]
    pub fn contains(&self, id: PersonId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    /// True for clique-verified clusters.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.kind == ClusterKind::Confirmed
    }

    /// Member pairs with no match edge. Empty for confirmed clusters; for
    /// ambiguous ones these are what a reviewer needs to look at.
    #[must_use]
    pub fn missing_pairs(&self) -> Vec<(PersonId, PersonId)> {
        let present: HashSet<(PersonId, PersonId)> = self.edges.iter().map(|e| (e.a, e.b)).collect();
        let ids = self.ids();
        let mut missing = Vec::new();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                if !present.contains(&(a, b)) {
                    missing.push((a, b));
                }
            }
        }
        missing
    }

    /// Builds a cluster from members and the edges among them, classifying
    /// it by clique check.
    #[must_use]
    pub fn from_parts(mut members: Vec<ClusterMember>, mut edges: Vec<MatchEdge>) -> Self {
        members.sort();
        members.dedup_by_key(|m| m.id);
        edges.sort();
        edges.dedup_by_key(|e| (e.a, e.b));
        let n = members.len();
        let kind = if n >= 2 && edges.len() == n * (n - 1) / 2 {
            ClusterKind::Confirmed
        } else {
            ClusterKind::Ambiguous
        };
        Self {
            kind,
            members,
            edges,
        }
    }
}

/// Disjoint confirmed and ambiguous clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSet {
    /// Cliques, safe to merge.
    pub confirmed: Vec<Cluster>,
    /// Connected but not pairwise matched.
    pub ambiguous: Vec<Cluster>,
}

impl ClusterSet {
    /// Total number of clusters of either kind.
    #[must_use]
    pub fn len(&self) -> usize {
        self.confirmed.len() + self.ambiguous.len()
    }

    /// True if no record matched any other.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.ambiguous.is_empty()
    }
}

/// Knobs for [`build_clusters_with`].
#[derive(Debug, Clone, Copy)]
pub struct ClusterOptions<'a> {
    /// Evaluate candidate pairs on the rayon pool.
    pub parallel: bool,
    /// Buckets processed between cancellation checks.
    pub buckets_per_checkpoint: usize,
    /// Checked between bucket chunks.
    pub cancel: Option<&'a CancellationToken>,
}

impl Default for ClusterOptions<'_> {
    fn default() -> Self {
        Self {
            parallel: true,
            buckets_per_checkpoint: 256,
            cancel: None,
        }
    }
}

/// Groups records that provably refer to one person.
///
/// # Examples
///
/// ```
/// use person_resolver::{build_clusters, PersonId, PersonRecord};
///
/// let records = vec![
///     PersonRecord::new(PersonId::new(1), "Jeffrey Epstein"),
///     PersonRecord::new(PersonId::new(2), "Epstein, Jeffrey"),
///     PersonRecord::new(PersonId::new(3), "Ghislaine Maxwell"),
/// ];
/// let clusters = build_clusters(&records);
/// assert_eq!(clusters.confirmed.len(), 1);
/// assert_eq!(clusters.confirmed[0].ids(), vec![PersonId::new(1), PersonId::new(2)]);
/// ```
#[must_use]
pub fn build_clusters(records: &[PersonRecord]) -> ClusterSet {
    // Without a cancellation token the build cannot fail.
    build_clusters_with(records, ClusterOptions::default()).unwrap_or_default()
}

/// [`build_clusters`] with explicit options.
///
/// # Errors
/// Returns `Cancelled` if the token fires at a checkpoint between buckets.
pub fn build_clusters_with(
    records: &[PersonRecord],
    options: ClusterOptions<'_>,
) -> ResolverResult<ClusterSet> {
    let candidates: Vec<CandidateSet> = records.iter().map(CandidateSet::of).collect();
    let buckets = block(&candidates);
    debug!(records = records.len(), buckets = buckets.len(), "blocked person catalog");

    let mut evaluated: HashSet<(usize, usize)> = HashSet::new();
    let mut edges: Vec<(usize, usize, MatchRule)> = Vec::new();
    let bucket_list: Vec<&Vec<BlockEntry>> = buckets.values().collect();

    for chunk in bucket_list.chunks(options.buckets_per_checkpoint.max(1)) {
        if options.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(ResolverError::Cancelled);
        }

        let mut pairs = Vec::new();
        for bucket in chunk {
            for (i, x) in bucket.iter().enumerate() {
                for y in &bucket[i + 1..] {
                    let pair = (x.record.min(y.record), x.record.max(y.record));
                    if pair.0 == pair.1 || !x.gate.admits(&y.gate) {
                        continue;
                    }
                    if evaluated.insert(pair) {
                        pairs.push(pair);
                    }
                }
            }
        }

        let evaluate = |&(i, j): &(usize, usize)| {
            match_candidates(&candidates[i], &candidates[j]).map(|rule| (i, j, rule))
        };
        if options.parallel {
            edges.par_extend(pairs.par_iter().filter_map(evaluate));
        } else {
            edges.extend(pairs.iter().filter_map(evaluate));
        }
    }

    Ok(components(records, &edges))
}

fn components(records: &[PersonRecord], edges: &[(usize, usize, MatchRule)]) -> ClusterSet {
    let mut uf: UnionFind<usize> = UnionFind::new(records.len());
    for &(i, j, _) in edges {
        uf.union(i, j);
    }

    let mut groups: BTreeMap<usize, (Vec<ClusterMember>, Vec<MatchEdge>)> = BTreeMap::new();
    let mut touched: BTreeSet<usize> = BTreeSet::new();
    for &(i, j, rule) in edges {
        touched.insert(i);
        touched.insert(j);
        let (a, b) = (records[i].id.min(records[j].id), records[i].id.max(records[j].id));
        groups
            .entry(uf.find(i))
            .or_default()
            .1
            .push(MatchEdge { a, b, rule });
    }
    for idx in touched {
        let member = ClusterMember {
            id: records[idx].id,
            version: records[idx].version,
        };
        groups.entry(uf.find(idx)).or_default().0.push(member);
    }

    let mut set = ClusterSet::default();
    for (members, edges) in groups.into_values() {
        let cluster = Cluster::from_parts(members, edges);
        match cluster.kind {
            ClusterKind::Confirmed => set.confirmed.push(cluster),
            ClusterKind::Ambiguous => {
                warn!(
                    members = ?cluster.ids(),
                    missing_pairs = ?cluster.missing_pairs(),
                    "ambiguous person cluster: connected but not pairwise matched, left unmerged"
                );
                set.ambiguous.push(cluster);
            }
        }
    }
    set.confirmed.sort_by_key(|c| c.members.first().map(|m| m.id));
    set.ambiguous.sort_by_key(|c| c.members.first().map(|m| m.id));
    set
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum BlockKey {
    Family(String),
    Spaceless(String),
    /// A token or one of its deletion or nickname variants.
    Token(String),
    /// Joined by one-letter tokens of multi-token names and by the first
    /// letter of full single-token names.
    Initial(char),
    /// Joined by the first letter of full tokens of multi-token names and by
    /// one-letter single-token names.
    Lead(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Gate {
    /// Compare with everyone in the bucket.
    Open,
    /// Given-name initials; two entries pair only if they share one.
    Initials(BTreeSet<char>),
    /// Which side of the alias-corroboration rule the record can play.
    Corroboration { single: bool, multi: bool },
}

impl Gate {
    fn admits(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Initials(x), Self::Initials(y)) => !x.is_disjoint(y),
            (
                Self::Corroboration { single: s1, multi: m1 },
                Self::Corroboration { single: s2, multi: m2 },
            ) => (*s1 && *m2) || (*m1 && *s2),
            _ => true,
        }
    }

    fn absorb(&mut self, other: Self) {
        match (self, other) {
            (Self::Initials(x), Self::Initials(y)) => x.extend(y),
            (
                Self::Corroboration { single, multi },
                Self::Corroboration { single: s, multi: m },
            ) => {
                *single |= s;
                *multi |= m;
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
struct BlockEntry {
    record: usize,
    gate: Gate,
}

fn block(candidates: &[CandidateSet]) -> BTreeMap<BlockKey, Vec<BlockEntry>> {
    // Multi-token names only join corroboration buckets a single-token name
    // has opened.
    let wanted: HashSet<BlockKey> = candidates
        .iter()
        .flat_map(CandidateSet::iter)
        .filter(|c| !c.is_multi())
        .flat_map(single_keys)
        .collect();

    let mut buckets: BTreeMap<BlockKey, Vec<BlockEntry>> = BTreeMap::new();
    for (record, set) in candidates.iter().enumerate() {
        let mut keys: HashMap<BlockKey, Gate> = HashMap::new();
        let mut add = |key: BlockKey, gate: Gate| match keys.entry(key) {
            Entry::Occupied(mut slot) => slot.get_mut().absorb(gate),
            Entry::Vacant(slot) => {
                slot.insert(gate);
            }
        };

        for candidate in set.iter() {
            add(BlockKey::Spaceless(candidate.spaceless().to_string()), Gate::Open);
            if !candidate.is_multi() {
                for key in single_keys(candidate) {
                    add(key, Gate::Corroboration { single: true, multi: false });
                }
                continue;
            }
            for (family, given) in candidate.orientations().into_iter().flatten() {
                let letters = given_initials(given);
                for variant in deletion_variants(family, edit_threshold(family, family)) {
                    add(BlockKey::Family(variant), Gate::Initials(letters.clone()));
                }
            }
            if !wanted.is_empty() {
                for key in multi_keys(candidate).filter(|k| wanted.contains(k)) {
                    add(key, Gate::Corroboration { single: false, multi: true });
                }
            }
        }
        for (key, gate) in keys {
            buckets.entry(key).or_default().push(BlockEntry { record, gate });
        }
    }
    buckets
}

/// Corroboration keys of a single-token name.
fn single_keys(candidate: &Candidate) -> Vec<BlockKey> {
    let token = candidate.text();
    let mut keys: Vec<BlockKey> = deletion_variants(token, edit_threshold(token, token))
        .into_iter()
        .map(BlockKey::Token)
        .collect();
    keys.extend(nickname::variants(token).map(|v| BlockKey::Token(v.to_string())));
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => keys.push(BlockKey::Lead(c)),
        (Some(c), Some(_)) => keys.push(BlockKey::Initial(c)),
        _ => {}
    }
    keys
}

/// Corroboration keys of every token of a multi-token name.
fn multi_keys(candidate: &Candidate) -> impl Iterator<Item = BlockKey> + '_ {
    candidate.tokens().iter().flat_map(|token| {
        let mut keys: Vec<BlockKey> = deletion_variants(token, edit_threshold(token, token))
            .into_iter()
            .map(BlockKey::Token)
            .collect();
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => keys.push(BlockKey::Initial(c)),
            (Some(c), Some(_)) => keys.push(BlockKey::Lead(c)),
            _ => {}
        }
        keys
    })
}

/// Letters a corresponding given token could start with: each token's first
/// and second letter (a typo in the first) and the first letters of its
/// nickname variants.
fn given_initials(given: &[String]) -> BTreeSet<char> {
    let mut letters = BTreeSet::new();
    for token in given {
        letters.extend(token.chars().take(2));
        letters.extend(nickname::variants(token).filter_map(|v| v.chars().next()));
    }
    letters
}

/// Every string reachable from `token` by deleting up to `max` characters.
/// Two tokens within edit distance `k` share a variant with at most `k`
/// deletions from each side.
fn deletion_variants(token: &str, max: usize) -> BTreeSet<String> {
    let mut all = BTreeSet::from([token.to_string()]);
    let mut frontier = vec![token.to_string()];
    for _ in 0..max {
        let mut next = Vec::new();
        for s in &frontier {
            let chars: Vec<char> = s.chars().collect();
            for skip in 0..chars.len() {
                let variant: String = chars
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != skip)
                    .map(|(_, c)| *c)
                    .collect();
                if all.insert(variant.clone()) {
                    next.push(variant);
                }
            }
        }
        frontier = next;
    }
    all
}
