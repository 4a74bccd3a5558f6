//! Reference remapping for merged persons.
//!
//! Rewrites every foreign reference from a removed id to the canonical id.
//! The functions here are pure over owned table contents so a backend can
//! compute the full result first and commit it in one step.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::person::{DocumentId, PersonId};

/// A relationship edge between two persons.
///
/// Stored as an ordered pair, smaller id first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Smaller endpoint.
    pub a: PersonId,
    /// Larger endpoint.
    pub b: PersonId,
    /// Relationship type.
    pub kind: String,
    /// Edge weight.
    pub strength: f64,
    /// Documents supporting the edge.
    #[serde(default)]
    pub documents: BTreeSet<DocumentId>,
}

impl Relationship {
    /// Creates an edge with its endpoints in canonical order.
    #[must_use]
    pub fn new(x: PersonId, y: PersonId, kind: impl Into<String>, strength: f64) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self {
            a,
            b,
            kind: kind.into(),
            strength,
            documents: BTreeSet::new(),
        }
    }

    /// Builder-style supporting document.
    #[must_use]
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.documents.insert(DocumentId::new(document));
        self
    }

    /// Deduplication key: ordered endpoints plus relationship type.
    #[must_use]
    pub fn key(&self) -> (PersonId, PersonId, String) {
        (self.a, self.b, self.kind.clone())
    }

    /// True if either endpoint is `id`.
    #[must_use]
    pub fn touches(&self, id: PersonId) -> bool {
        self.a == id || self.b == id
    }

    /// Folds a colliding edge into this one: max strength, union of documents.
    pub fn absorb(&mut self, other: Relationship) {
        self.strength = self.strength.max(other.strength);
        self.documents.extend(other.documents);
    }
}

/// A person-to-document link.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentLink {
    /// Linked person.
    pub person: PersonId,
    /// Linked document.
    pub document: DocumentId,
}

/// A timeline or event record carrying an embedded list of person ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event id.
    pub id: u64,
    /// Persons the event mentions.
    pub person_ids: Vec<PersonId>,
}

/// Dependent table holding person references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTable {
    /// Person-to-person edges.
    Relationship,
    /// Person-to-document links.
    DocumentLink,
    /// Person lists embedded in events.
    Event,
}

/// Rows in one table rewritten from one removed id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRewrite {
    /// Table the rows live in.
    pub table: ReferenceTable,
    /// Removed id.
    pub from: PersonId,
    /// Canonical id.
    pub to: PersonId,
    /// Rows rewritten.
    pub rows: usize,
}

/// Two or more relationship edges that became identical after remapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCollision {
    /// Smaller endpoint.
    pub a: PersonId,
    /// Larger endpoint.
    pub b: PersonId,
    /// Relationship type.
    pub kind: String,
    /// Number of rows folded into the surviving edge, including itself.
    pub merged_rows: usize,
    /// Strength kept on the surviving edge.
    pub strength: f64,
}

/// Result of remapping the relationship table.
#[derive(Debug, Clone, Default)]
pub struct RelationshipRemap {
    /// The whole table after the rewrite.
    pub edges: Vec<Relationship>,
    /// Rows rewritten per removed id.
    pub rewrites: Vec<ReferenceRewrite>,
    /// Edges folded together.
    pub collisions: Vec<EdgeCollision>,
    /// Edges between two cluster members, which collapse onto the canonical.
    pub self_loops_dropped: usize,
}

/// Maps removed ids onto a canonical id across every dependent table.
#[derive(Debug, Clone)]
pub struct ReferenceRemapper {
    canonical: PersonId,
    removed: BTreeSet<PersonId>,
}

impl ReferenceRemapper {
    /// Creates a remapper. The canonical id is never treated as removed.
    pub fn new(canonical: PersonId, removed: impl IntoIterator<Item = PersonId>) -> Self {
        let removed = removed.into_iter().filter(|id| *id != canonical).collect();
        Self { canonical, removed }
    }

    /// The id every removed id maps to.
    #[must_use]
    pub const fn canonical(&self) -> PersonId {
        self.canonical
    }

    /// True if `id` is being merged away.
    #[must_use]
    pub fn is_removed(&self, id: PersonId) -> bool {
        self.removed.contains(&id)
    }

    fn map(&self, id: PersonId) -> PersonId {
        if self.is_removed(id) {
            self.canonical
        } else {
            id
        }
    }

    /// Rewrites edge endpoints, re-orders each pair, drops edges that became
    /// self-loops, and folds edges that now share `(a, b, kind)`.
    #[must_use]
    pub fn remap_relationships(&self, edges: Vec<Relationship>) -> RelationshipRemap {
        let mut counter = RewriteCounter::default();
        let mut out: Vec<Relationship> = Vec::with_capacity(edges.len());
        let mut slot: HashMap<(PersonId, PersonId, String), usize> = HashMap::new();
        let mut folded: BTreeMap<usize, usize> = BTreeMap::new();
        let mut self_loops_dropped = 0;

        for edge in edges {
            let (a, b) = (self.map(edge.a), self.map(edge.b));
            let moved = a != edge.a || b != edge.b;
            for endpoint in [edge.a, edge.b] {
                if self.is_removed(endpoint) {
                    counter.record(ReferenceTable::Relationship, endpoint);
                }
            }
            if moved && a == b {
                self_loops_dropped += 1;
                continue;
            }

            let mut remapped = Relationship::new(a, b, edge.kind, edge.strength);
            remapped.documents = edge.documents;
            match slot.get(&remapped.key()) {
                Some(&idx) => {
                    out[idx].absorb(remapped);
                    *folded.entry(idx).or_insert(1) += 1;
                }
                None => {
                    slot.insert(remapped.key(), out.len());
                    out.push(remapped);
                }
            }
        }

        let collisions = folded
            .into_iter()
            .map(|(idx, merged_rows)| {
                let edge = &out[idx];
                EdgeCollision {
                    a: edge.a,
                    b: edge.b,
                    kind: edge.kind.clone(),
                    merged_rows,
                    strength: edge.strength,
                }
            })
            .collect();

        RelationshipRemap {
            edges: out,
            rewrites: counter.finish(self.canonical),
            collisions,
            self_loops_dropped,
        }
    }

    /// Rewrites document links; links that collide simply collapse.
    #[must_use]
    pub fn remap_document_links(
        &self,
        links: BTreeSet<DocumentLink>,
    ) -> (BTreeSet<DocumentLink>, Vec<ReferenceRewrite>) {
        let mut counter = RewriteCounter::default();
        let remapped = links
            .into_iter()
            .map(|link| {
                if self.is_removed(link.person) {
                    counter.record(ReferenceTable::DocumentLink, link.person);
                }
                DocumentLink {
                    person: self.map(link.person),
                    document: link.document,
                }
            })
            .collect();
        (remapped, counter.finish(self.canonical))
    }

    /// Rewrites embedded person-id lists, keeping first-occurrence order and
    /// dropping duplicates the rewrite creates.
    #[must_use]
    pub fn remap_events(&self, events: Vec<EventRecord>) -> (Vec<EventRecord>, Vec<ReferenceRewrite>) {
        let mut counter = RewriteCounter::default();
        let remapped = events
            .into_iter()
            .map(|mut event| {
                if !event.person_ids.iter().any(|id| self.is_removed(*id)) {
                    return event;
                }
                let mut seen = BTreeSet::new();
                let mut ids = Vec::with_capacity(event.person_ids.len());
                for id in event.person_ids {
                    if self.is_removed(id) {
                        counter.record(ReferenceTable::Event, id);
                    }
                    let mapped = self.map(id);
                    if seen.insert(mapped) {
                        ids.push(mapped);
                    }
                }
                event.person_ids = ids;
                event
            })
            .collect();
        (remapped, counter.finish(self.canonical))
    }
}

#[derive(Default)]
struct RewriteCounter {
    rows: BTreeMap<(ReferenceTable, PersonId), usize>,
}

impl RewriteCounter {
    fn record(&mut self, table: ReferenceTable, from: PersonId) {
        *self.rows.entry((table, from)).or_default() += 1;
    }

    fn finish(self, to: PersonId) -> Vec<ReferenceRewrite> {
        self.rows
            .into_iter()
            .map(|((table, from), rows)| ReferenceRewrite {
                table,
                from,
                to,
                rows,
            })
            .collect()
    }
}

/// Distinct documents linked to `person`.
#[must_use]
pub fn document_count(links: &BTreeSet<DocumentLink>, person: PersonId) -> u32 {
    let n = links.iter().filter(|l| l.person == person).count();
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Distinct persons `person` shares an edge with.
#[must_use]
pub fn connection_count(edges: &[Relationship], person: PersonId) -> u32 {
    let others: BTreeSet<PersonId> = edges
        .iter()
        .filter(|e| e.touches(person) && e.a != e.b)
        .map(|e| if e.a == person { e.b } else { e.a })
        .collect();
    u32::try_from(others.len()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> PersonId {
        PersonId::new(n)
    }

    #[test]
    fn test_relationship_new_orders_endpoints() {
        let e = Relationship::new(id(9), id(2), "associate", 0.5);
        assert_eq!((e.a, e.b), (id(2), id(9)));
    }

    #[test]
    fn test_collision_keeps_max_strength_and_document_union() {
        let remapper = ReferenceRemapper::new(id(1), [id(2)]);
        let edges = vec![
            Relationship::new(id(1), id(5), "flew_with", 0.4).with_document("doc-a"),
            Relationship::new(id(5), id(2), "flew_with", 0.9).with_document("doc-b"),
            Relationship::new(id(2), id(5), "employed", 0.3),
        ];

        let out = remapper.remap_relationships(edges);
        assert_eq!(out.edges.len(), 2);
        let merged = &out.edges[0];
        assert_eq!((merged.a, merged.b), (id(1), id(5)));
        assert!((merged.strength - 0.9).abs() < f64::EPSILON);
        assert_eq!(merged.documents.len(), 2);

        assert_eq!(out.collisions.len(), 1);
        assert_eq!(out.collisions[0].merged_rows, 2);
        assert_eq!(out.edges[1].kind, "employed");
        assert_eq!(out.edges[1].a, id(1));

        assert_eq!(
            out.rewrites,
            vec![ReferenceRewrite {
                table: ReferenceTable::Relationship,
                from: id(2),
                to: id(1),
                rows: 2,
            }]
        );
    }

    #[test]
    fn test_intra_cluster_edge_is_dropped() {
        let remapper = ReferenceRemapper::new(id(1), [id(2), id(3)]);
        let out = remapper.remap_relationships(vec![
            Relationship::new(id(1), id(2), "alias_of", 1.0),
            Relationship::new(id(2), id(3), "alias_of", 1.0),
        ]);
        assert!(out.edges.is_empty());
        assert_eq!(out.self_loops_dropped, 2);
    }

    #[test]
    fn test_document_links_collapse() {
        let remapper = ReferenceRemapper::new(id(1), [id(3)]);
        let links: BTreeSet<_> = [
            DocumentLink { person: id(1), document: DocumentId::new("d1") },
            DocumentLink { person: id(3), document: DocumentId::new("d1") },
            DocumentLink { person: id(3), document: DocumentId::new("d2") },
        ]
        .into_iter()
        .collect();

        let (out, rewrites) = remapper.remap_document_links(links);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|l| l.person == id(1)));
        assert_eq!(rewrites[0].rows, 2);
        assert_eq!(document_count(&out, id(1)), 2);
    }

    #[test]
    fn test_event_ids_deduplicated_in_order() {
        let remapper = ReferenceRemapper::new(id(1), [id(2)]);
        let (events, rewrites) = remapper.remap_events(vec![
            EventRecord { id: 10, person_ids: vec![id(4), id(2), id(1)] },
            EventRecord { id: 11, person_ids: vec![id(4)] },
        ]);
        assert_eq!(events[0].person_ids, vec![id(4), id(1)]);
        assert_eq!(events[1].person_ids, vec![id(4)]);
        assert_eq!(rewrites.len(), 1);
        assert_eq!(rewrites[0].table, ReferenceTable::Event);
    }

    #[test]
    fn test_connection_count_counts_distinct_neighbours() {
        let edges = vec![
            Relationship::new(id(1), id(2), "a", 1.0),
            Relationship::new(id(1), id(2), "b", 1.0),
            Relationship::new(id(3), id(1), "a", 1.0),
        ];
        assert_eq!(connection_count(&edges, id(1)), 2);
        assert_eq!(connection_count(&edges, id(3)), 1);
    }
}
