//! Canonical selection and attribute merge for a confirmed cluster.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::MergeError;
use crate::person::{is_placeholder, PersonId, PersonRecord};

/// What a merge will write, computed before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePlan {
    /// Highest document count, lowest id on ties.
    pub canonical_id: PersonId,
    /// Every other member, ascending.
    pub removed_ids: Vec<PersonId>,
    /// Canonical aliases first, then the other members' names.
    pub aliases: Vec<String>,
    /// First non-placeholder category.
    pub category: Option<String>,
    /// First non-placeholder role.
    pub role: Option<String>,
}

impl MergePlan {
    /// The canonical record with merged attributes. Counters and version are
    /// left for the store to recompute and bump.
    #[must_use]
    pub fn apply_to(&self, canonical: &PersonRecord) -> PersonRecord {
        let mut merged = canonical.clone();
        merged.aliases.clone_from(&self.aliases);
        merged.category.clone_from(&self.category);
        merged.role.clone_from(&self.role);
        merged
    }
}

/// Highest document count wins; ties go to the lowest id.
#[must_use]
pub fn choose_canonical(members: &[PersonRecord]) -> Option<&PersonRecord> {
    members
        .iter()
        .min_by(|x, y| y.document_count.cmp(&x.document_count).then(x.id.cmp(&y.id)))
}

/// Plans the merge of `members` into one record.
///
/// Aliases become the case-insensitive union of every member's display name
/// and aliases, minus the canonical display name. Category and role keep the
/// canonical value unless it is a placeholder, else take the first
/// informative value from the other members by ascending id.
///
/// # Errors
/// - `TooFewMembers`: fewer than two members
pub fn plan_merge(members: &[PersonRecord], placeholders: &[String]) -> Result<MergePlan, MergeError> {
    if members.len() < 2 {
        return Err(MergeError::TooFewMembers {
            count: members.len(),
        });
    }
    let canonical = choose_canonical(members).ok_or(MergeError::TooFewMembers { count: 0 })?;

    let mut others: Vec<&PersonRecord> = members.iter().filter(|m| m.id != canonical.id).collect();
    others.sort_by_key(|m| m.id);

    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(alias_key(&canonical.display_name));
    let mut aliases = Vec::new();
    let names = canonical
        .aliases
        .iter()
        .map(String::as_str)
        .chain(others.iter().flat_map(|m| m.names()));
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if seen.insert(alias_key(name)) {
            aliases.push(name.to_string());
        }
    }

    let category = pick_attribute(canonical, &others, placeholders, |m| m.category.as_deref());
    let role = pick_attribute(canonical, &others, placeholders, |m| m.role.as_deref());

    Ok(MergePlan {
        canonical_id: canonical.id,
        removed_ids: others.iter().map(|m| m.id).collect(),
        aliases,
        category,
        role,
    })
}

fn alias_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn pick_attribute<F>(
    canonical: &PersonRecord,
    others: &[&PersonRecord],
    placeholders: &[String],
    field: F,
) -> Option<String>
where
    F: Fn(&PersonRecord) -> Option<&str>,
{
    std::iter::once(canonical)
        .chain(others.iter().copied())
        .map(&field)
        .find(|v| !is_placeholder(*v, placeholders))
        .flatten()
        .map(str::to_string)
        .or_else(|| field(canonical).map(str::to_string))
}
