//! Person records and identity types.
//!
//! A `PersonRecord` is one row of the person catalog. The store owns the
//! integer id; everything else here is plain data that the matcher, cluster
//! builder and merge policy read. Display names are kept exactly as first
//! seen; normalization happens at comparison time only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable, store-assigned person identifier.
///
/// # Examples
///
/// ```
/// use person_resolver::PersonId;
///
/// let id = PersonId::new(42);
/// assert_eq!(id.get(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(i64);

impl PersonId {
    /// Wraps a raw store id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw store id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PersonId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Identifier of a source document in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Creates a document id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One person in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    /// Store-assigned id.
    pub id: PersonId,

    /// Name as first seen. Never stored normalized.
    pub display_name: String,

    /// Other names seen for this person.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Free-form category, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Role in the source documents, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Derived counter, recomputed from document links.
    #[serde(default)]
    pub document_count: u32,

    /// Derived counter, recomputed from relationship edges.
    #[serde(default)]
    pub connection_count: u32,

    /// Last-modified stamp used for optimistic concurrency.
    pub version: u64,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl PersonRecord {
    /// Creates a record with no aliases and zeroed counters.
    ///
    /// # Examples
    ///
    /// ```
    /// use person_resolver::{PersonId, PersonRecord};
    ///
    /// let p = PersonRecord::new(PersonId::new(1), "Jeffrey Epstein");
    /// assert_eq!(p.version, 1);
    /// assert!(p.aliases.is_empty());
    /// ```
    #[must_use]
    pub fn new(id: PersonId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            aliases: Vec::new(),
            category: None,
            role: None,
            document_count: 0,
            connection_count: 0,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Builder-style alias list.
    #[must_use]
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for alias in aliases {
            self.add_alias(alias);
        }
        self
    }

    /// Builder-style document count.
    #[must_use]
    pub const fn with_document_count(mut self, count: u32) -> Self {
        self.document_count = count;
        self
    }

    /// Builder-style category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Adds an alias unless it duplicates the display name or an existing
    /// alias case-insensitively. Returns true if the alias was added.
    pub fn add_alias(&mut self, alias: impl Into<String>) -> bool {
        let alias = alias.into();
        let trimmed = alias.trim();
        if trimmed.is_empty() || self.knows_name(trimmed) {
            return false;
        }
        self.aliases.push(trimmed.to_string());
        true
    }

    /// True if `name` equals the display name or any alias, ignoring case.
    #[must_use]
    pub fn knows_name(&self, name: &str) -> bool {
        let key = name.trim().to_lowercase();
        self.names().any(|n| n.trim().to_lowercase() == key)
    }

    /// Display name followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.display_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// Fields for a person the store has not assigned an id to yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPerson {
    /// Name as seen.
    pub display_name: String,
    /// Extra names to store with it.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Category, if known.
    #[serde(default)]
    pub category: Option<String>,
    /// Role, if known.
    #[serde(default)]
    pub role: Option<String>,
}

impl NewPerson {
    /// New person with only a display name.
    #[must_use]
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

/// A name mention produced by the upstream extraction stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Raw name as extracted.
    pub name: String,
    /// Role from the extraction, if any.
    #[serde(default)]
    pub role: Option<String>,
    /// Category from the extraction, if any.
    #[serde(default)]
    pub category: Option<String>,
    /// Free-text context around the mention. Carried for audit only.
    #[serde(default)]
    pub context: Option<String>,
    /// Document the mention was extracted from.
    #[serde(default)]
    pub document: Option<DocumentId>,
}

impl Mention {
    /// Mention with just a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            category: None,
            context: None,
            document: None,
        }
    }

    /// Builder-style source document.
    #[must_use]
    pub fn in_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(DocumentId::new(document));
        self
    }
}

/// True when a category or role value carries no information.
///
/// `placeholders` is compared case-insensitively after trimming; a missing
/// or blank value is always a placeholder.
#[must_use]
pub fn is_placeholder(value: Option<&str>, placeholders: &[String]) -> bool {
    match value.map(str::trim) {
        None | Some("") => true,
        Some(v) => placeholders.iter().any(|p| p.trim().eq_ignore_ascii_case(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_id_ordering_and_display() {
        assert!(PersonId::new(1) < PersonId::new(2));
        assert_eq!(format!("{}", PersonId::new(7)), "7");
        assert_eq!(PersonId::from(9).get(), 9);
    }

    #[test]
    fn test_add_alias_rejects_case_insensitive_duplicates() {
        let mut p = PersonRecord::new(PersonId::new(1), "Jeffrey Epstein");
        assert!(p.add_alias("Jeff Epstein"));
        assert!(!p.add_alias("JEFF EPSTEIN"));
        assert!(!p.add_alias("jeffrey epstein"));
        assert!(!p.add_alias("   "));
        assert_eq!(p.aliases, vec!["Jeff Epstein".to_string()]);
    }

    #[test]
    fn test_placeholder_detection() {
        let placeholders = vec!["unknown".to_string(), "person".to_string()];
        assert!(is_placeholder(None, &placeholders));
        assert!(is_placeholder(Some("  "), &placeholders));
        assert!(is_placeholder(Some("Unknown"), &placeholders));
        assert!(!is_placeholder(Some("pilot"), &placeholders));
    }

    #[test]
    fn test_record_serialization() {
        let p = PersonRecord::new(PersonId::new(3), "Ghislaine Maxwell")
            .with_aliases(["G. Maxwell"])
            .with_document_count(12);
        let json = serde_json::to_string(&p).unwrap();
        let back: PersonRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
