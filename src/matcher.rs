//! Conservative pairwise same-person matching.
//!
//! The answer is binary on purpose: a merge cannot be undone, so the matcher
//! only says "same" when one of four rules fires. Every rule is symmetric in
//! its two arguments, and records whose names all normalize to the empty
//! string never match anything.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::nickname;
use crate::normalize::{normalize_name, spaceless_key, tokens};
use crate::person::PersonRecord;

/// Which decision rule produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// A shared multi-token normalized name.
    ExactOverlap,
    /// Family tokens agree and some given tokens correspond.
    TokenCorrespondence,
    /// Equal once whitespace is removed.
    SpacelessKey,
    /// A single-token name that one of the other record's multi-token
    /// names reduces to.
    AliasCorroboration,
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ExactOverlap => "exact_overlap",
            Self::TokenCorrespondence => "token_correspondence",
            Self::SpacelessKey => "spaceless_key",
            Self::AliasCorroboration => "alias_corroboration",
        };
        f.write_str(s)
    }
}

/// One normalized name with its derived comparison forms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Candidate {
    text: String,
    tokens: Vec<String>,
    spaceless: String,
}

impl Candidate {
    fn from_normalized(text: String) -> Self {
        let tokens = tokens(&text).map(str::to_string).collect();
        let spaceless = spaceless_key(&text);
        Self {
            text,
            tokens,
            spaceless,
        }
    }

    /// The normalized name.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Normalized tokens.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Whitespace-free form of the name.
    #[must_use]
    pub fn spaceless(&self) -> &str {
        &self.spaceless
    }

    /// True for names with at least two tokens.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.tokens.len() >= 2
    }

    /// Family/given splits tried for this name: last token as family, then
    /// first token as family. Empty for single-token names.
    #[must_use]
    pub fn orientations(&self) -> [Option<(&str, &[String])>; 2] {
        match (self.tokens.split_last(), self.tokens.split_first()) {
            (Some((last, init)), Some((first, rest))) if !init.is_empty() => {
                [Some((last.as_str(), init)), Some((first.as_str(), rest))]
            }
            _ => [None, None],
        }
    }
}

/// Every normalized name a record can be matched under.
///
/// Computed on demand from the display name and aliases; never cached on the
/// record so a rename can't leave a stale key behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Candidates of a stored record.
    #[must_use]
    pub fn of(record: &PersonRecord) -> Self {
        Self::from_names(record.names())
    }

    /// Candidates of arbitrary raw names. Empty normalizations are dropped
    /// and duplicates collapse.
    pub fn from_names<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unique: BTreeSet<String> = names
            .into_iter()
            .map(normalize_name)
            .filter(|n| !n.is_empty())
            .collect();
        Self {
            candidates: unique.into_iter().map(Candidate::from_normalized).collect(),
        }
    }

    /// True if no name survived normalization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Iterates candidates in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    fn multi(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| c.is_multi())
    }

    fn contains_text(&self, text: &str) -> bool {
        self.candidates
            .binary_search_by(|c| c.text.as_str().cmp(text))
            .is_ok()
    }
}

/// Decides whether two records name the same person.
///
/// # Examples
///
/// ```
/// use person_resolver::{is_same_person, PersonId, PersonRecord};
///
/// let a = PersonRecord::new(PersonId::new(1), "Bob Smith");
/// let b = PersonRecord::new(PersonId::new(2), "Robert Smith");
/// assert!(is_same_person(&a, &b));
///
/// let c = PersonRecord::new(PersonId::new(3), "Jeffrey");
/// let d = PersonRecord::new(PersonId::new(4), "Jeffrey");
/// assert!(!is_same_person(&c, &d));
/// ```
#[must_use]
pub fn is_same_person(a: &PersonRecord, b: &PersonRecord) -> bool {
    match_rule(a, b).is_some()
}

/// Like [`is_same_person`], but reports the first rule that fired.
#[must_use]
pub fn match_rule(a: &PersonRecord, b: &PersonRecord) -> Option<MatchRule> {
    match_candidates(&CandidateSet::of(a), &CandidateSet::of(b))
}

/// Rule evaluation over precomputed candidate sets.
///
/// Rules are tried in a fixed order and each is symmetric, so the reported
/// rule does not depend on argument order either.
#[must_use]
pub fn match_candidates(a: &CandidateSet, b: &CandidateSet) -> Option<MatchRule> {
    if a.is_empty() || b.is_empty() {
        return None;
    }

    if a.multi().any(|ca| b.contains_text(&ca.text)) {
        return Some(MatchRule::ExactOverlap);
    }

    if a
        .multi()
        .any(|ca| b.multi().any(|cb| tokens_correspond(ca, cb)))
    {
        return Some(MatchRule::TokenCorrespondence);
    }

    // Two single-token names never meet here; at least one side must have
    // been split (or joined) by OCR.
    if a.iter().any(|ca| {
        b.iter()
            .any(|cb| (ca.is_multi() || cb.is_multi()) && ca.spaceless == cb.spaceless)
    }) {
        return Some(MatchRule::SpacelessKey);
    }

    if alias_corroborates(a, b) || alias_corroborates(b, a) {
        return Some(MatchRule::AliasCorroboration);
    }

    None
}

/// Family tokens agree and at least one pair of given tokens corresponds,
/// under any combination of last-as-family and first-as-family.
fn tokens_correspond(a: &Candidate, b: &Candidate) -> bool {
    let oa = a.orientations();
    let ob = b.orientations();
    oa.iter().flatten().any(|(fa, ga)| {
        ob.iter()
            .flatten()
            .any(|(fb, gb)| family_match(fa, fb) && given_match(ga, gb))
    })
}

fn family_match(a: &str, b: &str) -> bool {
    a == b || within_edit_threshold(a, b)
}

fn given_match(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.iter().any(|y| given_tokens_match(x, y)))
}

fn given_tokens_match(a: &str, b: &str) -> bool {
    a == b
        || nickname::equivalent(a, b)
        || is_initial_of(a, b)
        || is_initial_of(b, a)
        || within_edit_threshold(a, b)
}

/// `initial` is one letter and `full` is a longer token starting with it.
fn is_initial_of(initial: &str, full: &str) -> bool {
    let mut chars = initial.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => full.chars().count() > 1 && full.starts_with(c),
        _ => false,
    }
}

/// Edit budget for a token pair, scaled by the shorter token: one edit up to
/// six characters, two beyond. Single letters are initials and get none;
/// they only match through the initial rule.
#[must_use]
pub fn edit_threshold(a: &str, b: &str) -> usize {
    let shorter = a.chars().count().min(b.chars().count());
    if shorter <= 1 {
        0
    } else if shorter <= 6 {
        1
    } else {
        2
    }
}

/// True if the tokens differ, but by no more edits than the budget allows.
#[must_use]
pub fn within_edit_threshold(a: &str, b: &str) -> bool {
    let budget = edit_threshold(a, b);
    budget > 0 && a != b && strsim::levenshtein(a, b) <= budget
}

/// A single-token name in `single` is accepted when `other` carries a
/// multi-token name that reduces to it: its family token under the family
/// tolerance, or one of its given tokens under the given-token rules. A
/// single-token name is never compared with another single-token name.
fn alias_corroborates(single: &CandidateSet, other: &CandidateSet) -> bool {
    single
        .iter()
        .filter(|c| !c.is_multi())
        .any(|s| other.multi().any(|m| reduces_to(m, &s.text)))
}

fn reduces_to(name: &Candidate, token: &str) -> bool {
    name.orientations().iter().flatten().any(|(family, given)| {
        family_match(family, token) || given.iter().any(|g| given_tokens_match(g, token))
    })
}
