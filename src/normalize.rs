//! Deterministic name normalization.
//!
//! `normalize_name` turns an arbitrary surface form into the lowercase key used
//! for equality, blocking and token comparison. The pipeline order matters:
//! comma reordering runs on the raw string, honorific and suffix stripping run
//! on whitespace tokens, and punctuation is dropped last.
//!
//! The honorific and suffix dictionaries are finite and English-centric.

/// Leading titles stripped from a name. Compared after dropping punctuation,
/// so `Dr` and `Dr.` are the same entry.
const HONORIFICS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "mx", "dr", "prof", "sir", "dame", "lord", "lady", "rev", "hon",
    "judge", "sen", "rep", "gov", "pres", "capt", "col", "gen", "lt", "sgt", "maj",
];

/// Trailing generational and post-nominal qualifiers.
const SUFFIXES: &[&str] = &[
    "jr", "sr", "ii", "iii", "iv", "qc", "kc", "esq", "phd", "md", "jd", "dds", "cpa", "mp",
    "obe", "mbe", "cbe", "kbe",
];

/// Normalizes a person name into its canonical comparison key.
///
/// Empty or punctuation-only input yields an empty string. The function is
/// idempotent: `normalize_name(&normalize_name(x)) == normalize_name(x)`.
///
/// # Examples
///
/// ```
/// use person_resolver::normalize_name;
///
/// assert_eq!(normalize_name("Maxwell, Ghislaine"), "ghislaine maxwell");
/// assert_eq!(normalize_name("Dr. Robert Smith"), "robert smith");
/// assert_eq!(normalize_name("John Smith Jr."), "john smith");
/// assert_eq!(normalize_name(""), "");
/// ```
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let reordered = reorder_comma(trimmed);

    // Tokens with no letters would vanish in the punctuation pass; dropping
    // them first keeps the strip rules looking at the tokens that survive.
    let mut tokens: Vec<String> = reordered
        .split_whitespace()
        .map(fold_token)
        .filter(|t| !t.is_empty())
        .collect();

    // A lone title or suffix is kept so the key never collapses to nothing.
    while tokens.len() > 1 && is_honorific(&tokens[0]) {
        tokens.remove(0);
    }
    while tokens.len() > 1 && tokens.last().is_some_and(|t| is_suffix(t)) {
        tokens.pop();
    }

    tokens.join(" ")
}

/// Whitespace-separated tokens of an already normalized key.
pub fn tokens(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split(' ').filter(|t| !t.is_empty())
}

/// The key with all whitespace removed. Recovers OCR-split names.
#[must_use]
pub fn spaceless_key(normalized: &str) -> String {
    normalized.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Returns true if the folded token is a known honorific.
#[must_use]
pub fn is_honorific(token: &str) -> bool {
    HONORIFICS.contains(&token)
}

/// Returns true if the folded token is a known suffix or qualifier.
#[must_use]
pub fn is_suffix(token: &str) -> bool {
    SUFFIXES.contains(&token)
}

/// Keeps letters only, lowercased. Lowercasing can emit combining marks, so
/// the result is filtered again.
fn fold_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphabetic())
        .collect()
}

/// Rewrites `"Last, First"` as `"First Last"`.
///
/// A trailing comma segment that is a suffix (`"Smith, John, Jr."`) is set
/// aside first and re-appended, as are suffix tokens at the end of the given
/// segment (`"Smith, John Jr."`), so the suffix pass still sees them last.
fn reorder_comma(name: &str) -> String {
    if !name.contains(',') {
        return name.to_string();
    }

    let mut segments: Vec<&str> = name.split(',').map(str::trim).collect();
    let mut suffixes: Vec<&str> = Vec::new();
    while segments.len() > 2 {
        match segments.last() {
            Some(&seg) if is_suffix_segment(seg) => {
                suffixes.push(seg);
                segments.pop();
            }
            _ => break,
        }
    }

    if segments.len() != 2 || segments.iter().any(|s| s.is_empty()) {
        return name.to_string();
    }
    let (family, given) = (segments[0], segments[1]);

    // "Smith, Jr." is a suffix, not a given name.
    if is_suffix_segment(given) {
        return format!("{family} {given}");
    }

    let mut given_tokens: Vec<&str> = given.split_whitespace().collect();
    while given_tokens.len() > 1 && given_tokens.last().is_some_and(|t| is_suffix(&fold_token(t))) {
        if let Some(t) = given_tokens.pop() {
            suffixes.push(t);
        }
    }

    let mut out = given_tokens.join(" ");
    out.push(' ');
    out.push_str(family);
    for suffix in suffixes.iter().rev() {
        out.push(' ');
        out.push_str(suffix);
    }
    out
}

fn is_suffix_segment(segment: &str) -> bool {
    let mut parts = segment.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(only), None) => is_suffix(&fold_token(only)),
        _ => false,
    }
}
