use std::collections::BTreeSet;

use person_resolver::{
    build_clusters, is_same_person, match_rule, normalize_name, PersonId, PersonRecord,
};
use proptest::prelude::*;

const GIVEN: &[&str] = &[
    "Jeffrey", "Jeff", "J.", "Robert", "Bob", "Rob", "William", "Bill", "John", "Jon", "James",
    "Ghislaine", "Ghisaine", "Jane", "Alex", "Alexander",
];
const FAMILY: &[&str] = &["Epstein", "Smith", "Smyth", "Maxwell", "Maxwel", "Clinton", "Perry"];
const DECOR: &[&str] = &["", "Dr.", "Mr", "Sir"];
const TAIL: &[&str] = &["", "Jr.", "QC", "III"];

/// Realistic surface forms: "Given Family", "Family, Given", titles,
/// suffixes, single tokens.
fn surface_name() -> impl Strategy<Value = String> {
    (
        0..GIVEN.len(),
        0..FAMILY.len(),
        0..DECOR.len(),
        0..TAIL.len(),
        0..4u8,
    )
        .prop_map(|(g, f, d, t, shape)| {
            let (given, family, decor, tail) = (GIVEN[g], FAMILY[f], DECOR[d], TAIL[t]);
            match shape {
                0 => format!("{decor} {given} {family} {tail}"),
                1 => format!("{family}, {given} {tail}"),
                2 => given.to_string(),
                _ => format!("{given}{family}"),
            }
        })
}

fn catalog() -> impl Strategy<Value = Vec<PersonRecord>> {
    prop::collection::vec(
        (surface_name(), prop::collection::vec(surface_name(), 0..2)),
        0..14,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (name, aliases))| {
                let id = PersonId::new(i64::try_from(i).unwrap_or(i64::MAX) + 1);
                PersonRecord::new(id, name).with_aliases(aliases)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn normalize_is_idempotent_on_arbitrary_text(s in ".{0,60}") {
        let once = normalize_name(&s);
        prop_assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn normalize_is_idempotent_on_names(s in surface_name()) {
        let once = normalize_name(&s);
        prop_assert_eq!(normalize_name(&once), once.clone());
        prop_assert!(once.chars().all(|c| c == ' ' || c.is_alphabetic()));
        prop_assert!(!once.contains("  "));
    }

    #[test]
    fn matcher_is_symmetric(a in surface_name(), b in surface_name(), alias in surface_name()) {
        let x = PersonRecord::new(PersonId::new(1), a).with_aliases([alias]);
        let y = PersonRecord::new(PersonId::new(2), b);
        prop_assert_eq!(is_same_person(&x, &y), is_same_person(&y, &x));
        prop_assert_eq!(match_rule(&x, &y), match_rule(&y, &x));
    }

    #[test]
    fn single_identical_tokens_never_match(given in 0..GIVEN.len()) {
        let x = PersonRecord::new(PersonId::new(1), GIVEN[given]);
        let y = PersonRecord::new(PersonId::new(2), GIVEN[given]);
        prop_assert!(!is_same_person(&x, &y));
    }

    #[test]
    fn clusters_are_disjoint_and_confirmed_ones_are_cliques(records in catalog()) {
        let set = build_clusters(&records);
        let mut seen = BTreeSet::new();
        for cluster in set.confirmed.iter().chain(&set.ambiguous) {
            prop_assert!(cluster.len() >= 2);
            for id in cluster.ids() {
                prop_assert!(seen.insert(id), "{} appears in two clusters", id);
            }
        }
        for cluster in &set.confirmed {
            let members: Vec<&PersonRecord> = records
                .iter()
                .filter(|r| cluster.contains(r.id))
                .collect();
            for (i, a) in members.iter().enumerate() {
                for b in &members[i + 1..] {
                    prop_assert!(is_same_person(a, b));
                }
            }
        }
        for cluster in &set.ambiguous {
            prop_assert!(!cluster.missing_pairs().is_empty());
        }
    }
}
