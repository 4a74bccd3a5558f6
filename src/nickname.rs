//! Bidirectional English nickname dictionary.
//!
//! Each group lists a formal given name followed by its common short forms.
//! Two tokens are nickname-equivalent when some group contains both, so
//! `bob ~ robert` and `bob ~ rob` hold but `john ~ jonathan` does not even
//! though both groups list `jon`.

use std::collections::HashMap;
use std::sync::OnceLock;

const GROUPS: &[&[&str]] = &[
    &["robert", "bob", "bobby", "rob", "robbie", "bert"],
    &["william", "bill", "billy", "will", "willie", "liam"],
    &["james", "jim", "jimmy", "jamie"],
    &["john", "jack", "johnny", "jon"],
    &["jonathan", "jon", "jonny"],
    &["alexander", "alex", "al", "sandy", "xander"],
    &["alexandra", "alex", "sandra", "sandy", "lexi"],
    &["albert", "al", "bert"],
    &["jeffrey", "jeff"],
    &["geoffrey", "geoff", "jeff"],
    &["michael", "mike", "mikey", "mick"],
    &["richard", "dick", "rick", "rich", "richie", "ricky"],
    &["thomas", "tom", "tommy"],
    &["joseph", "joe", "joey"],
    &["charles", "charlie", "chuck", "chas"],
    &["edward", "ed", "eddie", "ted", "ned"],
    &["elizabeth", "liz", "beth", "betty", "eliza", "lizzie", "bess"],
    &["margaret", "maggie", "peggy", "meg", "marge"],
    &["katherine", "kate", "kathy", "katie", "kat"],
    &["catherine", "cathy", "kate", "katie", "cat"],
    &["christopher", "chris", "kit"],
    &["christine", "chris", "chrissy", "tina"],
    &["daniel", "dan", "danny"],
    &["david", "dave", "davey"],
    &["anthony", "tony"],
    &["andrew", "andy", "drew"],
    &["benjamin", "ben", "benny"],
    &["nicholas", "nick", "nicky"],
    &["matthew", "matt"],
    &["patrick", "pat", "paddy"],
    &["patricia", "pat", "patty", "trish"],
    &["samuel", "sam", "sammy"],
    &["stephen", "steve"],
    &["steven", "steve"],
    &["timothy", "tim", "timmy"],
    &["gregory", "greg"],
    &["lawrence", "larry"],
    &["leonard", "leo", "len", "lenny"],
    &["donald", "don", "donny"],
    &["ronald", "ron", "ronnie"],
    &["kenneth", "ken", "kenny"],
    &["susan", "sue", "susie"],
    &["deborah", "deb", "debbie"],
    &["jennifer", "jen", "jenny"],
    &["rebecca", "becky", "becca"],
    &["victoria", "vicky", "tori"],
    &["frederick", "fred", "freddie"],
    &["harold", "harry", "hal"],
    &["henry", "hank", "harry", "hal"],
    &["jacqueline", "jackie"],
    &["virginia", "ginny"],
];

fn index() -> &'static HashMap<&'static str, Vec<usize>> {
    static INDEX: OnceLock<HashMap<&'static str, Vec<usize>>> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut map: HashMap<&'static str, Vec<usize>> = HashMap::new();
        for (group_idx, group) in GROUPS.iter().enumerate() {
            for &name in *group {
                map.entry(name).or_default().push(group_idx);
            }
        }
        map
    })
}

/// True if two distinct tokens name the same given name via the dictionary.
#[must_use]
pub fn equivalent(a: &str, b: &str) -> bool {
    if a == b {
        return false;
    }
    let idx = index();
    match (idx.get(a), idx.get(b)) {
        (Some(ga), Some(gb)) => ga.iter().any(|g| gb.contains(g)),
        _ => false,
    }
}

/// Every dictionary name sharing a group with `token`, including `token`
/// itself when it is listed.
pub fn variants(token: &str) -> impl Iterator<Item = &'static str> + '_ {
    index()
        .get(token)
        .into_iter()
        .flatten()
        .flat_map(|&g| GROUPS[g].iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalence_is_bidirectional() {
        for (a, b) in [("bob", "robert"), ("bill", "william"), ("jim", "james"), ("alex", "alexander")] {
            assert!(equivalent(a, b), "{a} ~ {b}");
            assert!(equivalent(b, a), "{b} ~ {a}");
        }
    }

    #[test]
    fn test_shared_short_form_does_not_link_formal_names() {
        assert!(equivalent("jon", "john"));
        assert!(equivalent("jon", "jonathan"));
        assert!(!equivalent("john", "jonathan"));
        assert!(!equivalent("stephen", "steven"));
    }

    #[test]
    fn test_unknown_and_identical_tokens() {
        assert!(!equivalent("ghislaine", "maxwell"));
        assert!(!equivalent("bob", "bob"));
    }

    #[test]
    fn test_variants() {
        let v: Vec<_> = variants("bob").collect();
        assert!(v.contains(&"robert"));
        assert!(v.contains(&"rob"));
        assert_eq!(variants("zebulon").count(), 0);
    }
}
