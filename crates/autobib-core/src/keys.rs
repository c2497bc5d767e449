//! Cite key generation
//!
//! Keys have the form `Surname<sep>Year<sep>TitleAbbrev`, e.g.
//! `Knuth:1968:TheArt`. Collisions get letter suffixes `a`, `b`, ... `z`,
//! `aa`, `ab`, ... so generation never fails.

use std::collections::HashSet;

use crate::config::{KeyConfig, KeyTitleStyle};
use crate::record::Record;
use crate::text::normalization::{strip_accents, strip_latex, surname};

/// Builds collision-free cite keys
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    config: KeyConfig,
}

impl KeyGenerator {
    pub fn new(config: &KeyConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// The key a record would get with no collisions
    pub fn base_key(&self, record: &Record) -> String {
        let identity = record.identity();
        let author = identity
            .first_author()
            .map(|a| key_safe(&surname(a)))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.anonymous_author.clone());
        let year = identity.year.map(|y| format!("{y:04}")).unwrap_or_default();
        let title = self.title_abbrev(&identity.title);

        [author, year, title].join(&self.config.separator)
    }

    fn title_abbrev(&self, title: &str) -> String {
        let folded = strip_accents(&strip_latex(title));
        let words = folded
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .take(self.config.title_length);

        match self.config.title_style {
            KeyTitleStyle::Words => words.map(capitalize).collect(),
            KeyTitleStyle::Initials => words
                .filter_map(|w| w.chars().next())
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        }
    }

    /// Pick a key for `record` that is not in `existing_keys`.
    ///
    /// The caller must insert the returned key into `existing_keys` before
    /// the next assignment of the same batch.
    pub fn assign_key(&self, record: &Record, existing_keys: &HashSet<String>) -> String {
        let base = self.base_key(record);
        if !existing_keys.contains(&base) {
            return base;
        }
        (0..)
            .map(|n| format!("{}{}", base, letter_suffix(n)))
            .find(|candidate| !existing_keys.contains(candidate))
            .unwrap_or(base)
    }

    /// Give every record a key, in input order.
    ///
    /// A record keeps its key when that key is its base key, or its base key
    /// plus a letter suffix while the base key is taken (by `existing_keys`
    /// or by another record of the batch), and nobody claimed it first. All
    /// other records get a fresh key. `existing_keys` is updated with every
    /// key handed out.
    pub fn assign_all(&self, records: &mut [Record], existing_keys: &mut HashSet<String>) {
        let bases: Vec<String> = records.iter().map(|r| self.base_key(r)).collect();
        let mut kept = vec![false; records.len()];

        // Unsuffixed keys first, so a suffixed key never outranks its base
        for (i, record) in records.iter().enumerate() {
            if record.key.as_deref() == Some(bases[i].as_str()) && !existing_keys.contains(&bases[i]) {
                existing_keys.insert(bases[i].clone());
                kept[i] = true;
            }
        }

        for (i, record) in records.iter().enumerate() {
            let Some(key) = record.key.as_deref().filter(|_| !kept[i]) else {
                continue;
            };
            let base = bases[i].as_str();
            let base_taken = existing_keys.contains(base)
                || bases.iter().enumerate().any(|(j, other)| j != i && other == base);
            if is_suffixed(key, base) && base_taken && !existing_keys.contains(key) {
                existing_keys.insert(key.to_string());
                kept[i] = true;
            }
        }

        for i in (0..records.len()).filter(|i| !kept[*i]) {
            let key = self.assign_key(&records[i], existing_keys);
            if records[i].key.as_deref() != Some(key.as_str()) {
                tracing::debug!("Assigned key {} to {}", key, records[i].identity());
            }
            existing_keys.insert(key.clone());
            records[i].key = Some(key);
        }
    }
}

/// `key` is `base` followed by a collision suffix
fn is_suffixed(key: &str, base: &str) -> bool {
    key.strip_prefix(base)
        .is_some_and(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_lowercase()))
}

/// Bijective base-26: 0 → `a`, 25 → `z`, 26 → `aa`
pub fn letter_suffix(mut n: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'a' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.iter().rev().map(|&b| b as char).collect()
}

/// Keep ASCII letters only, preserving case
fn key_safe(s: &str) -> String {
    strip_accents(&strip_latex(s))
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Source;
    use std::collections::BTreeMap;

    fn record(author: &str, title: &str, year: &str) -> Record {
        let mut fields = BTreeMap::new();
        if !author.is_empty() {
            fields.insert("author".to_string(), author.to_string());
        }
        fields.insert("title".to_string(), title.to_string());
        if !year.is_empty() {
            fields.insert("year".to_string(), year.to_string());
        }
        Record::new("article", fields, Source::Queried)
    }

    #[test]
    fn test_base_key() {
        let keys = KeyGenerator::default();
        assert_eq!(
            keys.base_key(&record("Knuth", "The Art", "1968")),
            "Knuth:1968:TheArt"
        );
        assert_eq!(
            keys.base_key(&record("G{\\\"o}del, Kurt", "über formal unentscheidbare Sätze", "1931")),
            "Godel:1931:UberFormal"
        );
        assert_eq!(
            keys.base_key(&record("Jean-Pierre Serre", "a course in arithmetic", "")),
            "Serre::ACourse"
        );
    }

    #[test]
    fn test_base_key_is_total() {
        let keys = KeyGenerator::default();
        assert_eq!(keys.base_key(&record("", "X", "")), "Anon::X");
        assert_eq!(keys.base_key(&record("", "", "")), "Anon::");
    }

    #[test]
    fn test_initials_style() {
        let keys = KeyGenerator::new(&KeyConfig {
            title_style: KeyTitleStyle::Initials,
            title_length: 3,
            separator: "_".to_string(),
            ..KeyConfig::default()
        });
        assert_eq!(
            keys.base_key(&record("Knuth", "the art of computer programming", "1968")),
            "Knuth_1968_TAO"
        );
    }

    #[test]
    fn test_collision_suffixes() {
        let keys = KeyGenerator::default();
        let r = record("Knuth", "The Art", "1968");
        let mut existing = HashSet::new();
        for expected in ["Knuth:1968:TheArt", "Knuth:1968:TheArta", "Knuth:1968:TheArtb"] {
            let key = keys.assign_key(&r, &existing);
            assert_eq!(key, expected);
            existing.insert(key);
        }
    }

    #[test]
    fn test_letter_suffix() {
        assert_eq!(letter_suffix(0), "a");
        assert_eq!(letter_suffix(25), "z");
        assert_eq!(letter_suffix(26), "aa");
        assert_eq!(letter_suffix(27), "ab");
        assert_eq!(letter_suffix(26 + 26 * 26), "aaa");
    }

    #[test]
    fn test_assign_all_keeps_derived_keys() {
        let keys = KeyGenerator::default();
        let mut first = record("Knuth", "The Art", "1968");
        first.key = Some("Knuth:1968:TheArtb".to_string());
        let mut stale = record("Knuth", "The Art", "1969");
        stale.key = Some("Knuth:1968:TheArt".to_string());
        let fresh = record("Knuth", "The Art", "1968");

        let mut records = vec![first, stale, fresh];
        let mut existing = HashSet::new();
        keys.assign_all(&mut records, &mut existing);

        let assigned: Vec<_> = records.iter().map(|r| r.key.clone().unwrap()).collect();
        assert_eq!(
            assigned,
            vec!["Knuth:1968:TheArtb", "Knuth:1969:TheArt", "Knuth:1968:TheArt"]
        );
        assert_eq!(existing.len(), 3);
    }

    #[test]
    fn test_leftover_title_letters_are_not_a_suffix() {
        let keys = KeyGenerator::default();
        let mut corrected = record("Knuth", "The Art of War", "1968");
        corrected.key = Some("Knuth:1968:TheArts".to_string());

        let mut records = vec![corrected];
        keys.assign_all(&mut records, &mut HashSet::new());
        assert_eq!(records[0].key.as_deref(), Some("Knuth:1968:TheArt"));
    }

    #[test]
    fn test_suffixed_key_kept_while_base_is_taken() {
        let keys = KeyGenerator::default();
        let mut second = record("Knuth", "The Art", "1968");
        second.key = Some("Knuth:1968:TheArta".to_string());

        let mut alone = vec![second.clone()];
        keys.assign_all(&mut alone, &mut HashSet::new());
        assert_eq!(alone[0].key.as_deref(), Some("Knuth:1968:TheArt"));

        let mut taken: HashSet<String> = ["Knuth:1968:TheArt".to_string()].into_iter().collect();
        let mut elsewhere = vec![second];
        keys.assign_all(&mut elsewhere, &mut taken);
        assert_eq!(elsewhere[0].key.as_deref(), Some("Knuth:1968:TheArta"));
    }
}
