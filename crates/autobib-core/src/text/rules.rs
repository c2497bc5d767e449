//! Field value normalization pass
//!
//! All capitalization and substitution rules are gathered in one place and
//! applied as a pure function of the input text. Applying the rules to their
//! own output changes nothing.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::{compile, TextConfig};
use crate::error::ConfigError;

lazy_static! {
    static ref PAGE_RANGE: Regex = Regex::new(r"^(\w+)\s*(?:-+|–|—)\s*(\w+)$").unwrap();
}

/// Words left lowercase inside a title
const SMALL_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "en", "for", "if", "in", "of", "on", "or", "the",
    "to", "v", "via", "vs", "with",
];

/// Punctuation kept outside a word when matching the word lists
const TRAILING_PUNCTUATION: &[char] = &[':', ',', '.', ';', '?', '!'];

/// Compiled text rules
#[derive(Debug, Clone)]
pub struct TextRules {
    substitutions: Vec<(Regex, String)>,
    uppercase: Vec<String>,
    lowercase: Vec<String>,
    mixedcase: Vec<String>,
    titlecase: bool,
}

impl TextRules {
    pub fn new(config: &TextConfig) -> Result<Self, ConfigError> {
        let substitutions = config
            .substitutions
            .iter()
            .map(|s| Ok((compile(&s.pattern)?, s.replacement.clone())))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self {
            substitutions,
            uppercase: config.uppercase_words.iter().map(|w| w.to_uppercase()).collect(),
            lowercase: config.lowercase_words.iter().map(|w| w.to_lowercase()).collect(),
            mixedcase: config.mixedcase_words.clone(),
            titlecase: config.titlecase,
        })
    }

    /// Normalize one field value. The `file` field is returned untouched.
    pub fn normalize_field(&self, name: &str, value: &str) -> String {
        if name == "file" {
            return value.to_string();
        }

        let mut text = value.replace(['\n', '\r'], " ");
        for (pattern, replacement) in &self.substitutions {
            text = pattern.replace_all(&text, replacement.as_str()).into_owned();
        }
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

        match name {
            "title" if self.titlecase => self.to_titlecase(&text),
            "pages" => normalize_pages(&text),
            _ => text,
        }
    }

    /// Title-case a string, honoring the configured word lists
    pub fn to_titlecase(&self, text: &str) -> String {
        let mut words = Vec::new();
        let mut after_colon = true;
        for (i, word) in text.split(' ').enumerate() {
            let is_first = i == 0 || after_colon;
            after_colon = word.ends_with(':') || word.ends_with('-');
            words.push(self.titlecase_word(word, is_first));
        }
        words.join(" ")
    }

    fn titlecase_word(&self, word: &str, is_first: bool) -> String {
        let core = word.trim_end_matches(TRAILING_PUNCTUATION);
        let trailing = &word[core.len()..];
        if core.is_empty() {
            return word.to_string();
        }
        self.titlecase_core(core, is_first) + trailing
    }

    fn titlecase_core(&self, word: &str, is_first: bool) -> String {
        let bare: String = word.chars().filter(|c| c.is_alphanumeric()).collect();

        if let Some(mixed) = self.mixedcase.iter().find(|m| m.eq_ignore_ascii_case(word)) {
            return mixed.clone();
        }
        if self.uppercase.contains(&bare.to_uppercase()) && !bare.is_empty() {
            return word.to_uppercase();
        }
        if self.lowercase.contains(&word.to_lowercase()) {
            return word.to_lowercase();
        }
        // LaTeX, math and brace-protected words are left alone
        if word.starts_with(['\\', '$', '{']) {
            return word.to_string();
        }
        // Acronyms and words like iPhone or McDonald already carry intent
        if word.chars().skip(1).any(|c| c.is_uppercase()) {
            return word.to_string();
        }
        if !is_first && SMALL_WORDS.contains(&bare.to_lowercase().as_str()) {
            return word.to_lowercase();
        }
        capitalize_first(word)
    }
}

fn capitalize_first(word: &str) -> String {
    let mut result = String::with_capacity(word.len());
    let mut done = false;
    for c in word.chars() {
        if !done && c.is_alphabetic() {
            result.extend(c.to_uppercase());
            done = true;
        } else {
            result.push(c);
        }
    }
    result
}

/// `12-34`, `12 – 34` and `12---34` all become `12--34`
fn normalize_pages(pages: &str) -> String {
    match PAGE_RANGE.captures(pages) {
        Some(caps) => format!("{}--{}", &caps[1], &caps[2]),
        None => pages.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Substitution;

    fn rules() -> TextRules {
        TextRules::new(&TextConfig::default()).unwrap()
    }

    #[test]
    fn test_titlecase() {
        let rules = rules();
        assert_eq!(
            rules.to_titlecase("the art of computer programming"),
            "The Art of Computer Programming"
        );
        assert_eq!(
            rules.to_titlecase("fast 3d meshing with freefem++: a survey"),
            "Fast 3D Meshing with FreeFem++: A Survey"
        );
        assert_eq!(
            rules.to_titlecase("3d cg, bfgs; freefem++."),
            "3D CG, BFGS; FreeFem++."
        );
        assert_eq!(
            rules.to_titlecase("an {MPI} solver for $\\alpha$-shapes"),
            "An {MPI} Solver for $\\alpha$-shapes"
        );
    }

    #[test]
    fn test_titlecase_is_idempotent() {
        let rules = rules();
        let once = rules.to_titlecase("a study of bfgs in the wild: part two");
        assert_eq!(rules.to_titlecase(&once), once);
    }

    #[test]
    fn test_substitutions_apply_in_order() {
        let mut config = TextConfig::default();
        config.substitutions = vec![
            Substitution::new("GCMMA-two", "GCMMA - two"),
            Substitution::new("two", "2"),
        ];
        config.titlecase = false;
        let rules = TextRules::new(&config).unwrap();
        assert_eq!(rules.normalize_field("title", "GCMMA-two"), "GCMMA - 2");
    }

    #[test]
    fn test_normalize_field() {
        let rules = rules();
        assert_eq!(rules.normalize_field("pages", "12 - 34"), "12--34");
        assert_eq!(rules.normalize_field("note", "line\none"), "line one");
        assert_eq!(rules.normalize_field("file", ":a  b.pdf:PDF"), ":a  b.pdf:PDF");
        assert_eq!(rules.normalize_field("rights", "\\copyright ACM"), "© ACM");
    }
}
