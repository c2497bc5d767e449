//! Identity matching
//!
//! Two identities describe the same work when their normalized titles are
//! close enough and at least one normalized surname is shared. Titles that
//! normalize to the same string skip the distance computation.

use strsim::normalized_levenshtein;

use crate::config::MatchingConfig;
use crate::record::Identity;
use crate::text::normalization::{normalize_title, normalized_surname};

/// Decides whether two identities refer to the same work
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    title_threshold: f64,
    allow_missing_authors: bool,
    ignored_prefixes: Vec<String>,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}

impl IdentityMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            title_threshold: config.title_threshold,
            allow_missing_authors: config.allow_missing_authors,
            ignored_prefixes: config.ignored_title_prefixes.clone(),
        }
    }

    pub fn normalize_title(&self, title: &str) -> String {
        normalize_title(title, &self.ignored_prefixes)
    }

    /// Similarity of two titles in `[0, 1]` after normalization
    pub fn title_similarity(&self, a: &str, b: &str) -> f64 {
        let a = self.normalize_title(a);
        let b = self.normalize_title(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        normalized_levenshtein(&a, &b)
    }

    /// At least one surname in common
    pub fn authors_overlap(&self, a: &[String], b: &[String]) -> bool {
        let surnames: Vec<String> = a
            .iter()
            .map(|author| normalized_surname(author))
            .filter(|s| !s.is_empty())
            .collect();
        b.iter()
            .map(|author| normalized_surname(author))
            .any(|s| !s.is_empty() && surnames.contains(&s))
    }

    pub fn are_same(&self, a: &Identity, b: &Identity) -> bool {
        if self.title_similarity(&a.title, &b.title) < self.title_threshold {
            return false;
        }
        if a.authors.is_empty() || b.authors.is_empty() {
            return self.allow_missing_authors;
        }
        self.authors_overlap(&a.authors, &b.authors)
    }

    /// Index of the first identity in `candidates` matching `identity`
    pub fn find<'a, I>(&self, identity: &Identity, candidates: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        candidates
            .into_iter()
            .position(|candidate| self.are_same(identity, candidate))
    }
}
