//! PDF filename parsing and generation
//!
//! The default naming scheme is `(Author1, Author2) Title.pdf`, with the
//! `(Author1 et al.) Title.pdf` form above the configured author count.
//! Files named `Title.pdf` yield an identity without authors.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use strsim::normalized_levenshtein;

use crate::config::{compile, FilenameConfig};
use crate::error::{ConfigError, FilenameError};
use crate::record::{Identity, Record};
use crate::text::normalization::{strip_accents, strip_latex, surname};
use crate::text::rules::TextRules;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r#"["\\<>|*\x00-\x1f]"#).unwrap();
    static ref COLON: Regex = Regex::new(r" *: ").unwrap();
    static ref EM_DASH: Regex = Regex::new(r" *— *").unwrap();
    static ref MULTIPLE_SPACES: Regex = Regex::new(r"\s+").unwrap();
}

/// Parses identities out of PDF names and generates the expected name of a record
#[derive(Debug, Clone)]
pub struct FilenameParser {
    patterns: Vec<Regex>,
    ignore: Vec<Regex>,
    max_authors: usize,
    rules: TextRules,
}

impl FilenameParser {
    pub fn new(config: &FilenameConfig, rules: TextRules) -> Result<Self, ConfigError> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        let ignore = config
            .ignore
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            ignore,
            max_authors: config.max_authors,
            rules,
        })
    }

    /// Whether the file is deliberately left out of processing
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|re| re.is_match(name))
    }

    /// Derive an identity from a PDF file name (directories are ignored)
    pub fn parse_filename(&self, path: &str) -> Result<Identity, FilenameError> {
        let name = Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path);

        if self.is_ignored(name) {
            return Err(FilenameError::Ignored(name.to_string()));
        }
        if !is_pdf(name) {
            return Err(FilenameError::Malformed(name.to_string()));
        }

        for pattern in &self.patterns {
            let Some(caps) = pattern.captures(name) else {
                continue;
            };
            let Some(title) = caps.name("title") else {
                continue;
            };
            let authors = caps
                .name("authors")
                .map(|m| {
                    m.as_str()
                        .split(", ")
                        .map(str::trim)
                        .filter(|a| !a.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Identity::new(authors, title.as_str().trim(), None));
        }

        Err(FilenameError::Malformed(name.to_string()))
    }

    /// The file name a record is expected to have
    pub fn gen_filename(&self, record: &Record) -> String {
        let surnames: Vec<String> = record
            .identity()
            .authors
            .iter()
            .map(|a| clean(&surname(a)).replace('~', " "))
            .filter(|s| !s.is_empty())
            .collect();

        let prefix = match surnames.len() {
            0 => String::new(),
            n if n > self.max_authors => format!("({} et al.) ", surnames[0]),
            _ => format!("({}) ", surnames.join(", ")),
        };

        let title = clean(record.title());
        let title = COLON.replace_all(&title, " - ");
        let title = EM_DASH.replace_all(&title, " - ");
        let title = title
            .replace(['–', '\u{2010}'], "-")
            .replace('/', "-")
            .replace('’', "'")
            .replace('\u{2122}', "");
        let title = MULTIPLE_SPACES.replace_all(title.trim(), " ");
        let title = self.rules.to_titlecase(&title);

        format!("{}{}.pdf", prefix, title)
    }
}

fn is_pdf(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// LaTeX markup and accents removed, filesystem-hostile characters dropped
fn clean(s: &str) -> String {
    let plain = strip_accents(&strip_latex(s));
    UNSAFE_CHARS.replace_all(&plain, "").trim().to_string()
}

/// Case-insensitive similarity of two file names in `[0, 1]`
pub fn filename_similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}
