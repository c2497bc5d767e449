//! Bibliographic record and identity types
//!
//! A [`Record`] is the unit every component works on: it is created the
//! moment an entry is parsed and converted back to a [`BibTeXEntry`] only for
//! the final write. Its [`Identity`] is derived once from the `author`,
//! `title` and `year` fields and never changes afterwards; building a record
//! with different identity fields means building a new record.

use std::collections::BTreeMap;
use std::fmt;

use autobib_bibtex::{decode_file_field, encode_file_field, BibTeXEntry, BibTeXEntryType};

use crate::text::normalization::split_authors;

/// Name of the pseudo-field carrying a backend score in `.queried.bib`
pub const CONFIDENCE_FIELD: &str = "confidence";

/// Fields written first, in this order; everything else follows alphabetically
const FIELD_ORDER: &[&str] = &[
    "author",
    "title",
    "journal",
    "booktitle",
    "year",
    "month",
    "volume",
    "number",
    "pages",
    "publisher",
    "doi",
    "url",
    "file",
];

/// Where a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Fetched from a metadata backend (`.queried.bib`)
    Queried,
    /// Written by the user (`.manual.bib`)
    Manual,
    /// Output of a previous run (`biblio.bib`)
    Existing,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Queried => "queried",
            Source::Manual => "manual",
            Source::Existing => "existing",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (authors, title, year) triple used to decide whether two records
/// describe the same work. Values are kept as written; normalization happens
/// in the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Identity {
    pub authors: Vec<String>,
    pub title: String,
    pub year: Option<i32>,
}

impl Identity {
    pub fn new(authors: Vec<String>, title: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            authors,
            title: title.into(),
            year,
        }
    }

    /// Derive an identity from bibtex fields
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Self {
        Self {
            authors: fields
                .get("author")
                .map(|a| split_authors(a))
                .unwrap_or_default(),
            title: fields.get("title").cloned().unwrap_or_default(),
            year: fields.get("year").and_then(|y| parse_year(y)),
        }
    }

    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first_author(), self.year) {
            (Some(author), Some(year)) => write!(f, "{} ({}): {}", author, year, self.title),
            (Some(author), None) => write!(f, "{}: {}", author, self.title),
            (None, Some(year)) => write!(f, "({}): {}", year, self.title),
            (None, None) => f.write_str(&self.title),
        }
    }
}

/// First run of four digits in a year field (`{1968}`, `1968a`, `c. 1968`)
pub fn parse_year(value: &str) -> Option<i32> {
    let digits: Vec<char> = value.chars().collect();
    digits
        .windows(4)
        .enumerate()
        .find(|(i, w)| {
            w.iter().all(|c| c.is_ascii_digit())
                && (*i == 0 || !digits[i - 1].is_ascii_digit())
                && digits.get(i + 4).map_or(true, |c| !c.is_ascii_digit())
        })
        .and_then(|(_, w)| w.iter().collect::<String>().parse().ok())
}

/// A normalized bibliographic entry
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    identity: Identity,
    fields: BTreeMap<String, String>,
    pub entry_type: String,
    pub key: Option<String>,
    pub source: Source,
    /// Backend score, only meaningful for queried records
    pub confidence: Option<f64>,
    /// Path of the associated PDF relative to the folder
    pub file_path: Option<String>,
}

impl Record {
    /// Build a record from its bibtex fields. Field names are lowercased;
    /// `file` and `confidence` are kept out of `fields`.
    pub fn new(
        entry_type: impl Into<String>,
        fields: BTreeMap<String, String>,
        source: Source,
    ) -> Self {
        let fields: BTreeMap<String, String> = fields
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .filter(|(k, _)| k != "file" && k != CONFIDENCE_FIELD)
            .collect();
        Self {
            identity: Identity::from_fields(&fields),
            fields,
            entry_type: entry_type.into().to_lowercase(),
            key: None,
            source,
            confidence: None,
            file_path: None,
        }
    }

    /// Convert a parsed entry. The `file` field is decoded into `file_path`
    /// and the `confidence` pseudo-field into `confidence`.
    pub fn from_entry(entry: &BibTeXEntry, source: Source) -> Self {
        let map = entry.fields_map();
        let mut record = Record::new(entry.entry_type.as_str(), map.clone(), source);
        record.file_path = map.get("file").and_then(|f| decode_file_field(f));
        record.confidence = map
            .get(CONFIDENCE_FIELD)
            .and_then(|c| c.trim().parse::<f64>().ok());
        if !entry.cite_key.trim().is_empty() {
            record.key = Some(entry.cite_key.trim().to_string());
        }
        record
    }

    /// Convert back to a bibtex entry with fields in canonical order
    pub fn to_entry(&self) -> BibTeXEntry {
        let mut entry = BibTeXEntry::new(
            self.key.clone().unwrap_or_default(),
            BibTeXEntryType::from_str(&self.entry_type),
        );
        let mut fields: Vec<(&str, String)> = self
            .fields
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.as_str(), value.clone()))
            .collect();
        if let Some(path) = &self.file_path {
            fields.push(("file", encode_file_field(path)));
        }
        fields.sort_by_key(|(name, _)| field_rank(name));
        for (name, value) in fields {
            entry.set_field(name, value);
        }
        entry
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn title(&self) -> &str {
        &self.identity.title
    }

    pub fn year(&self) -> Option<i32> {
        self.identity.year
    }

    /// Rebuild the record with new fields, carrying over everything else.
    /// The identity is derived again from `fields`.
    pub fn with_fields(&self, fields: BTreeMap<String, String>) -> Self {
        let mut record = Record::new(self.entry_type.clone(), fields, self.source);
        record.key = self.key.clone();
        record.confidence = self.confidence;
        record.file_path = self.file_path.clone();
        record
    }

    /// Replace a field that is not part of the identity
    ///
    /// Returns `false` and leaves the record unchanged for `author`, `title`
    /// and `year`; use [`Record::with_fields`] for those.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> bool {
        let name = name.to_lowercase();
        if matches!(name.as_str(), "author" | "title" | "year" | "file") {
            return false;
        }
        self.fields.insert(name, value.into());
        true
    }

    /// Apply `f` to every field value, producing a record with the same
    /// metadata. Used by the text normalization pass.
    pub fn map_fields(&self, mut f: impl FnMut(&str, &str) -> String) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), f(name, value)))
            .collect();
        self.with_fields(fields)
    }

    pub fn is_manual(&self) -> bool {
        self.source == Source::Manual
    }
}

fn field_rank(name: &str) -> (usize, String) {
    match FIELD_ORDER.iter().position(|f| *f == name) {
        Some(pos) => (pos, String::new()),
        None => (FIELD_ORDER.len(), name.to_string()),
    }
}
