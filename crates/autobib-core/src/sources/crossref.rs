//! Crossref backend
//!
//! API docs: https://api.crossref.org/swagger-ui/index.html
//! Rate limit: Polite pool with a `mailto` parameter, ~50 req/sec

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{Candidate, Lookup};
use crate::config::QueryConfig;
use crate::error::LookupError;
use crate::http::HttpClient;
use crate::record::{Identity, Record, Source};

const WORKS_URL: &str = "https://api.crossref.org/works";

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

lazy_static! {
    static ref LEADING_NUMBER: Regex = Regex::new(r"^[0-9]*\. ").unwrap();
    static ref TRAILING_MARKS: Regex = Regex::new(r"\**\.*$").unwrap();
    static ref JATS_MARKUP: Regex = Regex::new(r"</?jats:[^>]+>").unwrap();
}

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefWorkList,
}

#[derive(Debug, Deserialize)]
struct CrossrefWorkList {
    #[serde(default)]
    items: Vec<CrossrefWork>,
}

#[derive(Debug, Deserialize)]
struct CrossrefWork {
    #[serde(rename = "DOI")]
    doi: String,
    #[serde(rename = "type")]
    work_type: Option<String>,
    title: Option<Vec<String>>,
    subtitle: Option<Vec<String>>,
    author: Option<Vec<CrossrefAuthor>>,
    #[serde(rename = "container-title")]
    container_title: Option<Vec<String>>,
    #[serde(rename = "published-print")]
    published_print: Option<CrossrefDate>,
    issued: Option<CrossrefDate>,
    volume: Option<String>,
    issue: Option<String>,
    page: Option<String>,
    publisher: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts")]
    date_parts: Option<Vec<Vec<Option<i32>>>>,
}

impl CrossrefDate {
    /// (year, month) of the first date
    fn year_month(&self) -> Option<(i32, Option<u32>)> {
        let parts = self.date_parts.as_ref()?.first()?;
        let year = (*parts.first()?)?;
        let month = parts
            .get(1)
            .copied()
            .flatten()
            .and_then(|m| u32::try_from(m).ok())
            .filter(|m| (1..=12).contains(m));
        Some((year, month))
    }
}

pub struct CrossrefBackend {
    client: HttpClient,
    rows: String,
    mailto: Option<String>,
    accept_threshold: f64,
}

impl CrossrefBackend {
    pub fn new(config: &QueryConfig) -> Result<Self, LookupError> {
        Ok(Self {
            client: HttpClient::from_config(config)?,
            rows: config.rows.to_string(),
            mailto: config.mailto.clone(),
            accept_threshold: config.crossref_accept_threshold,
        })
    }

    /// Parse a `/works` search response into candidates, in response order
    pub fn parse_search_response(json: &str) -> Result<Vec<Candidate>, LookupError> {
        let response: CrossrefResponse = serde_json::from_str(json)
            .map_err(|e| LookupError::Parse(format!("Invalid Crossref JSON: {}", e)))?;
        Ok(response
            .message
            .items
            .into_iter()
            .filter_map(parse_work)
            .collect())
    }
}

impl Lookup for CrossrefBackend {
    fn name(&self) -> &str {
        "crossref"
    }

    fn lookup(&self, identity: &Identity) -> Result<Vec<Candidate>, LookupError> {
        let authors = identity.authors.join(" ");
        let mut params = vec![
            ("query.bibliographic", identity.title.as_str()),
            ("rows", self.rows.as_str()),
        ];
        if !authors.is_empty() {
            params.push(("query.author", authors.as_str()));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.as_str()));
        }

        let response = self.client.get_with_params(WORKS_URL, &params)?;
        let candidates = Self::parse_search_response(&response.body)?;
        debug!("Crossref returned {} candidates", candidates.len());
        Ok(candidates)
    }

    fn accept_threshold(&self) -> Option<f64> {
        Some(self.accept_threshold)
    }
}

fn parse_work(work: CrossrefWork) -> Option<Candidate> {
    let title = join_title(
        &work.title.unwrap_or_default(),
        &work.subtitle.unwrap_or_default(),
    )?;

    let authors: Vec<String> = work
        .author
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| match (a.family, a.given, a.name) {
            (Some(family), Some(given), _) => Some(format!("{}, {}", family, given)),
            (Some(family), None, _) => Some(family),
            (None, _, Some(name)) => Some(format!("{{{}}}", name)),
            _ => None,
        })
        .collect();

    let entry_type = match work.work_type.as_deref() {
        Some("journal-article") => "article",
        Some("proceedings-article") => "inproceedings",
        Some("book") | Some("monograph") => "book",
        Some("book-chapter") => "incollection",
        _ => "misc",
    };

    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), title);
    if !authors.is_empty() {
        fields.insert("author".to_string(), authors.join(" and "));
    }

    // Publishers often list several aliases; the longest is the full name
    let container = work
        .container_title
        .unwrap_or_default()
        .into_iter()
        .max_by_key(|c| c.chars().count());
    if let Some(container) = container {
        let field = match entry_type {
            "inproceedings" | "incollection" => "booktitle",
            "book" => "series",
            _ => "journal",
        };
        fields.insert(field.to_string(), container);
    }

    let date = work
        .published_print
        .as_ref()
        .and_then(CrossrefDate::year_month)
        .or_else(|| work.issued.as_ref().and_then(CrossrefDate::year_month));
    if let Some((year, month)) = date {
        fields.insert("year".to_string(), year.to_string());
        if let Some(month) = month {
            fields.insert("month".to_string(), MONTHS[month as usize - 1].to_string());
        }
    }

    for (name, value) in [
        ("volume", work.volume),
        ("number", work.issue),
        ("pages", work.page.map(|p| p.replace("--", "-").replace('-', "--"))),
        ("publisher", work.publisher),
        ("url", work.url),
    ] {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            fields.insert(name.to_string(), value);
        }
    }
    fields.insert("doi".to_string(), work.doi);

    // Entries without a year or authors cannot be trusted
    let score = if date.is_none() || authors.is_empty() {
        0.0
    } else {
        work.score.unwrap_or(0.0)
    };

    let mut record = Record::new(entry_type, fields, Source::Queried);
    record.confidence = Some(score);
    Some(Candidate {
        record,
        score: Some(score),
    })
}

/// Title with its non-uppercase subtitles, cleaned of numbering and trailing marks
fn join_title(titles: &[String], subtitles: &[String]) -> Option<String> {
    let title = clean_title(&strip_markup(&titles.join(" ")));
    if title.is_empty() {
        return None;
    }

    let subtitle = subtitles
        .iter()
        .filter(|s| s.chars().any(|c| c.is_lowercase()))
        .map(|s| strip_markup(s))
        .collect::<Vec<_>>()
        .join(" ");

    let full = if subtitle.is_empty()
        || title.to_lowercase().starts_with(&subtitle.to_lowercase())
        || strsim::normalized_levenshtein(&title, &subtitle) > 0.95
    {
        title
    } else {
        format!("{}: {}", title, subtitle)
    };

    Some(clean_title(&full))
}

/// Drop a trailing `*` or dots and a leading `1. ` numbering
fn clean_title(title: &str) -> String {
    let title = TRAILING_MARKS.replace(title.trim(), "");
    let title = LEADING_NUMBER.replace(&title, "");
    title.trim().to_string()
}

fn strip_markup(text: &str) -> String {
    JATS_MARKUP.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RESPONSE: &str = r#"{
        "status": "ok",
        "message": {
            "items": [{
                "DOI": "10.1234/test",
                "type": "journal-article",
                "title": ["1. A Test Paper*"],
                "subtitle": ["with a subtitle", "IGNORED"],
                "author": [
                    {"given": "John", "family": "Smith"},
                    {"name": "The Consortium"}
                ],
                "container-title": ["Test J.", "Test Journal"],
                "published-print": {"date-parts": [[2023, 1, 15]]},
                "issued": {"date-parts": [[2022]]},
                "volume": "12",
                "issue": "3",
                "page": "100-110",
                "score": 3.4
            }, {
                "DOI": "10.1234/undated",
                "type": "proceedings-article",
                "title": ["Undated"],
                "author": [{"family": "Doe"}],
                "container-title": ["Proc. Things"],
                "score": 9.0
            }, {
                "DOI": "10.1234/untitled",
                "score": 9.0
            }]
        }
    }"#;

    #[test]
    fn test_parse_search_response() {
        let candidates = CrossrefBackend::parse_search_response(SAMPLE_RESPONSE).unwrap();
        assert_eq!(candidates.len(), 2);

        let first = &candidates[0];
        assert_eq!(first.score, Some(3.4));
        let record = &first.record;
        assert_eq!(record.entry_type, "article");
        assert_eq!(record.title(), "A Test Paper: with a subtitle");
        assert_eq!(
            record.field("author"),
            Some("Smith, John and {The Consortium}")
        );
        assert_eq!(record.field("journal"), Some("Test Journal"));
        assert_eq!(record.year(), Some(2023));
        assert_eq!(record.field("month"), Some("jan"));
        assert_eq!(record.field("pages"), Some("100--110"));
        assert_eq!(record.field("number"), Some("3"));
        assert_eq!(record.field("doi"), Some("10.1234/test"));
        assert_eq!(record.source, Source::Queried);
        assert_eq!(record.confidence, Some(3.4));
    }

    #[test]
    fn test_missing_year_scores_zero() {
        let candidates = CrossrefBackend::parse_search_response(SAMPLE_RESPONSE).unwrap();
        let undated = &candidates[1];
        assert_eq!(undated.score, Some(0.0));
        assert_eq!(undated.record.entry_type, "inproceedings");
        assert_eq!(undated.record.field("booktitle"), Some("Proc. Things"));
    }

    #[test]
    fn test_join_title() {
        let s = |v: &[&str]| v.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert_eq!(
            join_title(&s(&["Shape Optimization."]), &s(&["shape optimization"])),
            Some("Shape Optimization".to_string())
        );
        assert_eq!(
            join_title(&s(&["<jats:italic>In vivo</jats:italic> imaging"]), &[]),
            Some("In vivo imaging".to_string())
        );
        assert_eq!(join_title(&[], &[]), None);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            CrossrefBackend::parse_search_response("not json"),
            Err(LookupError::Parse(_))
        ));
    }
}
