//! Google Scholar backend
//!
//! Scrapes the first hit of a results page. There is no API and no score,
//! so a parsed hit is always accepted.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::{Candidate, Lookup};
use crate::config::QueryConfig;
use crate::error::LookupError;
use crate::http::HttpClient;
use crate::record::{Identity, Record, Source};

const SEARCH_URL: &str = "https://scholar.google.com/scholar";

lazy_static! {
    static ref RESULT_TITLE: Regex =
        Regex::new(r#"(?s)<h3[^>]*class="gs_rt"[^>]*>(.*?)</h3>"#).unwrap();
    static ref RESULT_AUTHORS: Regex =
        Regex::new(r#"(?s)<div[^>]*class="gs_a"[^>]*>(.*?)</div>"#).unwrap();
    static ref TAG: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref KIND_MARKER: Regex = Regex::new(r"^\s*\[[A-Z]+\]\s*").unwrap();
    static ref YEAR: Regex = Regex::new(r"\b(1[5-9]\d\d|20\d\d)\b").unwrap();
    static ref TRAILING_DOTS: Regex = Regex::new(r"\.*$").unwrap();
}

pub struct ScholarBackend {
    client: HttpClient,
}

impl ScholarBackend {
    pub fn new(config: &QueryConfig) -> Result<Self, LookupError> {
        Ok(Self {
            client: HttpClient::from_config(config)?,
        })
    }

    /// Parse the first hit of a results page, if any
    pub fn parse_results(html: &str) -> Result<Vec<Candidate>, LookupError> {
        if html.contains("gs_captcha") || html.contains("/sorry/") {
            return Err(LookupError::RateLimited);
        }

        let Some(title) = RESULT_TITLE.captures(html).map(|c| clean_text(&c[1])) else {
            return Ok(Vec::new());
        };
        let title = KIND_MARKER.replace(&title, "");
        let title = TRAILING_DOTS.replace(title.trim(), "").trim().to_string();
        if title.is_empty() {
            return Ok(Vec::new());
        }

        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), title);

        let mut entry_type = "misc";
        if let Some(line) = RESULT_AUTHORS.captures(html).map(|c| clean_text(&c[1])) {
            let mut parts = line.split(" - ");
            let authors: Vec<String> = parts
                .next()
                .unwrap_or_default()
                .split(", ")
                .map(|a| a.trim_matches(|c: char| c == '…' || c.is_whitespace()))
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
            if !authors.is_empty() {
                fields.insert("author".to_string(), authors.join(" and "));
            }

            // "Venue, 1999" when the venue is known, else just the year
            if let Some(venue_line) = parts.next() {
                if let Some(year) = YEAR.find(venue_line) {
                    fields.insert("year".to_string(), year.as_str().to_string());
                }
                let venue = YEAR
                    .replace(venue_line, "")
                    .trim_matches(|c: char| c == ',' || c == '…' || c.is_whitespace())
                    .to_string();
                if !venue.is_empty() {
                    fields.insert("journal".to_string(), venue);
                    entry_type = "article";
                }
            }
        }

        Ok(vec![Candidate {
            record: Record::new(entry_type, fields, Source::Queried),
            score: None,
        }])
    }
}

impl Lookup for ScholarBackend {
    fn name(&self) -> &str {
        "scholar"
    }

    fn lookup(&self, identity: &Identity) -> Result<Vec<Candidate>, LookupError> {
        let mut query = identity.authors.join(" ");
        if !query.is_empty() {
            query.push(' ');
        }
        query.push_str(&identity.title);

        let response = self.client.get_with_params(SEARCH_URL, &[("q", query.as_str())])?;
        let candidates = Self::parse_results(&response.body)?;
        debug!("Scholar returned {} candidates", candidates.len());
        Ok(candidates)
    }
}

/// Strip tags and decode the handful of entities Scholar emits
fn clean_text(html: &str) -> String {
    let text = TAG.replace_all(html, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&hellip;", "…")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .replace('\u{a0}', " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
