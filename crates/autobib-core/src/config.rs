//! Configuration for autobib
//!
//! Every tunable of the engine lives here: matching thresholds, the cite key
//! style, filename patterns, the text substitution table, backend settings and
//! the names of the per-folder files. Sections default individually, so a
//! config file only needs to mention what it changes.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AutobibError, ConfigError, Result};

/// Name of the per-tree config file looked up in the processed root
pub const LOCAL_CONFIG_NAME: &str = ".autobib.toml";

/// System-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutobibConfig {
    pub matching: MatchingConfig,
    pub keys: KeyConfig,
    pub filenames: FilenameConfig,
    pub text: TextConfig,
    pub query: QueryConfig,
    pub files: FilesConfig,
}

/// Identity matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum normalized Levenshtein similarity for two titles to match
    pub title_threshold: f64,
    /// When either side has no authors, match on title alone
    pub allow_missing_authors: bool,
    /// Minimum similarity between a generated and an actual filename
    pub file_similarity_threshold: f64,
    /// Leading words dropped from normalized titles
    pub ignored_title_prefixes: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            title_threshold: 0.90,
            allow_missing_authors: true,
            file_similarity_threshold: 0.90,
            ignored_title_prefixes: ["a", "an", "the", "on", "re"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// How the title part of a cite key is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyTitleStyle {
    /// First N title words, each capitalized and concatenated (`TheArt`)
    Words,
    /// Uppercase initials of the title words, truncated to N letters (`TAO`)
    Initials,
}

/// Cite key configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub separator: String,
    pub title_style: KeyTitleStyle,
    pub title_length: usize,
    /// Surname used when a record has no author
    pub anonymous_author: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            separator: ":".to_string(),
            title_style: KeyTitleStyle::Words,
            title_length: 2,
            anonymous_author: "Anon".to_string(),
        }
    }
}

/// Filename parsing and generation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilenameConfig {
    /// Tried in order; each needs a `title` group and may have an `authors` group
    pub patterns: Vec<String>,
    /// Files matching any of these are never processed
    pub ignore: Vec<String>,
    /// Above this many authors, generated names use the "et al." form
    pub max_authors: usize,
}

impl Default for FilenameConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                r"^\((?P<authors>.*?)(?: et al\.)?\) (?P<title>.*)\.pdf$".to_string(),
                r"^(?P<title>.*)\.pdf$".to_string(),
            ],
            ignore: vec![
                r"(?i)supplement[a-z]*( material)?\)?\.pdf$".to_string(),
                r"(?i) - changes\.pdf$".to_string(),
            ],
            max_authors: 4,
        }
    }
}

/// One entry of the ordered substitution table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub pattern: String,
    pub replacement: String,
}

impl Substitution {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }
}

/// Text normalization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Words kept all uppercase when title-casing
    pub uppercase_words: Vec<String>,
    /// Words kept all lowercase when title-casing
    pub lowercase_words: Vec<String>,
    /// Words kept exactly as written
    pub mixedcase_words: Vec<String>,
    /// Title-case the `title` field
    pub titlecase: bool,
    /// Regex substitutions, applied in order to every field but `file`
    pub substitutions: Vec<Substitution>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            uppercase_words: vec!["3D".to_string(), "CG".to_string(), "BFGS".to_string()],
            lowercase_words: Vec::new(),
            mixedcase_words: vec!["FreeFem++".to_string()],
            titlecase: true,
            substitutions: vec![
                Substitution::new(r"\\copyright", "©"),
                Substitution::new(r"\$\\mathplus\$", "+"),
                Substitution::new(r"\\tt\{", r"\texttt{"),
            ],
        }
    }
}

/// Metadata backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Crossref relevance score below which a candidate is rejected
    pub crossref_accept_threshold: f64,
    /// Number of candidates requested per lookup
    pub rows: u32,
    /// Contact address sent to Crossref (polite pool)
    pub mailto: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            crossref_accept_threshold: 2.8,
            rows: 5,
            mailto: None,
            timeout_secs: 30,
            user_agent: format!("autobib/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Names of the files autobib reads and writes in each folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub queried: String,
    pub manual: String,
    pub output: String,
    pub skip_marker: String,
    pub master: String,
    pub skip_list: String,
    pub rejected: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            queried: ".queried.bib".to_string(),
            manual: ".manual.bib".to_string(),
            output: "biblio.bib".to_string(),
            skip_marker: ".nobib".to_string(),
            master: "master.bib".to_string(),
            skip_list: ".skip.txt".to_string(),
            rejected: ".rejected.txt".to_string(),
        }
    }
}

impl AutobibConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> std::result::Result<Self, ConfigError> {
        serde_json::from_str(json_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a config file; `.json` files are decoded as JSON, anything else as TOML
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AutobibError::io(path, e))?;
        let config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&text)?
        } else {
            Self::from_toml(&text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for a run rooted at `root`.
    ///
    /// Sources, highest priority first: `explicit`, `<root>/.autobib.toml`,
    /// `<config dir>/autobib/config.toml`, built-in defaults.
    pub fn resolve(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in Self::candidate_paths(root) {
            if candidate.is_file() {
                tracing::debug!("Using config file {:?}", candidate);
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn candidate_paths(root: &Path) -> Vec<PathBuf> {
        let local_root = if root.is_file() {
            root.parent().unwrap_or(root)
        } else {
            root
        };
        let mut paths = vec![local_root.join(LOCAL_CONFIG_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("autobib").join("config.toml"));
        }
        paths
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (name, value) in [
            ("matching.title_threshold", self.matching.title_threshold),
            (
                "matching.file_similarity_threshold",
                self.matching.file_similarity_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        if self.keys.title_length == 0 {
            return Err(ConfigError::OutOfRange(
                "keys.title_length must be positive".to_string(),
            ));
        }

        if self.filenames.max_authors == 0 {
            return Err(ConfigError::OutOfRange(
                "filenames.max_authors must be positive".to_string(),
            ));
        }

        if self.filenames.patterns.is_empty() {
            return Err(ConfigError::OutOfRange(
                "filenames.patterns must not be empty".to_string(),
            ));
        }

        for pattern in &self.filenames.patterns {
            let re = compile(pattern)?;
            if !re.capture_names().flatten().any(|name| name == "title") {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: "missing a `title` group".to_string(),
                });
            }
        }

        for pattern in self
            .filenames
            .ignore
            .iter()
            .chain(self.text.substitutions.iter().map(|s| &s.pattern))
        {
            compile(pattern)?;
        }

        Ok(())
    }
}

pub(crate) fn compile(pattern: &str) -> std::result::Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AutobibConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AutobibConfig::default();
        let toml = config.to_toml().unwrap();
        assert_eq!(AutobibConfig::from_toml(&toml).unwrap(), config);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AutobibConfig::from_toml(
            r#"
[matching]
title_threshold = 0.8

[keys]
title_style = "initials"
title_length = 3
"#,
        )
        .unwrap();
        assert_eq!(config.matching.title_threshold, 0.8);
        assert!(config.matching.allow_missing_authors);
        assert_eq!(config.keys.title_style, KeyTitleStyle::Initials);
        assert_eq!(config.keys.separator, ":");
        assert_eq!(config.files, FilesConfig::default());
    }

    #[test]
    fn test_out_of_range() {
        let mut config = AutobibConfig::default();
        config.matching.title_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pattern_needs_title_group() {
        let mut config = AutobibConfig::default();
        config.filenames.patterns = vec![r"^(?P<authors>.*)\.pdf$".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_invalid_substitution_regex() {
        let mut config = AutobibConfig::default();
        config.text.substitutions.push(Substitution::new("(", ""));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_prefers_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(LOCAL_CONFIG_NAME),
            "[query]\ncrossref_accept_threshold = 1.5\n",
        )
        .unwrap();
        let config = AutobibConfig::resolve(None, dir.path()).unwrap();
        assert_eq!(config.query.crossref_accept_threshold, 1.5);
    }
}
