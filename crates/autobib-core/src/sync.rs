//! Synchronization of records with the files of a folder
//!
//! [`SyncEngine::sync`] splits records into those still backed by a file and
//! those whose file vanished, re-links records without a file by name
//! similarity, and reports files nobody claims. [`SyncEngine::plan_renames`]
//! computes the renames that bring file names in line with their records;
//! nothing here touches the filesystem.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use tracing::{debug, warn};

use crate::config::AutobibConfig;
use crate::error::ConfigError;
use crate::filename::{filename_similarity, FilenameParser};
use crate::record::Record;
use crate::text::rules::TextRules;

/// Result of [`SyncEngine::sync`]
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Records kept, in input order
    pub records: Vec<Record>,
    /// Records whose file is gone or already claimed, pending confirmation
    pub removed: Vec<Record>,
    /// Files no record is associated with
    pub unresolved: Vec<String>,
}

/// A single planned rename, paths relative to the folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// All renames of a folder, computed before any is executed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenamePlan {
    pub renames: Vec<Rename>,
    /// Renames left out because the target name is taken
    pub conflicts: Vec<Rename>,
}

impl RenamePlan {
    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    /// Dry-run listing, one `old -> new` line per rename
    pub fn describe(&self) -> String {
        self.renames
            .iter()
            .map(|r| format!("{} -> {}\n", r.from, r.to))
            .collect()
    }

    /// Point records at their renamed files
    pub fn apply_to(&self, records: &mut [Record]) {
        let moves: BTreeMap<&str, &str> = self
            .renames
            .iter()
            .map(|r| (r.from.as_str(), r.to.as_str()))
            .collect();
        for record in records {
            if let Some(to) = record.file_path.as_deref().and_then(|p| moves.get(p)) {
                record.file_path = Some(to.to_string());
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncEngine {
    filenames: FilenameParser,
    similarity_threshold: f64,
}

impl SyncEngine {
    pub fn new(config: &AutobibConfig) -> Result<Self, ConfigError> {
        let rules = TextRules::new(&config.text)?;
        Ok(Self {
            filenames: FilenameParser::new(&config.filenames, rules)?,
            similarity_threshold: config.matching.file_similarity_threshold,
        })
    }

    pub fn sync(&self, records: Vec<Record>, files: &BTreeSet<String>) -> SyncOutcome {
        let mut claimed: HashSet<String> = HashSet::new();
        let mut kept = Vec::new();
        let mut removed = Vec::new();

        for mut record in records {
            match record.file_path.clone() {
                Some(path) if files.contains(&path) && !claimed.contains(&path) => {
                    claimed.insert(path);
                    kept.push(record);
                }
                Some(path) if record.is_manual() => {
                    debug!("Keeping manual record '{}' without {}", record.identity(), path);
                    record.file_path = None;
                    kept.push(record);
                }
                Some(path) => {
                    debug!("'{}' lost its file {}", record.identity(), path);
                    removed.push(record);
                }
                None => kept.push(record),
            }
        }

        // Re-link records without a file to the closest unclaimed file name
        for record in kept.iter_mut().filter(|r| r.file_path.is_none()) {
            let expected = self.filenames.gen_filename(record);
            let best = files
                .iter()
                .filter(|f| !claimed.contains(f.as_str()))
                .map(|f| (f, filename_similarity(&expected, f)))
                .filter(|(_, score)| *score >= self.similarity_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(a.0)));
            if let Some((file, score)) = best {
                debug!("Re-linking '{}' to {} ({:.2})", record.identity(), file, score);
                claimed.insert(file.clone());
                record.file_path = Some(file.clone());
            }
        }

        let unresolved = files
            .iter()
            .filter(|f| !claimed.contains(f.as_str()))
            .cloned()
            .collect();

        SyncOutcome {
            records: kept,
            removed,
            unresolved,
        }
    }

    /// Compute the rename that gives every linked file its generated name.
    ///
    /// A rename whose target already exists, or is the target of an earlier
    /// rename, is reported as a conflict and left out.
    pub fn plan_renames(&self, records: &[Record], files: &BTreeSet<String>) -> RenamePlan {
        let mut plan = RenamePlan::default();
        let mut targets: HashSet<String> = HashSet::new();

        for record in records {
            let Some(from) = record.file_path.as_deref() else {
                continue;
            };
            let name = self.filenames.gen_filename(record);
            let to = match Path::new(from).parent().and_then(|p| p.to_str()) {
                Some(dir) if !dir.is_empty() => format!("{}/{}", dir, name),
                _ => name,
            };
            if to == from {
                continue;
            }

            let rename = Rename {
                from: from.to_string(),
                to,
            };
            if files.contains(&rename.to) || targets.contains(&rename.to) {
                warn!("Not renaming {}: {} already exists", rename.from, rename.to);
                plan.conflicts.push(rename);
                continue;
            }
            targets.insert(rename.to.clone());
            plan.renames.push(rename);
        }
        plan
    }
}
