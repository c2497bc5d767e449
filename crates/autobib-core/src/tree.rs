//! Tree-wide merge of folder bibliographies
//!
//! Every folder under the root (minus skipped subtrees) is reconciled on its
//! own, its file paths are made relative to the root, and its records are
//! folded into one master collection. The same work found in two folders
//! becomes one record, keyed against the global key set.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{AutobibConfig, FilesConfig};
use crate::error::{AutobibError, ConfigError};
use crate::reconcile::{merge_by_confidence, overlay, Ambiguity, ReconcileOptions, Reconciler};
use crate::record::Record;
use crate::store::{self, FolderPaths};
use crate::text::normalization::normalized_surname;

/// A folder that could not be processed
#[derive(Debug)]
pub struct FolderFailure {
    pub folder: PathBuf,
    pub error: AutobibError,
}

/// Deduplicated records of a whole tree, sorted by first author, year, title
#[derive(Debug, Clone, Default)]
pub struct MasterCollection {
    records: Vec<Record>,
}

impl MasterCollection {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.key.as_deref() == Some(key))
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Result of [`TreeMerger::merge_tree`]
#[derive(Debug, Default)]
pub struct TreeMerge {
    pub master: MasterCollection,
    pub ambiguities: Vec<Ambiguity>,
    pub failures: Vec<FolderFailure>,
}

#[derive(Debug, Clone)]
pub struct TreeMerger {
    reconciler: Reconciler,
    files: FilesConfig,
}

impl TreeMerger {
    pub fn new(config: &AutobibConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            reconciler: Reconciler::new(config)?,
            files: config.files.clone(),
        })
    }

    /// Reconcile every folder under `root` and merge the results.
    ///
    /// Nothing is written. A folder that fails to load is reported and
    /// left out; the others are merged regardless.
    pub fn merge_tree(&self, root: &Path) -> TreeMerge {
        let mut merge = TreeMerge::default();
        let mut records: Vec<Record> = Vec::new();

        for dir in store::walk_folders(root, &self.files) {
            let paths = FolderPaths::new(&dir, &self.files);
            let state = match store::load_folder(&paths) {
                Ok(state) => state,
                Err(error) => {
                    warn!("Skipping {} in merge: {}", dir.display(), error);
                    merge.failures.push(FolderFailure { folder: dir, error });
                    continue;
                }
            };

            let mut reconciliation = self.reconciler.reconcile(state, ReconcileOptions::default());
            let prefix = relative_prefix(root, &dir);
            for record in &mut reconciliation.records {
                if let Some(file) = record.file_path.take() {
                    record.file_path = Some(format!("{}{}", prefix, file));
                }
            }
            debug!(
                "Merging {} records from {}",
                reconciliation.records.len(),
                dir.display()
            );
            merge.ambiguities.extend(reconciliation.ambiguities);
            self.fold(&mut records, reconciliation.records, &mut merge.ambiguities);
        }

        records.sort_by(master_order);
        let mut keys = HashSet::new();
        self.reconciler.keys().assign_all(&mut records, &mut keys);

        info!("Master collection holds {} records", records.len());
        merge.master = MasterCollection { records };
        merge
    }

    /// Fold one folder's records into the running collection
    pub fn fold(&self, master: &mut Vec<Record>, incoming: Vec<Record>, ambiguities: &mut Vec<Ambiguity>) {
        let matcher = self.reconciler.matcher();
        for record in incoming {
            let found = matcher.find(record.identity(), master.iter().map(Record::identity));
            let Some(i) = found else {
                master.push(record);
                continue;
            };

            let current = &master[i];
            let mut merged = match (current.is_manual(), record.is_manual()) {
                (false, true) => overlay(current, &record),
                (true, false) => overlay(&record, current),
                _ => {
                    let (merged, ambiguity) = merge_by_confidence(current, &record);
                    ambiguities.extend(ambiguity);
                    merged
                }
            };
            merged.key = current.key.clone().or(merged.key);
            merged.file_path = current.file_path.clone().or(merged.file_path);
            debug!("'{}' appears in several folders", merged.identity());
            master[i] = merged;
        }
    }
}

/// `sub/dir/` for a folder below the root, empty for the root itself
fn relative_prefix(root: &Path, dir: &Path) -> String {
    let Ok(relative) = dir.strip_prefix(root) else {
        return String::new();
    };
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .map(|name| format!("{}/", name))
        .collect()
}

/// First-author surname, then year, then title
pub(crate) fn master_order(a: &Record, b: &Record) -> Ordering {
    let surname = |r: &Record| {
        r.identity()
            .first_author()
            .map(normalized_surname)
            .unwrap_or_default()
    };
    surname(a)
        .cmp(&surname(b))
        .then_with(|| a.year().cmp(&b.year()))
        .then_with(|| a.title().to_lowercase().cmp(&b.title().to_lowercase()))
}
