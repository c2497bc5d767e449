//! Processing modes over a folder tree
//!
//! Selected steps run per folder in a fixed order (query, format, sync,
//! rename), folders in lexicographic order. The tree merge and backup
//! cleanup run once afterwards. Renames, removals and deletions wait for a
//! [`Confirm`] answer; a refusal is reported, not treated as a failure.
//!
//! A single `.bib` file can be formatted in place, have the PDF names of its
//! entries extracted to a `.biblist`, or be compared with an older version
//! to map old keys to new ones.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::AutobibConfig;
use crate::error::{LookupError, Result};
use crate::filename::filename_similarity;
use crate::query::QueryOrchestrator;
use crate::reconcile::{FolderState, ReconcileOptions, Reconciler};
use crate::record::{Record, Source};
use crate::sources::Lookup;
use crate::store::{self, FolderPaths};
use crate::sync::{RenamePlan, SyncEngine};
use crate::text::TextRules;
use crate::tree::{master_order, FolderFailure, TreeMerger};

/// Output of the extract mode
pub const BIBLIST_NAME: &str = ".biblist";
/// Key remap script written by the compare mode and single-file formatting
pub const REMAP_SCRIPT_NAME: &str = ".remap.sed";

/// Interactive confirmation of destructive actions
pub trait Confirm {
    /// Show `prompt` and return whether the user agreed
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Answers every prompt the same way
#[derive(Debug, Clone, Copy)]
pub struct Always(pub bool);

impl Confirm for Always {
    fn confirm(&mut self, _prompt: &str) -> bool {
        self.0
    }
}

/// Which steps to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub backup: bool,
    pub crossref: bool,
    pub scholar: bool,
    pub format: bool,
    pub sync: bool,
    pub rename: bool,
    pub merge: bool,
    pub delete_backups: bool,
    /// Single file: list the PDF names of its entries
    pub extract: bool,
}

impl PipelineOptions {
    fn per_folder(&self) -> bool {
        self.crossref || self.scholar || self.format || self.sync || self.rename
    }
}

/// A destructive action the user refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declined {
    Removal { folder: PathBuf, records: usize },
    Rename { folder: PathBuf, files: usize },
    DeleteBackups { files: usize },
    Overwrite { file: PathBuf },
}

/// An old key and the key of the entry it became
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRemap {
    pub old: String,
    pub new: String,
    /// Similarity of the generated file names, 1.0 when they are equal
    pub similarity: f64,
}

/// What a run did
#[derive(Debug, Default)]
pub struct RunReport {
    pub folders: usize,
    /// Records added to queried stores
    pub queried: usize,
    /// Files with no acceptable lookup result
    pub rejected: Vec<PathBuf>,
    /// Files whose names match no filename pattern
    pub malformed: Vec<PathBuf>,
    /// Files left unresolved because a backend failed
    pub lookup_failures: Vec<(PathBuf, LookupError)>,
    pub written: Vec<PathBuf>,
    /// Records removed by sync
    pub removed: usize,
    /// Files no record describes after sync
    pub unresolved: Vec<PathBuf>,
    pub renamed: usize,
    pub deleted_backups: usize,
    /// Old and new key of every re-keyed entry of a single formatted file
    pub rekeyed: Vec<(String, String)>,
    /// Key mapping from an older version of a single file
    pub remapped: Vec<KeyRemap>,
    pub declined: Vec<Declined>,
    pub failures: Vec<FolderFailure>,
}

pub struct Pipeline {
    config: AutobibConfig,
    options: PipelineOptions,
    reconciler: Reconciler,
    sync: SyncEngine,
    rules: TextRules,
    query: Option<QueryOrchestrator>,
    compare: Option<PathBuf>,
    output_dir: PathBuf,
}

impl Pipeline {
    /// Pipeline using the network backends the options select
    pub fn new(config: AutobibConfig, options: PipelineOptions) -> Result<Self> {
        let query = if options.crossref || options.scholar {
            Some(QueryOrchestrator::from_config(
                &config,
                options.crossref,
                options.scholar,
            )?)
        } else {
            None
        };
        Self::build(config, options, query)
    }

    /// Pipeline querying the given backends instead
    pub fn with_lookups(
        config: AutobibConfig,
        options: PipelineOptions,
        backends: Vec<Box<dyn Lookup>>,
    ) -> Result<Self> {
        let query = if backends.is_empty() {
            None
        } else {
            Some(QueryOrchestrator::new(&config, backends)?)
        };
        Self::build(config, options, query)
    }

    fn build(
        config: AutobibConfig,
        options: PipelineOptions,
        query: Option<QueryOrchestrator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reconciler: Reconciler::new(&config)?,
            sync: SyncEngine::new(&config)?,
            rules: TextRules::new(&config.text)?,
            query,
            config,
            options,
            compare: None,
            output_dir: PathBuf::from("."),
        })
    }

    /// Compare a single input file with this older version of it
    pub fn compare_with(mut self, old: impl Into<PathBuf>) -> Self {
        self.compare = Some(old.into());
        self
    }

    /// Where `.biblist` and key remap scripts of the compare mode go
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Run the selected steps on a folder tree or a single `.bib` file
    pub fn run(&self, path: &Path, confirm: &mut dyn Confirm) -> Result<RunReport> {
        let mut report = RunReport::default();

        if path.is_file() {
            if self.options.format {
                self.format_file(path, &mut report)?;
            }
            if self.options.extract {
                self.extract_file(path, confirm, &mut report)?;
            }
            if let Some(old) = &self.compare {
                self.compare_keys(old, path, &mut report)?;
            }
            if !self.options.format && !self.options.extract && self.compare.is_none() {
                info!("Only format, extract and compare apply to a single file");
            }
            return Ok(report);
        }

        if self.options.per_folder() {
            // Keys are unique across the tree, not only within a folder
            let mut keys = HashSet::new();
            for dir in store::walk_folders(path, &self.config.files) {
                let paths = FolderPaths::new(&dir, &self.config.files);
                match store::list_pdfs(&dir) {
                    Ok(files) if files.is_empty() => continue,
                    Ok(_) => {}
                    Err(error) => {
                        report.failures.push(FolderFailure { folder: dir, error });
                        continue;
                    }
                }
                info!("Entering {}", dir.display());
                report.folders += 1;
                if let Err(error) = self.process_folder(&paths, confirm, &mut keys, &mut report) {
                    warn!("Failed to process {}: {}", dir.display(), error);
                    report.failures.push(FolderFailure { folder: dir, error });
                }
            }
        }

        if self.options.merge {
            self.merge(path, &mut report)?;
        }
        if self.options.delete_backups {
            self.delete_backups(path, confirm, &mut report);
        }
        Ok(report)
    }

    fn process_folder(
        &self,
        paths: &FolderPaths,
        confirm: &mut dyn Confirm,
        keys: &mut HashSet<String>,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(query) = &self.query {
            let outcome = query.query_folder(paths, self.options.backup)?;
            report.queried += outcome.accepted.len();
            report
                .rejected
                .extend(outcome.rejected.iter().map(|f| paths.dir.join(f)));
            report
                .malformed
                .extend(outcome.malformed.iter().map(|f| paths.dir.join(f)));
            report.lookup_failures.extend(
                outcome
                    .failed
                    .into_iter()
                    .map(|(f, error)| (paths.dir.join(f), error)),
            );
        }
        if self.options.format {
            self.format_folder(paths, keys, report)?;
        }
        if self.options.sync {
            self.sync_folder(paths, confirm, report)?;
        }
        if self.options.rename {
            self.rename_folder(paths, confirm, report)?;
        }
        Ok(())
    }

    /// Normalize, reconcile and write the folder's bibliography.
    ///
    /// Keys avoid `keys`, which collects the keys of every folder formatted
    /// so far in the run.
    pub fn format_folder(
        &self,
        paths: &FolderPaths,
        keys: &mut HashSet<String>,
        report: &mut RunReport,
    ) -> Result<()> {
        let state = store::load_folder(paths)?;
        let state = FolderState {
            queried: self.normalize(&state.queried),
            manual: self.normalize(&state.manual),
            ..state
        };
        let reconciliation =
            self.reconciler
                .reconcile_with_keys(state, ReconcileOptions::default(), keys);
        for record in &reconciliation.dropped {
            info!("Dropped '{}': its file is gone", record.identity());
        }
        if store::write_records(&paths.output, &reconciliation.records, self.options.backup)? {
            report.written.push(paths.output.clone());
        }
        Ok(())
    }

    fn normalize(&self, records: &[Record]) -> Vec<Record> {
        records
            .iter()
            .map(|r| r.map_fields(|name, value| self.rules.normalize_field(name, value)))
            .collect()
    }

    /// Re-link the output and queried stores with the folder's files.
    ///
    /// Records whose file is gone are removed only after confirmation.
    pub fn sync_folder(
        &self,
        paths: &FolderPaths,
        confirm: &mut dyn Confirm,
        report: &mut RunReport,
    ) -> Result<()> {
        let files = store::list_pdfs(&paths.dir)?;
        let mut stores = Vec::new();
        for (path, source) in [
            (&paths.output, Source::Existing),
            (&paths.queried, Source::Queried),
        ] {
            if !path.exists() {
                continue;
            }
            let records = store::read_records(path, source)?;
            let outcome = self.sync.sync(records.clone(), &files);
            if path == &paths.output {
                report
                    .unresolved
                    .extend(outcome.unresolved.iter().map(|f| paths.dir.join(f)));
            }
            stores.push((path, records, outcome));
        }

        let removed: Vec<String> = stores
            .iter()
            .flat_map(|(path, _, outcome)| {
                outcome.removed.iter().map(move |r| {
                    format!(
                        "{}: will remove '{}' ({})\n",
                        path.display(),
                        r.identity(),
                        r.file_path.as_deref().unwrap_or_default()
                    )
                })
            })
            .collect();
        let accepted = removed.is_empty()
            || confirm.confirm(&format!("{}Remove {} entries?", removed.concat(), removed.len()));
        if !accepted {
            report.declined.push(Declined::Removal {
                folder: paths.dir.clone(),
                records: removed.len(),
            });
        } else {
            report.removed += removed.len();
        }

        for (path, original, outcome) in stores {
            let records = if accepted {
                outcome.records
            } else {
                restore_removed(original, outcome.records, &outcome.removed)
            };
            if store::write_records(path, &records, self.options.backup)? {
                report.written.push(path.clone());
            }
        }
        Ok(())
    }

    /// Give files their generated names, after a dry run and one confirmation
    pub fn rename_folder(
        &self,
        paths: &FolderPaths,
        confirm: &mut dyn Confirm,
        report: &mut RunReport,
    ) -> Result<()> {
        let files = store::list_pdfs(&paths.dir)?;
        let mut output = store::read_records(&paths.output, Source::Existing)?;
        let plan = self.sync.plan_renames(&output, &files);
        if plan.is_empty() {
            debug!("Nothing to rename in {}", paths.dir.display());
            return Ok(());
        }

        let listing = plan.describe();
        for line in listing.lines() {
            info!("{}", line);
        }
        if !confirm.confirm(&format!("{}Rename {} files?", listing, plan.renames.len())) {
            report.declined.push(Declined::Rename {
                folder: paths.dir.clone(),
                files: plan.renames.len(),
            });
            return Ok(());
        }

        let mut done = RenamePlan::default();
        for rename in plan.renames {
            let from = paths.dir.join(&rename.from);
            let to = paths.dir.join(&rename.to);
            if to.exists() {
                warn!("Not renaming {}: {} appeared meanwhile", rename.from, rename.to);
                continue;
            }
            if self.options.backup {
                store::backup_copy(&from)?;
            }
            match fs::rename(&from, &to) {
                Ok(()) => done.renames.push(rename),
                Err(e) => warn!("Could not rename {}: {}", from.display(), e),
            }
        }
        report.renamed += done.renames.len();

        done.apply_to(&mut output);
        if store::write_records(&paths.output, &output, self.options.backup)? {
            report.written.push(paths.output.clone());
        }
        let mut queried = store::read_records(&paths.queried, Source::Queried)?;
        if !queried.is_empty() {
            done.apply_to(&mut queried);
            if store::write_records(&paths.queried, &queried, self.options.backup)? {
                report.written.push(paths.queried.clone());
            }
        }
        Ok(())
    }

    /// Merge the tree into the master file at `root`
    pub fn merge(&self, root: &Path, report: &mut RunReport) -> Result<()> {
        let merger = TreeMerger::new(&self.config)?;
        let merge = merger.merge_tree(root);
        report.failures.extend(merge.failures);
        let path = root.join(&self.config.files.master);
        if store::write_records(&path, merge.master.records(), self.options.backup)? {
            report.written.push(path);
        }
        Ok(())
    }

    /// Delete backup files in the tree after confirmation
    pub fn delete_backups(&self, root: &Path, confirm: &mut dyn Confirm, report: &mut RunReport) {
        let backups = store::find_backups(root, &self.config.files);
        if backups.is_empty() {
            info!("No backups to delete");
            return;
        }
        let listing: String = backups
            .iter()
            .map(|p| format!("will remove '{}'\n", p.display()))
            .collect();
        if !confirm.confirm(&format!("{}Delete {} backups?", listing, backups.len())) {
            report.declined.push(Declined::DeleteBackups {
                files: backups.len(),
            });
            return;
        }
        for path in backups {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Deleted {}", path.display());
                    report.deleted_backups += 1;
                }
                Err(e) => warn!("Could not delete {}: {}", path.display(), e),
            }
        }
    }

    /// Normalize, sort and re-key a single bibliography in place
    pub fn format_file(&self, path: &Path, report: &mut RunReport) -> Result<()> {
        let records = store::read_records(path, Source::Existing)?;
        let mut records = self.normalize(&records);
        records.sort_by(master_order);

        let previous: Vec<Option<String>> = records.iter().map(|r| r.key.clone()).collect();
        self.reconciler
            .keys()
            .assign_all(&mut records, &mut HashSet::new());
        let mut rekeyed = Vec::new();
        for (old, record) in previous.into_iter().zip(&records) {
            if let (Some(old), Some(new)) = (old, record.key.as_ref()) {
                if &old != new {
                    info!("{} -> {}", old, new);
                    rekeyed.push((old, new.clone()));
                }
            }
        }

        if store::write_records(path, &records, self.options.backup)? {
            report.written.push(path.to_path_buf());
        }
        if !rekeyed.is_empty() {
            let dir = path.parent().unwrap_or(Path::new("."));
            self.write_remap_script(dir, &rekeyed, report)?;
        }
        report.rekeyed.extend(rekeyed);
        Ok(())
    }

    /// Write the sorted generated PDF names of a file's entries to
    /// `.biblist` in the output directory
    pub fn extract_file(
        &self,
        path: &Path,
        confirm: &mut dyn Confirm,
        report: &mut RunReport,
    ) -> Result<()> {
        let records = store::read_records(path, Source::Existing)?;
        let mut names: Vec<String> = records
            .iter()
            .map(|r| self.reconciler.filenames().gen_filename(r))
            .collect();
        names.sort();

        let target = self.output_dir.join(BIBLIST_NAME);
        if target.exists() && !confirm.confirm(&format!("Overwrite {}?", target.display())) {
            report.declined.push(Declined::Overwrite { file: target });
            return Ok(());
        }
        let content: String = names.iter().map(|n| format!("{}\n", n)).collect();
        if store::write_with_backup(&target, &content, self.options.backup)? {
            report.written.push(target);
        }
        Ok(())
    }

    /// Map the keys of `old` to those of `new` and write a remap script
    /// to the output directory
    pub fn compare_keys(&self, old: &Path, new: &Path, report: &mut RunReport) -> Result<()> {
        let old_records = store::read_records(old, Source::Existing)?;
        let new_records = store::read_records(new, Source::Existing)?;
        let remaps = self.remap_keys(&old_records, &new_records);

        let changed: Vec<(String, String)> = remaps
            .iter()
            .filter(|r| r.old != r.new)
            .map(|r| (r.old.clone(), r.new.clone()))
            .collect();
        if !changed.is_empty() {
            self.write_remap_script(&self.output_dir, &changed, report)?;
        }
        report.remapped.extend(remaps);
        Ok(())
    }

    /// Greedily pair old and new entries by their generated file names.
    ///
    /// Equal names pair first. Every new entry left is then paired with the
    /// most similar old entry left; pairs below the file similarity threshold
    /// are kept but logged as uncertain.
    pub fn remap_keys(&self, old: &[Record], new: &[Record]) -> Vec<KeyRemap> {
        let named = |records: &[Record]| -> Vec<(String, String)> {
            records
                .iter()
                .filter_map(|r| Some((self.reconciler.filenames().gen_filename(r), r.key.clone()?)))
                .collect()
        };
        let mut new_left = named(new);
        let mut old_left = Vec::new();
        let mut remaps = Vec::new();

        for (name, key) in named(old) {
            match new_left.iter().position(|(n, _)| *n == name) {
                Some(i) => {
                    let (_, new_key) = new_left.remove(i);
                    remaps.push(KeyRemap {
                        old: key,
                        new: new_key,
                        similarity: 1.0,
                    });
                }
                None => old_left.push((name, key)),
            }
        }

        for (name, new_key) in new_left {
            let best = old_left
                .iter()
                .enumerate()
                .map(|(i, (old_name, _))| (i, filename_similarity(&name, old_name)))
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
            let Some((i, similarity)) = best else {
                debug!("{} has no previous entry", new_key);
                continue;
            };
            let (old_name, old_key) = old_left.remove(i);
            if similarity < self.config.matching.file_similarity_threshold {
                warn!(
                    "Uncertain remap {} -> {}: '{}' vs '{}'",
                    old_key, new_key, old_name, name
                );
            }
            remaps.push(KeyRemap {
                old: old_key,
                new: new_key,
                similarity,
            });
        }
        remaps
    }

    fn write_remap_script(
        &self,
        dir: &Path,
        pairs: &[(String, String)],
        report: &mut RunReport,
    ) -> Result<()> {
        let path = dir.join(REMAP_SCRIPT_NAME);
        if store::write_with_backup(&path, &remap_script(pairs), self.options.backup)? {
            info!("Key changes written to {}", path.display());
            report.written.push(path);
        }
        Ok(())
    }
}

/// sed script renaming cited keys inside `\cite{...}`-style lists.
///
/// Old keys are first replaced by placeholders so a chain `a -> b`,
/// `b -> c` does not turn `a` into `c`.
fn remap_script(pairs: &[(String, String)]) -> String {
    let mut script = format!("# sed -i -f {} *.tex\n", REMAP_SCRIPT_NAME);
    for (i, (old, _)) in pairs.iter().enumerate() {
        script.push_str(&format!(
            ":old{i}\ns/\\([{{,]\\s*\\){}\\(\\s*[,}}]\\)/\\1@@autobib{i}@@\\2/\nt old{i}\n",
            sed_escape(old)
        ));
    }
    for (i, (_, new)) in pairs.iter().enumerate() {
        script.push_str(&format!("s/@@autobib{i}@@/{}/g\n", sed_escape(new)));
    }
    script
}

fn sed_escape(key: &str) -> String {
    key.chars()
        .flat_map(|c| match c {
            '.' | '/' | '\\' | '&' | '[' | ']' | '*' | '^' | '$' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

/// Put records back in their original position after a declined removal
fn restore_removed(original: Vec<Record>, kept: Vec<Record>, removed: &[Record]) -> Vec<Record> {
    let mut kept = kept.into_iter();
    original
        .into_iter()
        .filter_map(|record| {
            if removed.contains(&record) {
                Some(record)
            } else {
                kept.next()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(title: &str, file: Option<&str>) -> Record {
        let fields: BTreeMap<String, String> = [("author", "Knuth"), ("title", title)]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut record = Record::new("book", fields, Source::Existing);
        record.file_path = file.map(str::to_string);
        record
    }

    #[test]
    fn test_restore_removed_keeps_order() {
        let a = record("A", Some("a.pdf"));
        let gone = record("Gone", Some("gone.pdf"));
        let c = record("C", None);
        let mut relinked = c.clone();
        relinked.file_path = Some("c.pdf".to_string());

        let restored = restore_removed(
            vec![a.clone(), gone.clone(), c],
            vec![a.clone(), relinked.clone()],
            &[gone.clone()],
        );
        assert_eq!(restored, vec![a, gone, relinked]);
    }

    fn keyed(key: &str, title: &str) -> Record {
        let mut record = record(title, None);
        record.key = Some(key.to_string());
        record
    }

    fn pipeline() -> Pipeline {
        Pipeline::with_lookups(AutobibConfig::default(), PipelineOptions::default(), Vec::new())
            .unwrap()
    }

    #[test]
    fn test_remap_keys_pairs_equal_names_first() {
        let old = vec![
            keyed("old:Sorting", "Sorting and searching"),
            keyed("old:Fundamental", "Fundamental algorithms"),
        ];
        let new = vec![
            keyed("Knuth::FundamentalAlgorithms", "Fundamental algorithms"),
            keyed("Knuth::SortingAndSearching", "Sorting and Searching"),
        ];
        let remaps = pipeline().remap_keys(&old, &new);
        assert_eq!(
            remaps,
            vec![
                KeyRemap {
                    old: "old:Sorting".to_string(),
                    new: "Knuth::SortingAndSearching".to_string(),
                    similarity: 1.0,
                },
                KeyRemap {
                    old: "old:Fundamental".to_string(),
                    new: "Knuth::FundamentalAlgorithms".to_string(),
                    similarity: 1.0,
                },
            ]
        );
    }

    #[test]
    fn test_remap_keys_falls_back_to_closest_name() {
        let old = vec![
            keyed("a", "Seminumerical algorithms"),
            keyed("b", "Sorting and searching"),
            keyed("gone", "Something else entirely"),
        ];
        let new = vec![keyed("c", "Sorting and searchin"), keyed("d", "Seminumerical algorithm")];
        let remaps = pipeline().remap_keys(&old, &new);

        let pairs: Vec<(&str, &str)> = remaps
            .iter()
            .map(|r| (r.old.as_str(), r.new.as_str()))
            .collect();
        assert_eq!(pairs, vec![("b", "c"), ("a", "d")]);
        assert!(remaps.iter().all(|r| r.similarity > 0.9 && r.similarity < 1.0));
    }

    #[test]
    fn test_remap_keys_without_old_entries() {
        let remaps = pipeline().remap_keys(&[], &[keyed("new", "Alone")]);
        assert!(remaps.is_empty());
    }

    #[test]
    fn test_remap_script() {
        let script = remap_script(&[
            ("a.1".to_string(), "b".to_string()),
            ("b".to_string(), "c".to_string()),
        ]);
        assert_eq!(
            script,
            "# sed -i -f .remap.sed *.tex\n\
             :old0\n\
             s/\\([{,]\\s*\\)a\\.1\\(\\s*[,}]\\)/\\1@@autobib0@@\\2/\n\
             t old0\n\
             :old1\n\
             s/\\([{,]\\s*\\)b\\(\\s*[,}]\\)/\\1@@autobib1@@\\2/\n\
             t old1\n\
             s/@@autobib0@@/b/g\n\
             s/@@autobib1@@/c/g\n"
        );
    }

    #[test]
    fn test_sed_escape() {
        assert_eq!(sed_escape("Knuth:1968:TheArt"), "Knuth:1968:TheArt");
        assert_eq!(sed_escape("a/b.c&d"), "a\\/b\\.c\\&d");
    }

    #[test]
    fn test_always_confirm() {
        assert!(Always(true).confirm("?"));
        assert!(!Always(false).confirm("?"));
    }
}
