//! On-disk state of a folder
//!
//! Each processed folder holds its PDFs plus `.queried.bib`, `.manual.bib`
//! and `biblio.bib` (names configurable). Bib files are read once into
//! records and written back whole, through a temporary file and a rename.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use autobib_bibtex::{format_entries, parse};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::FilesConfig;
use crate::error::{AutobibError, Result};
use crate::reconcile::FolderState;
use crate::record::{Record, Source, CONFIDENCE_FIELD};

/// Paths of the files autobib uses in one folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPaths {
    pub dir: PathBuf,
    pub queried: PathBuf,
    pub manual: PathBuf,
    pub output: PathBuf,
    pub skip_marker: PathBuf,
    pub skip_list: PathBuf,
    pub rejected: PathBuf,
}

impl FolderPaths {
    pub fn new(dir: &Path, files: &FilesConfig) -> Self {
        Self {
            dir: dir.to_path_buf(),
            queried: dir.join(&files.queried),
            manual: dir.join(&files.manual),
            output: dir.join(&files.output),
            skip_marker: dir.join(&files.skip_marker),
            skip_list: dir.join(&files.skip_list),
            rejected: dir.join(&files.rejected),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip_marker.exists()
    }
}

/// Read a bib file into records of the given source.
///
/// A missing file reads as empty. Entries that fail to parse are logged and
/// skipped.
pub fn read_records(path: &Path, source: Source) -> Result<Vec<Record>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AutobibError::io(path, e)),
    };

    let result = parse(&text);
    for error in &result.errors {
        warn!("Skipping malformed entry in {}: {}", path.display(), error);
    }
    Ok(result
        .entries
        .iter()
        .map(|entry| Record::from_entry(entry, source))
        .collect())
}

/// Serialize records. A backend confidence is kept as a pseudo-field so the
/// next run can still weigh the record against fresh candidates.
pub fn serialize_records(records: &[Record]) -> String {
    let entries: Vec<_> = records
        .iter()
        .map(|record| {
            let mut entry = record.to_entry();
            if let Some(confidence) = record.confidence {
                entry.set_field(CONFIDENCE_FIELD, confidence.to_string());
            }
            entry
        })
        .collect();
    format_entries(&entries)
}

/// Serialize and write records, see [`write_with_backup`].
///
/// Entries of the current file that could not be parsed were never read
/// into records; they are appended verbatim so a rewrite does not lose them.
pub fn write_records(path: &Path, records: &[Record], backup: bool) -> Result<bool> {
    let mut content = serialize_records(records);
    let unreadable = unreadable_entries(path)?;
    if !unreadable.is_empty() {
        warn!(
            "Keeping {} unreadable entries of {} as they are",
            unreadable.len(),
            path.display()
        );
    }
    for text in unreadable {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&text);
        content.push('\n');
    }
    write_with_backup(path, &content, backup)
}

/// Source text of the entries of `path` the parser rejects
fn unreadable_entries(path: &Path) -> Result<Vec<String>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AutobibError::io(path, e)),
    };
    Ok(parse(&text)
        .errors
        .into_iter()
        .map(|e| e.text)
        .filter(|t| !t.is_empty())
        .collect())
}

/// Replace a file's content.
///
/// Nothing happens when the content is unchanged. With `backup`, the
/// previous version is moved to the first free name among `name.bak`,
/// `name.bak.1`, ... unless an identical backup already exists. The new
/// content is written to a temporary file in the same directory and renamed
/// over the target. Returns whether the file was written.
pub fn write_with_backup(path: &Path, content: &str, backup: bool) -> Result<bool> {
    let previous = match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(AutobibError::io(path, e)),
    };
    if previous.as_deref() == Some(content.as_bytes()) {
        debug!("{} is up to date", path.display());
        return Ok(false);
    }

    if let Some(previous) = previous.as_deref().filter(|_| backup) {
        make_backup(path, previous)?;
    }

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| AutobibError::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| AutobibError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| AutobibError::io(path, e.error))?;
    info!("Wrote {}", path.display());
    Ok(true)
}

fn make_backup(path: &Path, content: &[u8]) -> Result<()> {
    for candidate in backup_names(path) {
        match fs::read(&candidate) {
            Ok(existing) if existing == content => {
                debug!("Identical backup {} already exists", candidate.display());
                return Ok(());
            }
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::rename(path, &candidate).map_err(|e| AutobibError::io(&candidate, e))?;
                info!("Backed up {} to {}", path.display(), candidate.display());
                return Ok(());
            }
            Err(e) => return Err(AutobibError::io(&candidate, e)),
        }
    }
    Ok(())
}

/// `name.bak`, `name.bak.1`, `name.bak.2`, ...
fn backup_names(path: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    (0..).map(move |n| {
        let mut name = path.as_os_str().to_owned();
        if n == 0 {
            name.push(".bak");
        } else {
            name.push(format!(".bak.{}", n));
        }
        PathBuf::from(name)
    })
}

/// Whether a file name looks like one of our backups
pub fn is_backup(name: &str) -> bool {
    if name.ends_with(".bak") {
        return true;
    }
    match name.rsplit_once(".bak.") {
        Some((_, n)) => !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Copy a file aside before it is renamed
pub fn backup_copy(path: &Path) -> Result<PathBuf> {
    let content = fs::read(path).map_err(|e| AutobibError::io(path, e))?;
    for candidate in backup_names(path) {
        if !candidate.exists() {
            fs::write(&candidate, &content).map_err(|e| AutobibError::io(&candidate, e))?;
            return Ok(candidate);
        }
    }
    Err(AutobibError::InvalidOperation(format!(
        "no free backup name for {}",
        path.display()
    )))
}

/// PDF file names directly inside `dir`, sorted
pub fn list_pdfs(dir: &Path) -> Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    for entry in fs::read_dir(dir).map_err(|e| AutobibError::io(dir, e))? {
        let entry = entry.map_err(|e| AutobibError::io(dir, e))?;
        let path = entry.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.insert(name.to_string());
            }
        }
    }
    Ok(files)
}

/// Load the three record sources and the PDF listing of a folder
pub fn load_folder(paths: &FolderPaths) -> Result<FolderState> {
    Ok(FolderState {
        queried: read_records(&paths.queried, Source::Queried)?,
        manual: read_records(&paths.manual, Source::Manual)?,
        existing: read_records(&paths.output, Source::Existing)?,
        files: list_pdfs(&paths.dir)?,
    })
}

/// One file name per line; blank lines ignored, missing file reads as empty
pub fn read_list(path: &Path) -> Result<BTreeSet<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(AutobibError::io(path, e)),
    }
}

/// Folders under `root` (itself included), depth-first in lexicographic
/// order. A folder holding the skip marker is left out with its whole subtree.
pub fn walk_folders(root: &Path, files: &FilesConfig) -> Vec<PathBuf> {
    let marker = files.skip_marker.as_str();
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.path().join(marker).exists()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

/// Backup files under `root`, sorted, skipped subtrees left out
pub fn find_backups(root: &Path, files: &FilesConfig) -> Vec<PathBuf> {
    let marker = files.skip_marker.as_str();
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.path().join(marker).exists()))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(is_backup))
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(source: Source) -> Record {
        let fields: BTreeMap<String, String> = [("author", "Knuth"), ("title", "The Art")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut record = Record::new("book", fields, source);
        record.key = Some("Knuth::TheArt".to_string());
        record
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = read_records(&dir.path().join("nope.bib"), Source::Manual).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_confidence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".queried.bib");
        let mut queried = record(Source::Queried);
        queried.confidence = Some(3.5);
        write_records(&path, &[queried], false).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("confidence = {3.5}"));
        let read = read_records(&path, Source::Queried).unwrap();
        assert_eq!(read[0].confidence, Some(3.5));

        let existing = serialize_records(&[record(Source::Existing)]);
        assert!(!existing.contains("confidence"));
    }

    #[test]
    fn test_write_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("biblio.bib");

        assert!(write_with_backup(&path, "one", true).unwrap());
        assert!(!write_with_backup(&path, "one", true).unwrap());
        assert!(write_with_backup(&path, "two", true).unwrap());
        assert!(write_with_backup(&path, "three", true).unwrap());

        assert_eq!(fs::read_to_string(&path).unwrap(), "three");
        assert_eq!(fs::read_to_string(dir.path().join("biblio.bib.bak")).unwrap(), "one");
        assert_eq!(fs::read_to_string(dir.path().join("biblio.bib.bak.1")).unwrap(), "two");
    }

    #[test]
    fn test_identical_backup_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("biblio.bib");
        fs::write(&path, "same").unwrap();
        fs::write(dir.path().join("biblio.bib.bak"), "same").unwrap();

        write_with_backup(&path, "new", true).unwrap();
        assert!(!dir.path().join("biblio.bib.bak.1").exists());
    }

    #[test]
    fn test_is_backup() {
        assert!(is_backup("biblio.bib.bak"));
        assert!(is_backup("biblio.bib.bak.12"));
        assert!(!is_backup("biblio.bib"));
        assert!(!is_backup("notes.bak.txt"));
    }

    #[test]
    fn test_walk_folders_skips_marked_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["b", "a", "a/inner", "skip", "skip/child"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("skip/.nobib"), "").unwrap();

        let folders: Vec<PathBuf> = walk_folders(root, &FilesConfig::default())
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            folders,
            vec![
                PathBuf::from(""),
                PathBuf::from("a"),
                PathBuf::from("a/inner"),
                PathBuf::from("b"),
            ]
        );
    }

    #[test]
    fn test_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".skip.txt");
        assert!(read_list(&path).unwrap().is_empty());

        fs::write(&path, "b.pdf\n\n  a.pdf \n").unwrap();
        let list = read_list(&path).unwrap();
        assert_eq!(list.into_iter().collect::<Vec<_>>(), vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_find_backups() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join(".nobib.bak"), "").unwrap();
        fs::write(root.join("a/biblio.bib.bak.2"), "").unwrap();
        fs::write(root.join("a/biblio.bib"), "").unwrap();
        fs::write(root.join("skip/.nobib"), "").unwrap();
        fs::write(root.join("skip/biblio.bib.bak"), "").unwrap();

        let found: Vec<PathBuf> = find_backups(root, &FilesConfig::default())
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            found,
            vec![PathBuf::from(".nobib.bak"), PathBuf::from("a/biblio.bib.bak.2")]
        );
    }

    #[test]
    fn test_rewrite_keeps_unreadable_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".queried.bib");
        let broken = "@article{Broken, title = {never closed";
        fs::write(
            &path,
            format!("@book{{Knuth::TheArt,\n\tauthor = {{Knuth}},\n\ttitle = {{The Art}}\n}}\n\n{}\n", broken),
        )
        .unwrap();

        let mut records = read_records(&path, Source::Queried).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!write_records(&path, &records, false).unwrap());

        records[0].set_field("note", "checked");
        assert!(write_records(&path, &records, false).unwrap());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("note = {checked}"));
        assert!(text.contains(broken));
        assert!(!write_records(&path, &records, false).unwrap());

        write_records(&path, &[], false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{}\n", broken));
    }
}
