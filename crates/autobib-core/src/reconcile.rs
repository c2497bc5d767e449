//! Folder reconciliation
//!
//! Combines the three record sources of one folder into a single list with
//! one record per work:
//!
//! 1. `existing` records (the previous output) seed the working set
//! 2. `manual` records overlay a matching existing or queried record field by
//!    field, or are inserted as they are
//! 3. remaining `queried` records merge into a match by confidence, the
//!    earlier side winning ties, or are inserted as new
//! 4. records pointing at files that are gone are dropped (never manual ones)
//! 5. records without a file are associated with unclaimed files
//! 6. keys are assigned in output order
//!
//! Output order is first-seen order: existing, then manual, then queried.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use tracing::{debug, warn};

use crate::config::AutobibConfig;
use crate::error::ConfigError;
use crate::filename::{filename_similarity, FilenameParser};
use crate::keys::KeyGenerator;
use crate::matching::IdentityMatcher;
use crate::record::{Identity, Record, Source};
use crate::text::rules::TextRules;

/// Working set of one directory
#[derive(Debug, Clone, Default)]
pub struct FolderState {
    pub queried: Vec<Record>,
    pub manual: Vec<Record>,
    pub existing: Vec<Record>,
    /// PDF file names present in the directory
    pub files: BTreeSet<String>,
}

/// Conflicts resolved by precedence rules, reported for the caller to warn about
#[derive(Debug, Clone, PartialEq)]
pub enum Ambiguity {
    /// Two manual records claim the same work; the later one wins field by field
    ManualOverrideConflict {
        base: Identity,
        overridden: Identity,
        kept: Identity,
    },
    /// Two sources disagree on field values for the same work
    FieldConflict {
        identity: Identity,
        fields: Vec<String>,
        winner: Source,
    },
    /// Two records point at the same file; the second lost its association
    SharedFile {
        file: String,
        kept: Identity,
        detached: Identity,
    },
}

impl fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ambiguity::ManualOverrideConflict {
                base,
                overridden,
                kept,
            } => write!(
                f,
                "manual overrides '{}' and '{}' both match '{}', the later one takes precedence",
                overridden, kept, base
            ),
            Ambiguity::FieldConflict {
                identity,
                fields,
                winner,
            } => write!(
                f,
                "conflicting values for {} in '{}', using the {} record",
                fields.join(", "),
                identity,
                winner
            ),
            Ambiguity::SharedFile {
                file,
                kept,
                detached,
            } => write!(
                f,
                "'{}' claimed by both '{}' and '{}', keeping the first",
                file, kept, detached
            ),
        }
    }
}

/// Result of reconciling one folder
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub records: Vec<Record>,
    pub ambiguities: Vec<Ambiguity>,
    /// Records removed because their file is gone
    pub dropped: Vec<Record>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Drop non-manual records whose file is not in the listing
    pub drop_missing_files: bool,
    /// Link records without a file to unclaimed files
    pub associate_files: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            drop_missing_files: true,
            associate_files: true,
        }
    }
}

/// One distinct work in the working set
#[derive(Debug)]
struct Slot {
    base: Option<Record>,
    manual: Option<Record>,
}

impl Slot {
    fn base(record: Record) -> Self {
        Self {
            base: Some(record),
            manual: None,
        }
    }

    fn identity(&self) -> Option<&Identity> {
        self.manual
            .as_ref()
            .or(self.base.as_ref())
            .map(Record::identity)
    }

    fn resolve(self) -> Option<Record> {
        match (self.base, self.manual) {
            (Some(base), Some(manual)) => Some(overlay(&base, &manual)),
            (base, manual) => manual.or(base),
        }
    }
}

/// Fold a record into the base of a slot by confidence
fn absorb(slot: &mut Slot, record: Record, ambiguities: &mut Vec<Ambiguity>) {
    match slot.base.take() {
        Some(base) => {
            let (merged, ambiguity) = merge_by_confidence(&base, &record);
            ambiguities.extend(ambiguity);
            slot.base = Some(merged);
        }
        None => slot.base = Some(record),
    }
}

/// Overlay `manual` onto `base`: manual fields win, absent ones are kept
pub fn overlay(base: &Record, manual: &Record) -> Record {
    let mut fields = base.fields().clone();
    fields.extend(
        manual
            .fields()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    let mut record = Record::new(manual.entry_type.clone(), fields, Source::Manual);
    record.key = manual.key.clone().or_else(|| base.key.clone());
    record.confidence = base.confidence;
    record.file_path = manual.file_path.clone().or_else(|| base.file_path.clone());
    record
}

/// Merge two records for the same work.
///
/// The side with the higher confidence (missing counts as zero) wins each
/// conflicting field; on a tie `earlier` wins. Fields present on one side
/// only are kept. The merged record keeps `earlier`'s source and key.
pub fn merge_by_confidence(earlier: &Record, later: &Record) -> (Record, Option<Ambiguity>) {
    let later_wins = later.confidence.unwrap_or(0.0) > earlier.confidence.unwrap_or(0.0);
    let (winner, loser) = if later_wins {
        (later, earlier)
    } else {
        (earlier, later)
    };

    let conflicts: Vec<String> = winner
        .fields()
        .iter()
        .filter(|(name, value)| loser.field(name).is_some_and(|other| other != value.as_str()))
        .map(|(name, _)| name.clone())
        .collect();

    let mut fields: BTreeMap<String, String> = loser.fields().clone();
    fields.extend(
        winner
            .fields()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );

    let mut merged = Record::new(winner.entry_type.clone(), fields, earlier.source);
    merged.key = earlier.key.clone().or_else(|| later.key.clone());
    merged.confidence = match (earlier.confidence, later.confidence) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    merged.file_path = winner
        .file_path
        .clone()
        .or_else(|| loser.file_path.clone());

    let ambiguity = (!conflicts.is_empty()).then(|| Ambiguity::FieldConflict {
        identity: merged.identity().clone(),
        fields: conflicts,
        winner: winner.source,
    });
    (merged, ambiguity)
}

/// Reconciles the record sources of a folder
#[derive(Debug, Clone)]
pub struct Reconciler {
    matcher: IdentityMatcher,
    keys: KeyGenerator,
    filenames: FilenameParser,
    file_similarity_threshold: f64,
}

impl Reconciler {
    pub fn new(config: &AutobibConfig) -> Result<Self, ConfigError> {
        let rules = TextRules::new(&config.text)?;
        Ok(Self {
            matcher: IdentityMatcher::new(&config.matching),
            keys: KeyGenerator::new(&config.keys),
            filenames: FilenameParser::new(&config.filenames, rules)?,
            file_similarity_threshold: config.matching.file_similarity_threshold,
        })
    }

    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    pub fn filenames(&self) -> &FilenameParser {
        &self.filenames
    }

    pub fn file_similarity_threshold(&self) -> f64 {
        self.file_similarity_threshold
    }

    pub fn reconcile(&self, state: FolderState, options: ReconcileOptions) -> Reconciliation {
        self.reconcile_with_keys(state, options, &mut HashSet::new())
    }

    /// Reconcile a folder whose keys must also avoid `used_keys`, the keys
    /// already handed out elsewhere in the same run. The keys assigned here
    /// are added to it.
    pub fn reconcile_with_keys(
        &self,
        state: FolderState,
        options: ReconcileOptions,
        used_keys: &mut HashSet<String>,
    ) -> Reconciliation {
        let FolderState {
            queried,
            manual,
            existing,
            files,
        } = state;
        let mut ambiguities = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();

        for record in existing {
            match self.find_slot(&slots, record.identity()) {
                Some(i) => absorb(&mut slots[i], record, &mut ambiguities),
                None => slots.push(Slot::base(record)),
            }
        }

        let mut consumed = vec![false; queried.len()];
        for record in manual {
            if let Some(i) = self.find_slot(&slots, record.identity()) {
                let slot = &mut slots[i];
                let combined = match slot.manual.take() {
                    Some(previous) => {
                        ambiguities.push(Ambiguity::ManualOverrideConflict {
                            base: slot
                                .base
                                .as_ref()
                                .unwrap_or(&previous)
                                .identity()
                                .clone(),
                            overridden: previous.identity().clone(),
                            kept: record.identity().clone(),
                        });
                        overlay(&previous, &record)
                    }
                    None => record,
                };
                slot.manual = Some(combined);
                continue;
            }

            let queried_match = (0..queried.len())
                .filter(|j| !consumed[*j])
                .find(|j| self.matcher.are_same(record.identity(), queried[*j].identity()));
            let base = queried_match.map(|j| {
                consumed[j] = true;
                queried[j].clone()
            });
            slots.push(Slot {
                base,
                manual: Some(record),
            });
        }

        for (j, record) in queried.into_iter().enumerate() {
            if consumed[j] {
                continue;
            }
            match self.find_slot(&slots, record.identity()) {
                Some(i) => absorb(&mut slots[i], record, &mut ambiguities),
                None => slots.push(Slot::base(record)),
            }
        }

        let mut records: Vec<Record> = slots.into_iter().filter_map(Slot::resolve).collect();

        let mut dropped = Vec::new();
        if options.drop_missing_files {
            let (kept, gone): (Vec<Record>, Vec<Record>) =
                records.into_iter().partition(|record| {
                    record.is_manual()
                        || record
                            .file_path
                            .as_ref()
                            .map_or(true, |path| files.contains(path))
                });
            for record in &gone {
                debug!(
                    "Dropping '{}': file {:?} is gone",
                    record.identity(),
                    record.file_path
                );
            }
            records = kept;
            dropped = gone;
        }

        ambiguities.extend(detach_shared_files(&mut records));

        if options.associate_files {
            self.associate_files(&mut records, &files);
        }

        self.keys.assign_all(&mut records, used_keys);

        for ambiguity in &ambiguities {
            warn!("{}", ambiguity);
        }

        Reconciliation {
            records,
            ambiguities,
            dropped,
        }
    }

    fn find_slot(&self, slots: &[Slot], identity: &Identity) -> Option<usize> {
        slots.iter().position(|slot| {
            slot.identity()
                .is_some_and(|other| self.matcher.are_same(identity, other))
        })
    }

    /// Link records without a file to files no record claims.
    ///
    /// A file whose name parses to a matching identity is linked first;
    /// otherwise the closest generated file name above the similarity
    /// threshold wins.
    pub fn associate_files(&self, records: &mut [Record], files: &BTreeSet<String>) {
        let claimed: HashSet<&str> = records
            .iter()
            .filter_map(|r| r.file_path.as_deref())
            .collect();
        let unclaimed: Vec<String> = files
            .iter()
            .filter(|f| !claimed.contains(f.as_str()))
            .cloned()
            .collect();

        for file in unclaimed {
            let by_identity = self.filenames.parse_filename(&file).ok().and_then(|identity| {
                records.iter().position(|r| {
                    r.file_path.is_none() && self.matcher.are_same(&identity, r.identity())
                })
            });

            let target = by_identity.or_else(|| {
                records
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.file_path.is_none())
                    .map(|(i, r)| (i, filename_similarity(&self.filenames.gen_filename(r), &file)))
                    .filter(|(_, score)| *score >= self.file_similarity_threshold)
                    .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
                    .map(|(i, _)| i)
            });

            if let Some(i) = target {
                debug!("Associating '{}' with {}", records[i].identity(), file);
                records[i].file_path = Some(file);
            }
        }
    }
}

/// Keep one record per file: the first claim wins unless a later one is manual
fn detach_shared_files(records: &mut [Record]) -> Vec<Ambiguity> {
    let mut owner: BTreeMap<String, usize> = BTreeMap::new();
    let mut ambiguities = Vec::new();

    for i in 0..records.len() {
        let Some(path) = records[i].file_path.clone() else {
            continue;
        };
        let Some(&first) = owner.get(&path) else {
            owner.insert(path, i);
            continue;
        };
        let (kept, detached) = if records[i].is_manual() && !records[first].is_manual() {
            owner.insert(path.clone(), i);
            (i, first)
        } else {
            (first, i)
        };
        records[detached].file_path = None;
        ambiguities.push(Ambiguity::SharedFile {
            file: path,
            kept: records[kept].identity().clone(),
            detached: records[detached].identity().clone(),
        });
    }
    ambiguities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: Source, pairs: &[(&str, &str)]) -> Record {
        let fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Record::new("article", fields, source)
    }

    fn knuth(source: Source) -> Record {
        record(
            source,
            &[("author", "Knuth"), ("title", "The Art"), ("year", "1968")],
        )
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(&AutobibConfig::default()).unwrap()
    }

    fn files(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_queried_record_with_file() {
        let mut queried = knuth(Source::Queried);
        queried.confidence = Some(0.8);
        queried.file_path = Some("paper.pdf".to_string());

        let result = reconciler().reconcile(
            FolderState {
                queried: vec![queried],
                files: files(&["paper.pdf"]),
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );

        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.key.as_deref(), Some("Knuth:1968:TheArt"));
        assert_eq!(record.file_path.as_deref(), Some("paper.pdf"));
    }

    #[test]
    fn test_manual_override_rekeys() {
        let mut queried = knuth(Source::Queried);
        queried.confidence = Some(0.8);
        queried.file_path = Some("paper.pdf".to_string());
        let manual = record(
            Source::Manual,
            &[("author", "Knuth"), ("title", "The Art"), ("year", "1969")],
        );

        let result = reconciler().reconcile(
            FolderState {
                queried: vec![queried],
                manual: vec![manual],
                files: files(&["paper.pdf"]),
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );

        assert_eq!(result.records.len(), 1);
        let record = &result.records[0];
        assert_eq!(record.year(), Some(1969));
        assert_eq!(record.key.as_deref(), Some("Knuth:1969:TheArt"));
        assert_eq!(record.file_path.as_deref(), Some("paper.pdf"));
        assert_eq!(record.source, Source::Manual);
    }

    #[test]
    fn test_higher_confidence_wins_conflicts() {
        let mut low = knuth(Source::Queried);
        low.confidence = Some(0.6);
        low.set_field("journal", "Low");
        low.set_field("volume", "1");
        let mut high = knuth(Source::Queried);
        high.confidence = Some(0.9);
        high.set_field("journal", "High");

        let result = reconciler().reconcile(
            FolderState {
                queried: vec![low, high],
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].field("journal"), Some("High"));
        assert_eq!(result.records[0].field("volume"), Some("1"));
        assert!(matches!(
            result.ambiguities.as_slice(),
            [Ambiguity::FieldConflict { winner: Source::Queried, .. }]
        ));
    }

    #[test]
    fn test_existing_wins_ties() {
        let mut existing = knuth(Source::Existing);
        existing.set_field("journal", "Kept");
        let mut queried = knuth(Source::Queried);
        queried.set_field("journal", "Ignored");

        let result = reconciler().reconcile(
            FolderState {
                existing: vec![existing],
                queried: vec![queried],
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );
        assert_eq!(result.records[0].field("journal"), Some("Kept"));
        assert_eq!(result.records[0].source, Source::Existing);
    }

    #[test]
    fn test_manual_conflict_last_write_wins() {
        let existing = knuth(Source::Existing);
        let mut first = knuth(Source::Manual);
        first.set_field("note", "first");
        first.set_field("publisher", "first");
        let mut second = knuth(Source::Manual);
        second.set_field("publisher", "second");

        let result = reconciler().reconcile(
            FolderState {
                existing: vec![existing],
                manual: vec![first, second],
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].field("publisher"), Some("second"));
        assert_eq!(result.records[0].field("note"), Some("first"));
        assert!(result
            .ambiguities
            .iter()
            .any(|a| matches!(a, Ambiguity::ManualOverrideConflict { .. })));
    }

    #[test]
    fn test_missing_files_dropped_except_manual() {
        let mut gone = knuth(Source::Existing);
        gone.file_path = Some("gone.pdf".to_string());
        let mut manual = record(Source::Manual, &[("author", "Doe"), ("title", "Kept")]);
        manual.file_path = Some("also-gone.pdf".to_string());

        let result = reconciler().reconcile(
            FolderState {
                existing: vec![gone],
                manual: vec![manual],
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].title(), "Kept");
        assert_eq!(result.dropped.len(), 1);
    }

    #[test]
    fn test_order_is_existing_manual_queried() {
        let existing = record(Source::Existing, &[("author", "A"), ("title", "First")]);
        let manual = record(Source::Manual, &[("author", "B"), ("title", "Second")]);
        let queried = record(Source::Queried, &[("author", "C"), ("title", "Third")]);

        let result = reconciler().reconcile(
            FolderState {
                queried: vec![queried],
                manual: vec![manual],
                existing: vec![existing],
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );
        let titles: Vec<&str> = result.records.iter().map(|r| r.title()).collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
    }

    #[test]
    fn test_files_associated_by_name() {
        let queried = record(
            Source::Queried,
            &[("author", "Knuth, Donald"), ("title", "The Art of Programming")],
        );
        let result = reconciler().reconcile(
            FolderState {
                queried: vec![queried],
                files: files(&["(Knuth) The Art of Programming.pdf"]),
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );
        assert_eq!(
            result.records[0].file_path.as_deref(),
            Some("(Knuth) The Art of Programming.pdf")
        );
    }

    #[test]
    fn test_shared_file_detached() {
        let mut a = record(Source::Queried, &[("author", "A"), ("title", "One")]);
        a.file_path = Some("x.pdf".to_string());
        let mut b = record(Source::Queried, &[("author", "B"), ("title", "Two")]);
        b.file_path = Some("x.pdf".to_string());

        let result = reconciler().reconcile(
            FolderState {
                queried: vec![a, b],
                files: files(&["x.pdf"]),
                ..FolderState::default()
            },
            ReconcileOptions {
                associate_files: false,
                ..ReconcileOptions::default()
            },
        );
        assert_eq!(result.records[0].file_path.as_deref(), Some("x.pdf"));
        assert_eq!(result.records[1].file_path, None);
        assert!(matches!(
            result.ambiguities.as_slice(),
            [Ambiguity::SharedFile { .. }]
        ));
    }

    #[test]
    fn test_manual_title_fix_rekeys() {
        let mut existing = record(
            Source::Existing,
            &[("author", "Knuth"), ("title", "The Arts of War"), ("year", "1968")],
        );
        existing.key = Some("Knuth:1968:TheArts".to_string());
        let manual = record(
            Source::Manual,
            &[("author", "Knuth"), ("title", "The Art of War"), ("year", "1968")],
        );

        let result = reconciler().reconcile(
            FolderState {
                existing: vec![existing],
                manual: vec![manual],
                ..FolderState::default()
            },
            ReconcileOptions::default(),
        );
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].key.as_deref(), Some("Knuth:1968:TheArt"));
    }

    #[test]
    fn test_keys_avoid_those_used_elsewhere() {
        let mut used: HashSet<String> = ["Knuth:1968:TheArt".to_string()].into_iter().collect();
        let result = reconciler().reconcile_with_keys(
            FolderState {
                queried: vec![knuth(Source::Queried)],
                ..FolderState::default()
            },
            ReconcileOptions::default(),
            &mut used,
        );
        assert_eq!(result.records[0].key.as_deref(), Some("Knuth:1968:TheArta"));
        assert!(used.contains("Knuth:1968:TheArta"));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let reconciler = reconciler();
        let mut queried = knuth(Source::Queried);
        queried.confidence = Some(0.8);
        queried.file_path = Some("paper.pdf".to_string());
        let mut manual = knuth(Source::Manual);
        manual.set_field("note", "mine");

        let state = FolderState {
            queried: vec![queried],
            manual: vec![manual],
            files: files(&["paper.pdf"]),
            ..FolderState::default()
        };
        let first = reconciler.reconcile(state.clone(), ReconcileOptions::default());

        let existing = first
            .records
            .iter()
            .map(|r| Record::from_entry(&r.to_entry(), Source::Existing))
            .collect();
        let second = reconciler.reconcile(
            FolderState {
                existing,
                ..state
            },
            ReconcileOptions::default(),
        );

        let entries =
            |r: &Reconciliation| -> Vec<_> { r.records.iter().map(Record::to_entry).collect() };
        assert_eq!(entries(&first), entries(&second));
    }
}
