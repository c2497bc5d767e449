//! Lookups for files no record describes
//!
//! Backends are tried in priority order; each one only sees the files the
//! previous ones left unmatched. Accepted candidates are appended to the
//! queried store, files whose best candidate falls short of the backend's
//! threshold are listed in the rejected file.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info, warn};

use crate::config::AutobibConfig;
use crate::error::{ConfigError, FilenameError, LookupError, Result};
use crate::reconcile::{FolderState, Reconciler};
use crate::record::{Identity, Record, Source};
use crate::sources::{Candidate, CrossrefBackend, Lookup, ScholarBackend};
use crate::store::{self, FolderPaths};

/// Result of querying a set of files
#[derive(Debug, Default)]
pub struct QueryOutcome {
    /// Accepted records, already linked to their file
    pub accepted: Vec<Record>,
    /// Files with no acceptable candidate
    pub rejected: Vec<String>,
    /// Files left unresolved because a backend failed
    pub failed: Vec<(String, LookupError)>,
    /// Files whose names match no filename pattern
    pub malformed: Vec<String>,
}

pub struct QueryOrchestrator {
    reconciler: Reconciler,
    backends: Vec<Box<dyn Lookup>>,
}

impl QueryOrchestrator {
    /// Orchestrator over `backends`, highest priority first
    pub fn new(config: &AutobibConfig, backends: Vec<Box<dyn Lookup>>) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            reconciler: Reconciler::new(config)?,
            backends,
        })
    }

    /// Crossref first, then Scholar, as selected
    pub fn from_config(config: &AutobibConfig, crossref: bool, scholar: bool) -> Result<Self> {
        let mut backends: Vec<Box<dyn Lookup>> = Vec::new();
        if crossref {
            backends.push(Box::new(CrossrefBackend::new(&config.query)?));
        }
        if scholar {
            backends.push(Box::new(ScholarBackend::new(&config.query)?));
        }
        Ok(Self::new(config, backends)?)
    }

    /// Files of a folder that no record claims and that are not skipped.
    ///
    /// Manual records without a file are first associated with the file
    /// that matches them, so a manual entry is enough to avoid a query.
    pub fn unresolved_files(&self, state: &FolderState, skip: &BTreeSet<String>) -> Vec<String> {
        let mut manual = state.manual.clone();
        self.reconciler.associate_files(&mut manual, &state.files);

        let claimed: HashSet<&str> = state
            .queried
            .iter()
            .chain(&state.existing)
            .chain(&manual)
            .filter_map(|r| r.file_path.as_deref())
            .collect();

        state
            .files
            .iter()
            .filter(|f| !claimed.contains(f.as_str()))
            .filter(|f| {
                let skipped = skip.contains(f.as_str());
                if skipped {
                    debug!("Skipping {}", f);
                }
                !skipped
            })
            .cloned()
            .collect()
    }

    /// Query every backend for `files`, in order
    pub fn query_files(&self, files: &[String]) -> QueryOutcome {
        let mut outcome = QueryOutcome::default();
        let mut pending: Vec<(String, Identity)> = Vec::new();
        for file in files {
            match self.reconciler.filenames().parse_filename(file) {
                Ok(identity) => pending.push((file.clone(), identity)),
                Err(FilenameError::Ignored(_)) => debug!("Ignoring {}", file),
                Err(e) => {
                    warn!("{}", e);
                    outcome.malformed.push(file.clone());
                }
            }
        }

        let mut rejected: BTreeSet<String> = BTreeSet::new();
        let mut failed: Vec<(String, LookupError)> = Vec::new();

        for backend in &self.backends {
            let mut unmatched = Vec::new();
            let mut queue = pending.into_iter();
            while let Some((file, identity)) = queue.next() {
                info!("Querying {} for {}", backend.name(), file);
                match backend.lookup(&identity) {
                    Ok(candidates) => match self.pick(backend.as_ref(), &identity, candidates) {
                        Some(candidate) => {
                            let mut record = candidate.record;
                            record.source = Source::Queried;
                            record.confidence = record.confidence.or(candidate.score);
                            record.file_path = Some(file.clone());
                            info!("Matched {} to '{}'", file, record.identity());
                            rejected.remove(&file);
                            outcome.accepted.push(record);
                        }
                        None => {
                            rejected.insert(file.clone());
                            unmatched.push((file, identity));
                        }
                    },
                    Err(LookupError::RateLimited) => {
                        warn!("{} is rate limiting, skipping it for this run", backend.name());
                        failed.push((file.clone(), LookupError::RateLimited));
                        unmatched.push((file, identity));
                        unmatched.extend(queue.by_ref());
                        break;
                    }
                    Err(e) => {
                        warn!("{} lookup failed for {}: {}", backend.name(), file, e);
                        failed.push((file.clone(), e));
                        unmatched.push((file, identity));
                    }
                }
            }
            pending = unmatched;
        }

        let accepted: HashSet<&str> = outcome
            .accepted
            .iter()
            .filter_map(|r| r.file_path.as_deref())
            .collect();
        outcome.failed = failed
            .into_iter()
            .filter(|(file, _)| !accepted.contains(file.as_str()))
            .collect();
        outcome.rejected = rejected.into_iter().collect();
        outcome
    }

    /// Query the unresolved files of a folder and store the results
    pub fn query_folder(&self, paths: &FolderPaths, backup: bool) -> Result<QueryOutcome> {
        let state = store::load_folder(paths)?;
        let skip = store::read_list(&paths.skip_list)?;
        let files = self.unresolved_files(&state, &skip);
        if files.is_empty() {
            debug!("Nothing to query in {}", paths.dir.display());
            return Ok(QueryOutcome::default());
        }

        let mut outcome = self.query_files(&files);

        if !outcome.accepted.is_empty() {
            let mut keys: HashSet<String> =
                state.queried.iter().filter_map(|r| r.key.clone()).collect();
            for record in &mut outcome.accepted {
                let key = self.reconciler.keys().assign_key(record, &keys);
                keys.insert(key.clone());
                record.key = Some(key);
            }
            let mut queried = state.queried;
            queried.extend(outcome.accepted.iter().cloned());
            store::write_records(&paths.queried, &queried, backup)?;
        }
        if !outcome.rejected.is_empty() {
            let content: String = outcome
                .rejected
                .iter()
                .map(|f| format!("{}\n", f))
                .collect();
            store::write_with_backup(&paths.rejected, &content, backup)?;
        }
        Ok(outcome)
    }

    /// Best candidate by score, ties going to the closest title, then to the
    /// earliest; `None` when it falls below the backend's threshold
    fn pick(
        &self,
        backend: &dyn Lookup,
        identity: &Identity,
        candidates: Vec<Candidate>,
    ) -> Option<Candidate> {
        let matcher = self.reconciler.matcher();
        let similarity = |c: &Candidate| matcher.title_similarity(&identity.title, c.record.title());
        let best = candidates.into_iter().reduce(|best, candidate| {
            let (a, b) = (candidate.score.unwrap_or(0.0), best.score.unwrap_or(0.0));
            if a > b || (a == b && similarity(&candidate) > similarity(&best)) {
                candidate
            } else {
                best
            }
        })?;

        let score = best.score.unwrap_or(0.0);
        match backend.accept_threshold() {
            Some(threshold) if score < threshold => {
                info!(
                    "Rejecting '{}' from {}: score {:.2} below {:.2}",
                    best.record.identity(),
                    backend.name(),
                    score,
                    threshold
                );
                None
            }
            _ => Some(best),
        }
    }
}
