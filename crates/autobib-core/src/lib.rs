//! autobib-core: bibliography reconciliation for folders of PDFs
//!
//! This library provides:
//! - Records and identities built from bibtex entries and file names
//! - Identity matching, citation keys and text normalization
//! - Per-folder reconciliation of queried, manual and existing records
//! - File synchronization and rename planning
//! - Tree-wide merging into a master bibliography
//! - Metadata lookups (Crossref, Google Scholar) for unmatched files
//! - The pipeline behind the `autobib` command

pub mod config;
pub mod error;
pub mod filename;
pub mod http;
pub mod keys;
pub mod matching;
pub mod pipeline;
pub mod query;
pub mod reconcile;
pub mod record;
pub mod sources;
pub mod store;
pub mod sync;
pub mod text;
pub mod tree;

pub use config::AutobibConfig;
pub use error::{AutobibError, ConfigError, FilenameError, LookupError, Result};
pub use filename::FilenameParser;
pub use keys::KeyGenerator;
pub use matching::IdentityMatcher;
pub use pipeline::{Always, Confirm, Declined, KeyRemap, Pipeline, PipelineOptions, RunReport};
pub use query::{QueryOrchestrator, QueryOutcome};
pub use reconcile::{Ambiguity, FolderState, ReconcileOptions, Reconciler, Reconciliation};
pub use record::{Identity, Record, Source};
pub use sources::{Candidate, Lookup};
pub use sync::{Rename, RenamePlan, SyncEngine, SyncOutcome};
pub use text::TextRules;
pub use tree::{FolderFailure, MasterCollection, TreeMerge, TreeMerger};
