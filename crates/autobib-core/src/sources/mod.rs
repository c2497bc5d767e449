//! Metadata backends queried for files without a record

pub mod crossref;
pub mod scholar;

pub use crossref::CrossrefBackend;
pub use scholar::ScholarBackend;

use crate::error::LookupError;
use crate::record::{Identity, Record};

/// A record proposed by a backend for an identity
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub record: Record,
    /// Backend relevance score, when the backend provides one
    pub score: Option<f64>,
}

/// A metadata backend
pub trait Lookup {
    fn name(&self) -> &str;

    /// Candidates for `identity`, best first. An empty list means no match.
    fn lookup(&self, identity: &Identity) -> Result<Vec<Candidate>, LookupError>;

    /// Minimum score for a candidate to be accepted; `None` accepts any
    fn accept_threshold(&self) -> Option<f64> {
        None
    }
}
