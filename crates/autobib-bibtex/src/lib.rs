//! BibTeX parsing and formatting for autobib
//!
//! Features:
//! - Nom-based parser with per-entry error recovery
//! - `@string` expansion and `#` concatenation
//! - Deterministic formatter
//! - `file` field codec for linked PDFs

mod entry;
mod file_field;
mod formatter;
pub mod parser;

pub use entry::{BibTeXEntry, BibTeXEntryType, BibTeXField};
pub use file_field::{decode_file_field, encode_file_field};
pub use formatter::{format_entries, format_entry};
pub use parser::{parse, parse_entry, BibTeXParseError, BibTeXParseResult};
