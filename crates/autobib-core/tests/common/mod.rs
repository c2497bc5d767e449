//! On-disk folder fixtures

use std::fs;
use std::path::{Path, PathBuf};

use autobib_core::{AutobibConfig, Pipeline, PipelineOptions, Record, Source};

/// Create `dir` (and parents) under `root`, returning its path
pub fn folder(root: &Path, dir: &str) -> PathBuf {
    let path = root.join(dir);
    fs::create_dir_all(&path).unwrap();
    path
}

/// Write an empty PDF
pub fn touch_pdf(dir: &Path, name: &str) {
    fs::write(dir.join(name), b"%PDF-1.4\n").unwrap();
}

/// A bibtex entry with the given fields, in order
pub fn entry(kind: &str, key: &str, fields: &[(&str, &str)]) -> String {
    let body: String = fields
        .iter()
        .map(|(name, value)| format!("  {} = {{{}}},\n", name, value))
        .collect();
    format!("@{}{{{},\n{}}}\n\n", kind, key, body)
}

pub fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[allow(dead_code)]
pub fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

#[allow(dead_code)]
pub fn records(dir: &Path, name: &str) -> Vec<Record> {
    autobib_core::store::read_records(&dir.join(name), Source::Existing).unwrap()
}

pub fn pipeline(options: PipelineOptions) -> Pipeline {
    Pipeline::with_lookups(AutobibConfig::default(), options, Vec::new()).unwrap()
}
