//! Text normalization shared by matching, keys and formatting

pub mod normalization;
pub mod rules;

pub use rules::TextRules;
