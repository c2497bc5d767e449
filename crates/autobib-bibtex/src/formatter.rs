//! BibTeX formatting module
//!
//! Converts BibTeXEntry structures back to BibTeX text. Output is fully
//! determined by the entries passed in, so formatting the same entries twice
//! yields byte-identical text.

use super::entry::BibTeXEntry;

const INDENT: &str = "\t";

/// Format a single BibTeX entry
pub fn format_entry(entry: &BibTeXEntry) -> String {
    let mut result = String::new();

    result.push('@');
    result.push_str(entry.entry_type.as_str());
    result.push('{');
    result.push_str(&entry.cite_key);
    result.push_str(",\n");

    let last = entry.fields.len().saturating_sub(1);
    for (i, field) in entry.fields.iter().enumerate() {
        result.push_str(INDENT);
        result.push_str(&field.key);
        result.push_str(" = ");
        result.push_str(&format_field_value(&field.value));
        if i != last {
            result.push(',');
        }
        result.push('\n');
    }

    result.push('}');
    result
}

/// Format entries separated by blank lines, ending with a newline.
/// An empty slice yields an empty string.
pub fn format_entries(entries: &[BibTeXEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut text = entries
        .iter()
        .map(format_entry)
        .collect::<Vec<_>>()
        .join("\n\n");
    text.push('\n');
    text
}

/// Format a field value, choosing appropriate delimiters
fn format_field_value(value: &str) -> String {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        return value.to_string();
    }

    // Braces preserve LaTeX commands and case protection
    let mut result = String::with_capacity(value.len() + 2);
    result.push('{');
    result.push_str(value);
    result.push('}');
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::BibTeXEntryType;
    use crate::parser::parse;

    #[test]
    fn test_format_simple_entry() {
        let mut entry = BibTeXEntry::new("Knuth:1968:TheArt", BibTeXEntryType::Book);
        entry.set_field("author", "Knuth, Donald");
        entry.set_field("title", "The Art");
        entry.set_field("year", "1968");

        assert_eq!(
            format_entry(&entry),
            "@book{Knuth:1968:TheArt,\n\tauthor = {Knuth, Donald},\n\ttitle = {The Art},\n\tyear = 1968\n}"
        );
    }

    #[test]
    fn test_empty_value_is_braced() {
        let mut entry = BibTeXEntry::new("K", BibTeXEntryType::Misc);
        entry.set_field("note", "");
        assert!(format_entry(&entry).contains("note = {}"));
    }

    #[test]
    fn test_format_then_parse_preserves_fields() {
        let mut entry = BibTeXEntry::new("Doe:2020:On", BibTeXEntryType::Other("patent".into()));
        entry.set_field("title", "On {LaTeX} and $x^2$");
        entry.set_field("file", ":a\\:b.pdf:PDF");

        let text = format_entries(&[entry.clone()]);
        let parsed = parse(&text);
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].fields, entry.fields);
        assert_eq!(parsed.entries[0].entry_type, entry.entry_type);
    }

    #[test]
    fn test_format_entries_empty() {
        assert_eq!(format_entries(&[]), "");
    }
}
