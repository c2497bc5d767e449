//! BibTeX parser implementation using nom
//!
//! This parser handles standard BibTeX format including:
//! - @string definitions
//! - @preamble declarations
//! - @comment sections
//! - All standard entry types
//! - Braced and quoted field values
//! - String concatenation with #
//! - Nested braces in field values

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::map,
    IResult,
};
use std::collections::HashMap;

use super::entry::{BibTeXEntry, BibTeXEntryType};

/// An entry that could not be parsed. Parsing continues with the next `@`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct BibTeXParseError {
    pub line: u32,
    pub message: String,
    /// Source text that was skipped, from its `@` up to the next entry
    pub text: String,
}

/// Result of parsing a BibTeX file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibTeXParseResult {
    pub entries: Vec<BibTeXEntry>,
    pub preambles: Vec<String>,
    pub strings: HashMap<String, String>,
    pub errors: Vec<BibTeXParseError>,
}

/// Parse BibTeX text
///
/// Never fails as a whole: malformed entries are reported in
/// [`BibTeXParseResult::errors`] and skipped.
pub fn parse(input: &str) -> BibTeXParseResult {
    let mut result = BibTeXParseResult::default();
    let mut remaining = input;

    while !remaining.is_empty() {
        remaining = skip_whitespace_and_comments(remaining);
        if remaining.is_empty() {
            break;
        }

        if !remaining.starts_with('@') {
            // Free text between entries is a comment in BibTeX
            match remaining.find('@') {
                Some(pos) => {
                    remaining = &remaining[pos..];
                    continue;
                }
                None => break,
            }
        }

        let line = line_of(input, remaining);
        match parse_at_entry(remaining, &result.strings) {
            Ok((rest, AtEntry::Entry(mut entry))) => {
                entry.line = Some(line);
                result.entries.push(entry);
                remaining = rest;
            }
            Ok((rest, AtEntry::String(key, value))) => {
                result.strings.insert(key, value);
                remaining = rest;
            }
            Ok((rest, AtEntry::Preamble(text))) => {
                result.preambles.push(text);
                remaining = rest;
            }
            Ok((rest, AtEntry::Comment)) => remaining = rest,
            Err(_) => {
                let end = remaining[1..].find('@').map_or(remaining.len(), |pos| pos + 1);
                result.errors.push(BibTeXParseError {
                    line,
                    message: format!("failed to parse entry starting with `{}`", head(remaining)),
                    text: remaining[..end].trim_end().to_string(),
                });
                remaining = &remaining[end..];
            }
        }
    }

    result
}

/// Parse a single BibTeX entry
pub fn parse_entry(input: &str) -> Result<BibTeXEntry, BibTeXParseError> {
    let mut result = parse(input);
    if let Some(error) = result.errors.pop() {
        return Err(error);
    }
    result.entries.into_iter().next().ok_or(BibTeXParseError {
        line: 1,
        message: "no entry found".to_string(),
        text: String::new(),
    })
}

fn line_of(input: &str, remaining: &str) -> u32 {
    let offset = input.len() - remaining.len();
    1 + input[..offset].matches('\n').count() as u32
}

fn head(input: &str) -> String {
    input
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(40)
        .collect()
}

/// Result of parsing an @ entry
enum AtEntry {
    Entry(BibTeXEntry),
    String(String, String),
    Preamble(String),
    Comment,
}

/// Skip whitespace and `%` line comments
fn skip_whitespace_and_comments(input: &str) -> &str {
    let mut pos = 0;
    let bytes = input.as_bytes();

    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
        } else if pos + 1 < bytes.len() && bytes[pos] == b'%' {
            // Line comment
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
        } else {
            break;
        }
    }

    &input[pos..]
}

/// Parse an @ entry (entry, string, preamble, or comment)
fn parse_at_entry<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, AtEntry> {
    let (rest, _) = char('@')(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, entry_type) = take_while1(|c: char| c.is_ascii_alphanumeric())(rest)?;

    match entry_type.to_lowercase().as_str() {
        "string" => {
            let (rest, (key, value)) = parse_string_definition(rest, strings)?;
            Ok((rest, AtEntry::String(key, value)))
        }
        "preamble" => {
            let (rest, text) = parse_preamble(rest, strings)?;
            Ok((rest, AtEntry::Preamble(text)))
        }
        "comment" => {
            let (rest, _) = parse_comment_body(rest)?;
            Ok((rest, AtEntry::Comment))
        }
        _ => {
            let (rest, entry) = parse_entry_body(rest, entry_type, strings)?;
            Ok((rest, AtEntry::Entry(entry)))
        }
    }
}

/// Parse a @string definition
fn parse_string_definition<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, _) = char('{')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('}')(rest)?;

    Ok((rest, (key.to_string(), value)))
}

/// Parse a @preamble
fn parse_preamble<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, String> {
    let (rest, _) = multispace0(input)?;
    let (rest, _) = char('{')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('}')(rest)?;

    Ok((rest, value))
}

/// Parse a @comment body (skip everything in braces or to end of line)
fn parse_comment_body(input: &str) -> IResult<&str, ()> {
    let (rest, _) = multispace0(input)?;
    if rest.starts_with('{') {
        let (rest, _) = parse_braced_content(rest)?;
        Ok((rest, ()))
    } else {
        // Skip to end of line
        let pos = rest.find('\n').unwrap_or(rest.len());
        Ok((&rest[pos..], ()))
    }
}

/// Parse an entry body
fn parse_entry_body<'a>(
    input: &'a str,
    entry_type: &str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, BibTeXEntry> {
    let (rest, _) = multispace0(input)?;
    let (rest, _) = char('{')(rest)?;
    let (rest, _) = multispace0(rest)?;

    // Parse cite key
    let (rest, cite_key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || "_-:./".contains(c))(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char(',')(rest)?;

    // Parse fields
    let (rest, fields) = parse_fields(rest, strings)?;

    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('}')(rest)?;

    let mut entry = BibTeXEntry::new(cite_key, BibTeXEntryType::from_str(entry_type));
    for (key, value) in fields {
        entry.set_field(key, value);
    }

    Ok((rest, entry))
}

/// Parse fields within an entry
fn parse_fields<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, Vec<(String, String)>> {
    let mut fields = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;

        // Check for end of entry
        if rest.starts_with('}') {
            return Ok((rest, fields));
        }

        // Try to parse a field
        match parse_single_field(rest, strings) {
            Ok((rest, (key, value))) => {
                fields.push((key, value));
                remaining = rest;

                // Skip optional comma
                let (rest, _) = multispace0(remaining)?;
                remaining = rest.strip_prefix(',').unwrap_or(rest);
            }
            Err(_) => {
                // No more fields
                return Ok((remaining, fields));
            }
        }
    }
}

/// Parse a single field (key = value)
fn parse_single_field<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;

    Ok((rest, (key.to_string(), value)))
}

/// Parse a field value (braced, quoted, number, or string reference)
fn parse_field_value<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, String> {
    let mut result = String::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;

        let (rest, part) = alt((
            parse_braced_value,
            parse_quoted_value,
            map(take_while1(|c: char| c.is_ascii_digit()), |s: &str| {
                s.to_string()
            }),
            map(
                take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                |s: &str| {
                    // String reference
                    strings.get(s).cloned().unwrap_or_else(|| s.to_string())
                },
            ),
        ))(rest)?;

        result.push_str(&part);
        remaining = rest;

        // Check for concatenation
        let (rest, _) = multispace0(remaining)?;
        if let Some(stripped) = rest.strip_prefix('#') {
            remaining = stripped;
        } else {
            return Ok((rest, result));
        }
    }
}

/// Parse a braced value {content}
fn parse_braced_value(input: &str) -> IResult<&str, String> {
    let (rest, content) = parse_braced_content(input)?;
    // Remove outer braces
    let inner = &content[1..content.len() - 1];
    Ok((rest, inner.to_string()))
}

/// Parse braced content including nested braces
fn parse_braced_content(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('{') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let mut depth = 0;
    let mut pos = 0;
    let bytes = input.as_bytes();

    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[pos + 1..], &input[..pos + 1]));
                }
            }
            b'\\' => {
                // Skip escaped character
                pos += 1;
            }
            _ => {}
        }
        pos += 1;
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// Parse a quoted value "content"
fn parse_quoted_value(input: &str) -> IResult<&str, String> {
    if !input.starts_with('"') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let mut result = String::new();
    let mut brace_depth = 0;
    let mut chars = input.char_indices().skip(1);

    while let Some((pos, c)) = chars.next() {
        match c {
            '"' if brace_depth == 0 => {
                return Ok((&input[pos + 1..], result));
            }
            '{' => {
                brace_depth += 1;
                result.push(c);
            }
            '}' => {
                brace_depth -= 1;
                result.push(c);
            }
            '\\' => {
                result.push(c);
                if let Some((_, escaped)) = chars.next() {
                    result.push(escaped);
                }
            }
            _ => result.push(c),
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keyed_entry() {
        let input = r#"
@book{Knuth:1968:TheArt,
    author = {Knuth, Donald E.},
    title = {The Art of Computer Programming},
    year = 1968,
    file = {:paper.pdf:PDF},
}
"#;
        let result = parse(input);
        assert_eq!(result.entries.len(), 1);
        assert!(result.errors.is_empty());

        let entry = &result.entries[0];
        assert_eq!(entry.cite_key, "Knuth:1968:TheArt");
        assert_eq!(entry.entry_type, BibTeXEntryType::Book);
        assert_eq!(entry.author(), Some("Knuth, Donald E."));
        assert_eq!(entry.year(), Some("1968"));
        assert_eq!(entry.get_field("file"), Some(":paper.pdf:PDF"));
        assert_eq!(entry.line, Some(2));
    }

    #[test]
    fn test_parse_quoted_values_keep_utf8() {
        let input = r#"@article{Test, author = "Müller, Jürgen", title = "Testing \"Quotes\""}"#;
        let result = parse(input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].author(), Some("Müller, Jürgen"));
    }

    #[test]
    fn test_parse_nested_braces() {
        let input = "@article{Test, title = {A {B}ook about {LaTeX}}}";
        let result = parse(input);
        assert_eq!(result.entries[0].title(), Some("A {B}ook about {LaTeX}"));
    }

    #[test]
    fn test_parse_string_definitions() {
        let input = r#"
@string{nature = "Nature"}
@article{Test2024,
    journal = nature # " Physics",
}
"#;
        let result = parse(input);
        assert_eq!(result.strings.get("nature"), Some(&"Nature".to_string()));
        assert_eq!(result.entries[0].get_field("journal"), Some("Nature Physics"));
    }

    #[test]
    fn test_recovers_after_broken_entry() {
        let input = "@article{Broken, title = {never closed\n\n@book{Second, title = {Fine}}\n";
        let result = parse(input);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].line, 1);
        assert_eq!(result.errors[0].text, "@article{Broken, title = {never closed");
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].cite_key, "Second");
        assert_eq!(result.entries[0].line, Some(3));
    }

    #[test]
    fn test_duplicate_field_last_wins() {
        let entry = parse_entry("@misc{K, Year = 2001, year = 2002}").unwrap();
        assert_eq!(entry.fields.len(), 1);
        assert_eq!(entry.year(), Some("2002"));
    }

    #[test]
    fn test_parse_entry_empty_input() {
        assert!(parse_entry("% only a comment\n").is_err());
    }
}
