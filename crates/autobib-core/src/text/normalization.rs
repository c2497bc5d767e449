//! Text normalization for identity comparison and key generation

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Letters that do not decompose under NFKD but have an obvious ASCII form
fn fold_special(c: char) -> Option<&'static str> {
    Some(match c {
        'ø' => "o",
        'Ø' => "O",
        'ł' => "l",
        'Ł' => "L",
        'ı' => "i",
        'ß' => "ss",
        'æ' => "ae",
        'Æ' => "AE",
        'œ' => "oe",
        'Œ' => "OE",
        'đ' => "d",
        'Đ' => "D",
        _ => return None,
    })
}

/// Remove diacritics, keeping everything else (case, punctuation) intact
pub fn strip_accents(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.nfkd().filter(|c| !is_combining_mark(*c)) {
        match fold_special(c) {
            Some(folded) => result.push_str(folded),
            None => result.push(c),
        }
    }
    result
}

/// Strip the LaTeX markup that commonly wraps bibliographic text
///
/// `{\"o}` and `\"{o}` become `o`, braces and command backslashes disappear.
pub(crate) fn strip_latex(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' | '}' | '$' => {}
            '\\' => {
                // Accent commands are a single symbol; named commands are letters
                match chars.peek() {
                    Some(next) if next.is_ascii_alphabetic() => {
                        let mut name = String::new();
                        while let Some(&n) = chars.peek() {
                            if !n.is_ascii_alphabetic() {
                                break;
                            }
                            name.push(n);
                            chars.next();
                        }
                        if let Some(folded) = latex_letter(&name) {
                            result.push_str(folded);
                        }
                    }
                    Some(_) => {
                        chars.next();
                    }
                    None => {}
                }
            }
            _ => result.push(c),
        }
    }
    result
}

/// LaTeX commands that produce a letter rather than an accent
fn latex_letter(name: &str) -> Option<&'static str> {
    Some(match name {
        "o" => "o",
        "O" => "O",
        "l" => "l",
        "L" => "L",
        "i" => "i",
        "ss" => "ss",
        "ae" => "ae",
        "AE" => "AE",
        "oe" => "oe",
        "OE" => "OE",
        "aa" => "a",
        "AA" => "A",
        _ => return None,
    })
}

/// Normalize a title for comparison
///
/// - Removes LaTeX markup and diacritics
/// - Converts to lowercase
/// - Replaces punctuation by spaces and collapses whitespace
/// - Drops one leading word found in `ignored_prefixes`
pub fn normalize_title(title: &str, ignored_prefixes: &[String]) -> String {
    let folded = strip_accents(&strip_latex(title));
    let spaced: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let mut result = collapse_whitespace(&spaced.to_lowercase());

    for prefix in ignored_prefixes {
        let prefix = format!("{} ", prefix.to_lowercase());
        if let Some(rest) = result.strip_prefix(&prefix) {
            result = rest.to_string();
            break;
        }
    }

    result
}

/// Normalize an author name for comparison
pub fn normalize_author(author: &str) -> String {
    let folded = strip_accents(&strip_latex(author));
    let mut result: String = folded
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == ',' || *c == '-')
        .collect::<String>()
        .to_lowercase();

    let suffixes = [" jr", " sr", " ii", " iii", " iv"];
    for suffix in suffixes {
        if let Some(stripped) = result.trim_end().strip_suffix(suffix) {
            result = stripped.trim_end_matches(',').to_string();
        }
    }

    collapse_whitespace(&result)
}

/// Collapse runs of whitespace into single spaces and trim the ends
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the surname of an author name, keeping its original spelling.
///
/// Handles `Last, First`, `First Last` and `{Corporate Name}`.
pub fn surname(author: &str) -> String {
    let trimmed = author.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed[1..trimmed.len() - 1].trim().to_string();
    }
    if let Some(comma_pos) = trimmed.find(',') {
        return trimmed[..comma_pos].trim().to_string();
    }
    trimmed
        .split_whitespace()
        .last()
        .unwrap_or(trimmed)
        .to_string()
}

/// Surname normalized for comparison (`Müller` and `Muller` compare equal)
pub fn normalized_surname(author: &str) -> String {
    normalize_author(&surname(author)).replace([' ', ',', '-'], "")
}

/// Split a BibTeX author field into individual names
pub fn split_authors(authors: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let words: Vec<&str> = authors.split_whitespace().collect();

    for word in words {
        if depth == 0 && word.eq_ignore_ascii_case("and") {
            if !current.is_empty() {
                names.push(std::mem::take(&mut current));
            }
            continue;
        }
        depth += word.matches('{').count();
        depth = depth.saturating_sub(word.matches('}').count());
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        names.push(current);
    }
    names
}
