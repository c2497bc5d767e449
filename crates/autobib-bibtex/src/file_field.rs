//! `file` field codec
//!
//! Linked PDFs are stored JabRef-style as `:relative/path.pdf:PDF`, with
//! colons inside the path escaped as `\:`.

/// Encode a relative path into a `file` field value
pub fn encode_file_field(path: &str) -> String {
    format!(":{}:PDF", path.replace(':', "\\:"))
}

/// Decode a `file` field value into the relative path it links to.
///
/// Values that are not in the `:path:TYPE` form are taken as a bare path.
/// When several files are listed (`;`-separated) only the first is returned.
pub fn decode_file_field(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let first = split_unescaped(value, ';').into_iter().next()?;
    let Some(body) = first.strip_prefix(':') else {
        return Some(first.replace("\\:", ":"));
    };

    // Description was empty; drop the trailing `:TYPE`
    let path = match rfind_unescaped(body, ':') {
        Some(pos) => &body[..pos],
        None => body,
    };
    let path = path.replace("\\:", ":");
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

fn split_unescaped(value: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn rfind_unescaped(value: &str, needle: char) -> Option<usize> {
    value
        .char_indices()
        .filter(|&(i, c)| c == needle && !value[..i].ends_with('\\'))
        .map(|(i, _)| i)
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_escapes_colons() {
        assert_eq!(encode_file_field("paper.pdf"), ":paper.pdf:PDF");
        assert_eq!(
            encode_file_field("(Doe) Title: Sub.pdf"),
            ":(Doe) Title\\: Sub.pdf:PDF"
        );
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode_file_field(":paper.pdf:PDF").as_deref(), Some("paper.pdf"));
        assert_eq!(
            decode_file_field(":(Doe) Title\\: Sub.pdf:PDF").as_deref(),
            Some("(Doe) Title: Sub.pdf")
        );
        assert_eq!(
            decode_file_field(":sub/dir/a.pdf:PDF;:b.pdf:PDF").as_deref(),
            Some("sub/dir/a.pdf")
        );
        assert_eq!(decode_file_field("plain.pdf").as_deref(), Some("plain.pdf"));
        assert_eq!(decode_file_field("  "), None);
        assert_eq!(decode_file_field("::PDF"), None);
    }

    #[test]
    fn test_encode_decode_colon_path() {
        let path = "a:b:c.pdf";
        assert_eq!(decode_file_field(&encode_file_field(path)).as_deref(), Some(path));
    }
}
