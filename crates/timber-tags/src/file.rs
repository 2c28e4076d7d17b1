//! The on-disk tag-map format.
//!
//! One binding per line: `id name "format"`, where the format is
//! optional and `#` starts a comment. Example:
//!
//! ```text
//! # system tags
//! 2718 battery_level "(level|1|6)"
//! 2719 watchdog
//! ```

use std::collections::BTreeMap;

use crate::error::TagError;
use crate::registry::TagEntry;
use crate::Result;

/// Parses one tag-map file's contents.
///
/// # Errors
///
/// [`TagError::BadLine`] on the first malformed line, with its number.
pub fn parse_tag_file(contents: &str) -> Result<BTreeMap<u32, TagEntry>> {
    let mut entries = BTreeMap::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let bad = |reason: &str| TagError::BadLine {
            line: index + 1,
            reason: reason.to_string(),
        };

        let (id, rest) = line.split_once(char::is_whitespace).ok_or_else(|| bad("missing name"))?;
        let id: u32 = id.parse().map_err(|_| bad("id is not a number"))?;
        let rest = rest.trim_start();
        let (name, format_part) = match rest.split_once(char::is_whitespace) {
            Some((name, format_part)) => (name, format_part.trim()),
            None => (rest, ""),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_graphic() && c != '"') {
            return Err(bad("bad name"));
        }
        let format = if format_part.is_empty() {
            String::new()
        } else {
            format_part
                .strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .ok_or_else(|| bad("format is not quoted"))?
                .to_string()
        };

        entries.insert(
            id,
            TagEntry {
                name: name.to_string(),
                format,
            },
        );
    }
    Ok(entries)
}

/// Renders a table back into the file format, ascending by id.
#[must_use]
pub fn format_tag_file(entries: &BTreeMap<u32, TagEntry>) -> String {
    let mut out = String::new();
    for (id, entry) in entries {
        out.push_str(&id.to_string());
        out.push(' ');
        out.push_str(&entry.name);
        if !entry.format.is_empty() {
            out.push_str(" \"");
            out.push_str(&entry.format);
            out.push('"');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_comments_and_blanks() {
        let contents = "\
# leading comment

2718 battery_level \"(level|1|6)\"
2719 watchdog   # trailing comment
";
        let entries = parse_tag_file(contents).expect("parse");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[&2718].name, "battery_level");
        assert_eq!(entries[&2718].format, "(level|1|6)");
        assert_eq!(entries[&2719].name, "watchdog");
        assert_eq!(entries[&2719].format, "");
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse_tag_file("2718 ok\nnot-a-number name\n").expect_err("bad line");
        match err {
            TagError::BadLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn rejects_unquoted_format() {
        assert!(parse_tag_file("1 name (raw|1)\n").is_err());
    }

    #[test]
    fn round_trips() {
        let contents = "1 alpha \"(a|1)\"\n2 beta\n90210 gamma \"(g|3)\"\n";
        let entries = parse_tag_file(contents).expect("parse");
        assert_eq!(format_tag_file(&entries), contents);
    }
}
