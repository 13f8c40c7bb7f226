//! IRCv3 message tags: the `@key=value;key2` section of a line.

use std::fmt;

use super::Tag;

/// Characters that travel escaped in tag values, with their escape letter.
const ESCAPES: [(char, char); 5] = [(';', ':'), (' ', 's'), ('\\', '\\'), ('\r', 'r'), ('\n', 'n')];

/// Split the raw tag section (without the leading `@`). Empty entries are
/// skipped; `key=` yields an empty value.
pub(super) fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => Tag(key.to_owned(), Some(unescape_tag_value(value))),
            None => Tag(entry.to_owned(), None),
        })
        .collect()
}

/// Write `@tags ` (with the trailing space), or nothing for no tags.
pub(super) fn write_tags(f: &mut fmt::Formatter<'_>, tags: &[Tag]) -> fmt::Result {
    let mut sep = '@';
    for Tag(key, value) in tags {
        write!(f, "{}{}", sep, key)?;
        if let Some(value) = value {
            f.write_str("=")?;
            escape_tag_value(&mut *f, value)?;
        }
        sep = ';';
    }
    if !tags.is_empty() {
        f.write_str(" ")?;
    }
    Ok(())
}

/// Escape a tag value for the wire.
pub fn escape_tag_value(out: &mut dyn fmt::Write, value: &str) -> fmt::Result {
    for c in value.chars() {
        match ESCAPES.iter().find(|(raw, _)| *raw == c) {
            Some((_, letter)) => {
                out.write_char('\\')?;
                out.write_char(*letter)?;
            }
            None => out.write_char(c)?,
        }
    }
    Ok(())
}

/// Undo [`escape_tag_value`]. An unknown escape yields the letter itself and
/// a lone trailing backslash is dropped.
pub fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(letter) = chars.next() else { break };
        let raw = ESCAPES
            .iter()
            .find(|(_, l)| *l == letter)
            .map_or(letter, |(raw, _)| *raw);
        out.push(raw);
    }
    out
}
