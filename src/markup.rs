//! Low-level byte scanning shared by the rewriters.
//!
//! Everything here works on the UTF-8 bytes of a document. All delimiters
//! the rewriters look for (`<`, `>`, quotes, `/`, newlines) are ASCII, so any
//! index returned by these helpers is a valid `str` char boundary.

use std::fmt;

/// A 1-based line/column position, columns counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Locate a byte offset within `text`.
    pub fn locate(text: &str, offset: usize) -> Self {
        let before = &text[..offset.min(text.len())];
        let line_start = memchr::memrchr(b'\n', before.as_bytes()).map_or(0, |p| p + 1);
        Self {
            line: memchr::memchr_iter(b'\n', before.as_bytes()).count() + 1,
            column: before[line_start..].chars().count() + 1,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Why a tag has no end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unterminated {
    /// A quoted attribute value opened at this offset never closes.
    Quote(usize),
    /// The input ends before the tag's `>`.
    Tag,
}

#[inline]
pub fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b':'
}

#[inline]
pub fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

#[inline]
pub fn is_horizontal_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\x0c')
}

/// End (exclusive) of the tag name starting at `start`.
pub fn name_end(s: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < s.len() && is_name_char(s[i]) {
        i += 1;
    }
    i
}

/// Find the `>` closing the tag that opens at `lt` (`s[lt] == b'<'`).
///
/// Quote-aware: a `>` inside a single- or double-quoted run does not end the
/// tag.
pub fn find_tag_end(s: &[u8], lt: usize) -> Result<usize, Unterminated> {
    let mut quote: Option<(u8, usize)> = None;
    let mut i = lt + 1;
    while i < s.len() {
        let b = s[i];
        match quote {
            Some((q, _)) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some((b, i)),
            None if b == b'>' => return Ok(i),
            None => {}
        }
        i += 1;
    }
    match quote {
        Some((_, at)) => Err(Unterminated::Quote(at)),
        None => Err(Unterminated::Tag),
    }
}

/// Find `</name` (ASCII case-insensitive) at or after `from`, followed by
/// optional whitespace and `>`. Returns `(start_of_close_tag, end_exclusive)`.
pub fn find_close_tag(s: &[u8], from: usize, name: &[u8]) -> Option<(usize, usize)> {
    let mut i = from;
    while let Some(off) = memchr::memchr(b'<', &s[i..]) {
        let lt = i + off;
        let name_start = lt + 2;
        let after = name_start + name.len();
        if s.get(lt + 1) == Some(&b'/')
            && after <= s.len()
            && s[name_start..after].eq_ignore_ascii_case(name)
        {
            let mut j = after;
            while j < s.len() && s[j].is_ascii_whitespace() {
                j += 1;
            }
            if s.get(j) == Some(&b'>') {
                return Some((lt, j + 1));
            }
        }
        i = lt + 1;
    }
    None
}

/// Expand a predefined XML entity or character reference, given the text
/// between `&` and `;`. Anything else is returned as written.
pub fn resolve_entity(entity: &str) -> String {
    match entity {
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "amp" => "&".to_string(),
        "apos" => "'".to_string(),
        "quot" => "\"".to_string(),
        s if s.starts_with('#') => {
            let code = match s.strip_prefix("#x").or_else(|| s.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => s[1..].parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
                .map_or_else(|| format!("&{entity};"), |c| c.to_string())
        }
        _ => format!("&{entity};"),
    }
}
