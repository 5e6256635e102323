//! Output character encodings.
//!
//! Labels are resolved with the WHATWG label table from `encoding_rs`
//! (`utf-8`, `latin1`, `iso-8859-15`, `windows-1251`, `shift_jis`, ...), with
//! one exception: `ascii` and `us-ascii` mean strict 7-bit ASCII rather than
//! the windows-1252 alias the web platform gives them. UTF-16 and the
//! `replacement` encoding cannot be produced and are rejected.
//!
//! Encoding never substitutes: text containing a character the target
//! encoding cannot represent is an error that names the character and where
//! it occurs.

use crate::markup::Position;
use encoding_rs::{Encoding, UTF_8};
use memchr::memmem;
use thiserror::Error;

/// How far into a document an encoding declaration is looked for.
const SNIFF_LIMIT: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unsupported output encoding '{0}'")]
    Unsupported(String),
    #[error("character {ch:?} (U+{code:04X}) at {position} cannot be encoded as {encoding}")]
    Unrepresentable {
        ch: char,
        code: u32,
        position: Position,
        encoding: &'static str,
    },
    #[error("input is not valid {0}")]
    Undecodable(&'static str),
}

/// A resolved output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputEncoding {
    #[default]
    Utf8,
    Ascii,
    Other(&'static Encoding),
}

impl OutputEncoding {
    pub fn from_label(label: &str) -> Result<Self, EncodingError> {
        let trimmed = label.trim();
        if trimmed.eq_ignore_ascii_case("ascii") || trimmed.eq_ignore_ascii_case("us-ascii") {
            return Ok(Self::Ascii);
        }
        match Encoding::for_label(trimmed.as_bytes()) {
            Some(enc) if enc == UTF_8 => Ok(Self::Utf8),
            // UTF-16 and `replacement` have a different output encoding
            Some(enc) if enc.output_encoding() == enc => Ok(Self::Other(enc)),
            _ => Err(EncodingError::Unsupported(label.to_string())),
        }
    }

    /// Canonical name, e.g. `UTF-8`, `windows-1252`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Ascii => "US-ASCII",
            Self::Other(enc) => enc.name(),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, EncodingError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Ascii => match text.char_indices().find(|(_, c)| !c.is_ascii()) {
                Some((offset, ch)) => Err(self.unrepresentable(text, offset, ch)),
                None => Ok(text.as_bytes().to_vec()),
            },
            Self::Other(enc) => {
                let (bytes, _, had_errors) = enc.encode(text);
                if !had_errors {
                    return Ok(bytes.into_owned());
                }
                let mut buf = [0u8; 4];
                let (offset, ch) = text
                    .char_indices()
                    .find(|(_, c)| enc.encode(c.encode_utf8(&mut buf)).2)
                    .unwrap_or((0, '\u{fffd}'));
                Err(self.unrepresentable(text, offset, ch))
            }
        }
    }

    /// Decode template files (header, footer) written in this encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, EncodingError> {
        let decoded = match self {
            Self::Utf8 | Self::Ascii => std::str::from_utf8(bytes).ok().map(str::to_string),
            Self::Other(enc) => enc
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
        };
        decoded.ok_or(EncodingError::Undecodable(self.name()))
    }

    fn unrepresentable(&self, text: &str, offset: usize, ch: char) -> EncodingError {
        EncodingError::Unrepresentable {
            ch,
            code: ch as u32,
            position: Position::locate(text, offset),
            encoding: self.name(),
        }
    }
}

/// Decode transformed markup: UTF-8 when valid, otherwise the encoding named
/// by an `encoding="..."` XML declaration or a `charset=...` meta tag near the
/// start of the document.
pub fn decode_declared(bytes: &[u8]) -> Result<String, EncodingError> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_string());
    }
    match declared_encoding(bytes) {
        Some(enc) if enc != UTF_8 => enc
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|s| s.into_owned())
            .ok_or(EncodingError::Undecodable(enc.name())),
        _ => Err(EncodingError::Undecodable("UTF-8")),
    }
}

/// The encoding declared in the first bytes of a document, if any.
pub fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(SNIFF_LIMIT)];
    let lower = head.to_ascii_lowercase();
    [&b"encoding"[..], b"charset"].iter().find_map(|key| {
        let at = memmem::find(&lower, key)? + key.len();
        Encoding::for_label(declared_label(&head[at..])?)
    })
}

/// `= "label"`, `='label'` or `=label`, with optional spaces around `=`.
fn declared_label(rest: &[u8]) -> Option<&[u8]> {
    let rest = rest.trim_ascii_start().strip_prefix(b"=")?.trim_ascii_start();
    let rest = match rest.first() {
        Some(b'"' | b'\'') => &rest[1..],
        _ => rest,
    };
    let len = rest
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
        .count();
    (len > 0).then(|| &rest[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Declared encodings
    // =========================================================================

    #[test]
    fn utf8_markup_decodes_as_is() {
        assert_eq!(decode_declared("<p>é</p>".as_bytes()).unwrap(), "<p>é</p>");
    }

    #[test]
    fn xml_declaration_names_the_encoding() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\n<p>caf\xe9</p>";
        assert!(decode_declared(bytes).unwrap().ends_with("<p>café</p>"));
    }

    #[test]
    fn meta_charset_names_the_encoding() {
        let bytes = b"<html><head><meta http-equiv=\"Content-Type\" \
                      content=\"text/html; charset=windows-1252\"></head>\x93q\x94";
        assert!(decode_declared(bytes).unwrap().ends_with("\u{201c}q\u{201d}"));
    }

    #[test]
    fn undeclared_non_utf8_is_an_error() {
        assert_eq!(
            decode_declared(b"<p>\xff</p>"),
            Err(EncodingError::Undecodable("UTF-8"))
        );
    }

    #[test]
    fn declared_label_forms() {
        assert_eq!(declared_label(b" = 'latin1' ?>"), Some(&b"latin1"[..]));
        assert_eq!(declared_label(b"=utf-8\">"), Some(&b"utf-8"[..]));
        assert_eq!(declared_label(b" type"), None);
    }

    // =========================================================================
    // Output encodings
    // =========================================================================

    #[test]
    fn resolves_common_labels() {
        assert_eq!(OutputEncoding::from_label("utf-8").unwrap(), OutputEncoding::Utf8);
        assert_eq!(OutputEncoding::from_label("UTF8").unwrap(), OutputEncoding::Utf8);
        assert_eq!(OutputEncoding::from_label("ascii").unwrap(), OutputEncoding::Ascii);
        assert_eq!(
            OutputEncoding::from_label("latin1").unwrap().name(),
            "windows-1252"
        );
        assert_eq!(
            OutputEncoding::from_label("iso-8859-2").unwrap().name(),
            "ISO-8859-2"
        );
    }

    #[test]
    fn rejects_unknown_and_unencodable_labels() {
        assert_eq!(
            OutputEncoding::from_label("klingon"),
            Err(EncodingError::Unsupported("klingon".into()))
        );
        assert!(OutputEncoding::from_label("utf-16le").is_err());
        assert!(OutputEncoding::from_label("utf-16").is_err());
    }

    #[test]
    fn utf8_passes_everything() {
        let out = OutputEncoding::Utf8.encode("héllo ✓").unwrap();
        assert_eq!(out, "héllo ✓".as_bytes());
    }

    #[test]
    fn latin1_encodes_accents() {
        let enc = OutputEncoding::from_label("latin1").unwrap();
        assert_eq!(enc.encode("café").unwrap(), b"caf\xe9");
    }

    #[test]
    fn latin1_rejects_unrepresentable_with_position() {
        let enc = OutputEncoding::from_label("iso-8859-1").unwrap();
        let err = enc.encode("ok\nnot ✓ here").unwrap_err();
        match err {
            EncodingError::Unrepresentable {
                ch, code, position, ..
            } => {
                assert_eq!(ch, '✓');
                assert_eq!(code, 0x2713);
                assert_eq!(position, Position { line: 2, column: 5 });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ascii_is_strict() {
        let err = OutputEncoding::Ascii.encode("café").unwrap_err();
        assert!(matches!(err, EncodingError::Unrepresentable { ch: 'é', .. }));
        assert_eq!(OutputEncoding::Ascii.encode("cafe").unwrap(), b"cafe");
    }

    #[test]
    fn decode_round_trips_legacy_bytes() {
        let enc = OutputEncoding::from_label("latin1").unwrap();
        assert_eq!(enc.decode(b"caf\xe9").unwrap(), "café");
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert_eq!(
            OutputEncoding::Utf8.decode(b"\xff"),
            Err(EncodingError::Undecodable("UTF-8"))
        );
    }
}
