//! Self-closing tag normalization.
//!
//! XSLT engines serialize empty elements as `<div/>`, which HTML parsers read
//! as an *open* `<div>`. This pass rewrites every self-closing tag whose name
//! is not in the allow-list into an explicit pair:
//!
//! ```text
//! <div class="x"/>   →  <div class="x"></div>
//! <br/>              →  <br/>              (br is allowed)
//! ```
//!
//! The scan is a single left-to-right pass over a small state machine
//! (text, comment, tag, quoted value, raw text). Nesting is never tracked:
//! the rewrite happens at the point where `/>` is seen. Quoted attribute
//! values are honoured when looking for the tag's real end, so
//! `<a href="http://x/"/>` is not cut short at the slash inside the quotes.
//!
//! Comments, CDATA sections, processing instructions and declarations are
//! copied untouched (one left open is malformed), as is the content of `script` and `style` elements,
//! which may legally contain `<` and quotes.

use crate::markup::{self, Position, Unterminated};
use crate::tags::TagSet;
use memchr::{memchr, memmem};
use thiserror::Error;
use tracing::debug;

/// Elements whose content is raw text and never contains tags.
const RAW_TEXT: &[&str] = &["script", "style"];

/// The scanner could not find where a tag ends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed markup at {position}: {reason}")]
pub struct MalformedMarkup {
    /// Byte offset of the problem within the document.
    pub offset: usize,
    pub position: Position,
    pub reason: String,
}

impl MalformedMarkup {
    fn at(markup: &str, offset: usize, reason: String) -> Self {
        Self {
            offset,
            position: Position::locate(markup, offset),
            reason,
        }
    }
}

/// What a `<` introduces.
enum Construct {
    Comment,
    CData,
    /// `<?...?>`
    Instruction,
    /// `<!DOCTYPE ...>` and friends.
    Declaration,
    EndTag,
    StartTag { name_end: usize },
    /// A literal `<` in text.
    Text,
}

fn classify(s: &[u8], lt: usize) -> Construct {
    let rest = &s[lt..];
    match rest.get(1).copied() {
        Some(b'!') if rest.starts_with(b"<!--") => Construct::Comment,
        Some(b'!') if rest.starts_with(b"<![CDATA[") => Construct::CData,
        Some(b'!') => Construct::Declaration,
        Some(b'?') => Construct::Instruction,
        Some(b'/') if rest.get(2).is_some_and(|&b| markup::is_name_start(b)) => Construct::EndTag,
        Some(b) if markup::is_name_start(b) => Construct::StartTag {
            name_end: markup::name_end(s, lt + 1),
        },
        _ => Construct::Text,
    }
}

/// Rewrite disallowed self-closing tags into open/close pairs.
///
/// Applying this twice gives the same result as applying it once.
pub fn normalize(markup: &str, allowed: &TagSet) -> Result<String, MalformedMarkup> {
    let s = markup.as_bytes();
    let mut out = String::with_capacity(markup.len() + markup.len() / 16);
    let mut copied = 0;
    let mut rewritten = 0usize;
    let mut i = 0;

    while let Some(off) = memchr(b'<', &s[i..]) {
        let lt = i + off;
        i = match classify(s, lt) {
            Construct::Comment => skip_past(markup, lt, 4, "-->", "comment")?,
            Construct::CData => skip_past(markup, lt, 9, "]]>", "CDATA section")?,
            Construct::Instruction => skip_past(markup, lt, 2, "?>", "processing instruction")?,
            Construct::Text => lt + 1,
            Construct::Declaration | Construct::EndTag => tag_end(markup, lt)? + 1,
            Construct::StartTag { name_end } => {
                let gt = tag_end(markup, lt)?;
                let name = &markup[lt + 1..name_end];
                let self_closing = gt > name_end && s[gt - 1] == b'/';

                if self_closing && !allowed.contains(name) {
                    out.push_str(&markup[copied..gt - 1]);
                    out.push_str("></");
                    out.push_str(name);
                    out.push('>');
                    copied = gt + 1;
                    rewritten += 1;
                    gt + 1
                } else if !self_closing && is_raw_text(name) {
                    markup::find_close_tag(s, gt + 1, name.as_bytes())
                        .map_or(s.len(), |(_, end)| end)
                } else {
                    gt + 1
                }
            }
        };
        if i >= s.len() {
            break;
        }
    }

    out.push_str(&markup[copied..]);
    debug!(rewritten, "normalized self-closing tags");
    Ok(out)
}

fn is_raw_text(name: &str) -> bool {
    RAW_TEXT.iter().any(|raw| raw.eq_ignore_ascii_case(name))
}

/// Index just past `terminator` for the construct opened at `lt`.
fn skip_past(
    markup: &str,
    lt: usize,
    opener: usize,
    terminator: &str,
    what: &str,
) -> Result<usize, MalformedMarkup> {
    let s = markup.as_bytes();
    let from = (lt + opener).min(s.len());
    memmem::find(&s[from..], terminator.as_bytes())
        .map(|p| from + p + terminator.len())
        .ok_or_else(|| MalformedMarkup::at(markup, lt, format!("{what} is never closed with '{terminator}'")))
}

fn tag_end(markup: &str, lt: usize) -> Result<usize, MalformedMarkup> {
    markup::find_tag_end(markup.as_bytes(), lt).map_err(|why| match why {
        Unterminated::Quote(at) => {
            MalformedMarkup::at(markup, at, "unterminated quoted attribute value".to_string())
        }
        Unterminated::Tag => MalformedMarkup::at(markup, lt, "tag is never closed with '>'".to_string()),
    })
}
