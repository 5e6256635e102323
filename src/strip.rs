//! Whitespace stripping outside preserved regions.
//!
//! Removes leading indentation from every line and drops blank lines, except
//! inside *preserve regions*: a span that starts at an opening tag named in
//! the preserve set and ends at the first following closing tag of the same
//! name.
//!
//! ```text
//!   <div>                    <div>
//!                            <pre>
//!   <pre>            →          x
//!      x                     </pre>
//! </pre>                     text
//!   text                     </div>
//! </div>
//! ```
//!
//! ## Non-nesting regions
//!
//! Regions do not nest. In `<pre>A<pre>B</pre>C</pre>` the region ends at the
//! first `</pre>`; `C</pre>` is ordinary content again. A preserved element
//! must therefore not contain another element of the same name.
//!
//! ## States
//!
//! ```text
//! LineStart ──(skip whitespace, blank lines included)──▶ Line
//! Line      ──'\n'──▶ LineStart
//! Line      ──<preserved-tag ...> with a closing tag ahead──▶ Preserve
//! Preserve  ──(copy verbatim through the closing tag)──▶ Resume
//! Resume    ──(skip spaces/tabs only)──▶ Line
//! ```
//!
//! An opening preserve tag with no closing tag anywhere after it does not
//! start a region. Only leading whitespace and blank lines are ever removed,
//! so the document's non-whitespace content is unchanged.

use crate::markup;
use crate::tags::TagSet;
use memchr::memchr2;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At the start of a line: indentation and blank lines are dropped.
    LineStart,
    /// Inside a line: bytes are copied.
    Line,
    /// Inside a preserve region ending (exclusive) at this offset.
    Preserve { end: usize },
    /// Right after a preserve region: the rest of the line is stripped like
    /// a fresh line, but its newline is kept.
    Resume,
}

/// Strip leading whitespace and blank lines outside preserve regions.
pub fn strip(markup: &str, preserve: &TagSet) -> String {
    let s = markup.as_bytes();
    let mut out = String::with_capacity(markup.len());
    let mut state = State::LineStart;
    let mut regions = 0usize;
    let mut i = 0;

    while i < s.len() {
        state = match state {
            State::LineStart => {
                while i < s.len() && s[i].is_ascii_whitespace() {
                    i += 1;
                }
                State::Line
            }
            State::Resume => {
                while i < s.len() && markup::is_horizontal_space(s[i]) {
                    i += 1;
                }
                State::Line
            }
            State::Preserve { end } => {
                out.push_str(&markup[i..end]);
                i = end;
                regions += 1;
                State::Resume
            }
            State::Line => match memchr2(b'\n', b'<', &s[i..]) {
                None => {
                    out.push_str(&markup[i..]);
                    i = s.len();
                    State::Line
                }
                Some(off) if s[i + off] == b'\n' => {
                    out.push_str(&markup[i..=i + off]);
                    i += off + 1;
                    State::LineStart
                }
                Some(off) => {
                    let lt = i + off;
                    out.push_str(&markup[i..lt]);
                    i = lt;
                    match region_end(s, lt, preserve) {
                        Some(end) => State::Preserve { end },
                        None => {
                            out.push('<');
                            i += 1;
                            State::Line
                        }
                    }
                }
            },
        };
    }

    debug!(regions, "stripped whitespace");
    out
}

/// If a preserve region opens at `lt`, return its end (exclusive).
fn region_end(s: &[u8], lt: usize, preserve: &TagSet) -> Option<usize> {
    if !s.get(lt + 1).is_some_and(|&b| markup::is_name_start(b)) {
        return None;
    }
    let name_end = markup::name_end(s, lt + 1);
    let name = std::str::from_utf8(&s[lt + 1..name_end]).ok()?;
    if !preserve.contains(name) {
        return None;
    }
    // `<pre>` or `<pre attr...>`, but not `<prefix>`
    match s.get(name_end).copied() {
        Some(b'>') => {}
        Some(b) if b.is_ascii_whitespace() => {}
        _ => return None,
    }
    let gt = markup::find_tag_end(s, lt).ok()?;
    if s[gt - 1] == b'/' {
        return None;
    }
    markup::find_close_tag(s, gt + 1, name.as_bytes()).map(|(_, end)| end)
}
