//! Path selectors for per-document metadata.
//!
//! A deliberately small XPath subset, enough to point at a title, summary or
//! date inside an input document:
//!
//! ```text
//! /*/title            child steps from the document root
//! //meta/date         `//` matches at any depth
//! /article/@date      a trailing attribute step
//! ```
//!
//! Names match on local name, so `/doc/title` also finds `<x:title>`.
//! Evaluation streams the document once with quick-xml and returns the
//! trimmed string value of the first matching node.

use crate::markup;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid selector '{selector}': {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: &'static str,
}

#[derive(Error, Debug)]
pub enum SelectError {
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML encoding error: {0}")]
    Encoding(#[from] quick_xml::encoding::EncodingError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// `//name` rather than `/name`.
    descendant: bool,
    /// `None` for `*`.
    name: Option<String>,
}

impl Step {
    fn accepts(&self, local: &str) -> bool {
        self.name.as_deref().is_none_or(|n| n == local)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    steps: Vec<Step>,
    attribute: Option<String>,
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason| SelectorError {
            selector: s.to_string(),
            reason,
        };
        let source = s.trim();
        if !source.starts_with('/') {
            return Err(fail("must start with '/'"));
        }

        let mut steps = Vec::new();
        let mut attribute = None;
        let mut rest = source;
        while !rest.is_empty() {
            if attribute.is_some() {
                return Err(fail("attribute step must come last"));
            }
            let descendant = rest.starts_with("//");
            rest = rest.trim_start_matches('/');
            let end = rest.find('/').unwrap_or(rest.len());
            let (token, tail) = rest.split_at(end);
            rest = tail;

            if let Some(attr) = token.strip_prefix('@') {
                if descendant || !is_name(attr) {
                    return Err(fail("bad attribute step"));
                }
                attribute = Some(attr.to_string());
            } else if token == "*" {
                steps.push(Step { descendant, name: None });
            } else if is_name(token) {
                steps.push(Step {
                    descendant,
                    name: Some(token.to_string()),
                });
            } else {
                return Err(fail("expected an element name or '*'"));
            }
        }
        if steps.is_empty() {
            return Err(fail("no element steps"));
        }

        Ok(Selector {
            source: source.to_string(),
            steps,
            attribute,
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}

impl Selector {
    /// Does the chain of element local names from the root match?
    fn matches(&self, path: &[String]) -> bool {
        fn walk(steps: &[Step], path: &[String]) -> bool {
            let Some((step, more)) = steps.split_first() else {
                return path.is_empty();
            };
            if step.descendant {
                (0..path.len()).any(|k| step.accepts(&path[k]) && walk(more, &path[k + 1..]))
            } else {
                !path.is_empty() && step.accepts(&path[0]) && walk(more, &path[1..])
            }
        }
        walk(&self.steps, path)
    }

    /// String value of the first node this selector matches in `xml`, trimmed.
    /// `None` when nothing matches or the value is empty.
    pub fn select_text(&self, xml: &str) -> Result<Option<String>, SelectError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        // Depth of the matched element while collecting its text.
        let mut collecting: Option<usize> = None;
        let mut text = String::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    path.push(local_name(&reader, &e));
                    if collecting.is_none() && self.matches(&path) {
                        match &self.attribute {
                            Some(attr) => return Ok(attribute_value(&reader, &e, attr)),
                            None => collecting = Some(path.len()),
                        }
                    }
                }
                Event::Empty(e) => {
                    path.push(local_name(&reader, &e));
                    if collecting.is_none() && self.matches(&path) {
                        return Ok(match &self.attribute {
                            Some(attr) => attribute_value(&reader, &e, attr),
                            None => None,
                        });
                    }
                    path.pop();
                }
                Event::Text(e) if collecting.is_some() => {
                    text.push_str(&reader.decoder().decode(&e)?);
                }
                Event::GeneralRef(e) if collecting.is_some() => {
                    let entity = reader.decoder().decode(&e)?;
                    text.push_str(&markup::resolve_entity(&entity));
                }
                Event::CData(e) if collecting.is_some() => {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
                Event::End(_) => {
                    if collecting == Some(path.len()) {
                        return Ok(non_empty(&text));
                    }
                    path.pop();
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
            buf.clear();
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn local_name(reader: &Reader<&[u8]>, e: &BytesStart) -> String {
    let local = e.local_name();
    reader.decoder().decode(local.as_ref()).map_or_else(
        |_| String::from_utf8_lossy(local.as_ref()).into_owned(),
        std::borrow::Cow::into_owned,
    )
}

fn attribute_value(reader: &Reader<&[u8]>, e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| {
            let local = attr.key.local_name();
            reader
                .decoder()
                .decode(local.as_ref())
                .is_ok_and(|k| k == name)
        })
        .and_then(|attr| {
            let value = attr.unescape_value().map_or_else(
                |_| String::from_utf8_lossy(&attr.value).into_owned(),
                std::borrow::Cow::into_owned,
            );
            non_empty(&value)
        })
}

/// Metadata recorded for one built page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub date: Option<String>,
}

/// The three metadata selectors. A `None` field is not extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaSelectors {
    pub title: Option<Selector>,
    pub summary: Option<Selector>,
    pub date: Option<Selector>,
}

impl MetaSelectors {
    /// Parse selector strings; an empty string disables that field.
    pub fn parse(title: &str, summary: &str, date: &str) -> Result<Self, SelectorError> {
        fn optional(s: &str) -> Result<Option<Selector>, SelectorError> {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.parse().map(Some)
            }
        }
        Ok(Self {
            title: optional(title)?,
            summary: optional(summary)?,
            date: optional(date)?,
        })
    }

    pub fn extract(&self, xml: &str) -> Result<PageMeta, SelectError> {
        let field = |selector: &Option<Selector>| match selector {
            Some(s) => s.select_text(xml),
            None => Ok(None),
        };
        Ok(PageMeta {
            title: field(&self.title)?,
            summary: field(&self.summary)?,
            date: field(&self.date)?,
        })
    }
}

impl Default for MetaSelectors {
    fn default() -> Self {
        // The literals are valid selectors.
        Self::parse("/*/title", "/*/summary", "/*/date").unwrap_or(Self {
            title: None,
            summary: None,
            date: None,
        })
    }
}
