//! Tag sets and the directive mini-language that edits them.
//!
//! Two sets drive post-processing: the tags that are allowed to stay
//! self-closing (`<br/>`) and the tags whose content is never
//! whitespace-stripped (`<pre>`). Both start from a built-in default and are
//! edited by directives, applied left to right:
//!
//! ```text
//! "+a,b"   add a and b
//! "!a"     remove a
//! "a,b"    replace the whole set with {a, b}
//! ""       replace the whole set with {} (a bare empty list)
//! ```
//!
//! ## Case
//!
//! Names keep the case they were typed with, but membership is ASCII
//! case-insensitive: a set holding `br` matches `<BR/>` in the source. The
//! rewriters never change the case of the markup they emit.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tags allowed to remain self-closing (HTML void elements).
pub const DEFAULT_SELFCLOSE: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link",
    "meta", "param", "source", "track", "wbr",
];

/// Tags whose content is emitted verbatim by the whitespace stripper.
pub const DEFAULT_PRESERVE: &[&str] = &["pre", "textarea", "script", "style"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("empty tag name in directive '{0}'")]
    EmptyName(String),
    #[error("invalid tag name '{name}' in directive '{directive}'")]
    InvalidName { name: String, directive: String },
}

/// An ordered set of tag names without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    names: Vec<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in self-closing allow-list.
    pub fn default_selfclose() -> Self {
        DEFAULT_SELFCLOSE.iter().copied().collect()
    }

    /// The built-in preserve set.
    pub fn default_preserve() -> Self {
        DEFAULT_PRESERVE.iter().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Add a name. Returns `false` if it was already present (in any case).
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    /// Remove a name. Returns `false` if it was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.names.len();
        self.names.retain(|n| !n.eq_ignore_ascii_case(name));
        self.names.len() != before
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Apply one directive, producing the next set.
    pub fn apply(&self, directive: &Directive) -> TagSet {
        match directive {
            Directive::Add(names) => {
                let mut next = self.clone();
                for name in names {
                    next.insert(name);
                }
                next
            }
            Directive::Remove(names) => {
                let mut next = self.clone();
                for name in names {
                    next.remove(name);
                }
                next
            }
            Directive::Replace(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Parse and fold a sequence of directives over this set, left to right.
    pub fn apply_all<I, S>(self, directives: I) -> Result<TagSet, DirectiveError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        directives.into_iter().try_fold(self, |set, raw| {
            let directive: Directive = raw.as_ref().parse()?;
            Ok(set.apply(&directive))
        })
    }
}

impl<'a> FromIterator<&'a str> for TagSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(","))
    }
}

/// A parsed `[+|!]tag[,tag...]` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Add(Vec<String>),
    Remove(Vec<String>),
    Replace(Vec<String>),
}

impl FromStr for Directive {
    type Err = DirectiveError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let (ctor, list): (fn(Vec<String>) -> Directive, &str) =
            if let Some(rest) = trimmed.strip_prefix('+') {
                (Directive::Add, rest)
            } else if let Some(rest) = trimmed.strip_prefix('!') {
                (Directive::Remove, rest)
            } else {
                (Directive::Replace, trimmed)
            };

        if list.trim().is_empty() {
            return Ok(ctor(Vec::new()));
        }

        let mut names = Vec::new();
        for token in list.split(',') {
            let name = token.trim();
            if name.is_empty() {
                return Err(DirectiveError::EmptyName(raw.to_string()));
            }
            if !name.bytes().all(is_tag_name_byte) {
                return Err(DirectiveError::InvalidName {
                    name: name.to_string(),
                    directive: raw.to_string(),
                });
            }
            names.push(name.to_string());
        }
        Ok(ctor(names))
    }
}

fn is_tag_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'.' | b'-')
}
