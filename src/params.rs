//! Named string parameters and `@key@` substitution.
//!
//! Parameters come from three places, later ones winning:
//!
//! 1. built-ins describing the document being built (`input`, `output`,
//!    `root`, `relroot`, `state`),
//! 2. `-p name=value` properties,
//! 3. positional `name=value` parameters.
//!
//! Header and footer templates reference them as `@name@`; `@@` is a literal
//! `@`. A reference to an undefined name is an error. An `@` that does not
//! begin a well-formed reference (`@` + name chars + `@`) is copied as is.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("template references undefined parameter '@{0}@'")]
pub struct MissingParameter(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expected name=value, got '{0}'")]
pub struct InvalidAssignment(pub String);

/// An ordered name → value map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// A copy of `self` with every entry of `other` laid on top.
    pub fn merged(&self, other: &Params) -> Params {
        let mut out = self.clone();
        out.values
            .extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    /// Replace `@name@` references in `template`.
    pub fn substitute(&self, template: &str) -> Result<String, MissingParameter> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(at) = rest.find('@') {
            out.push_str(&rest[..at]);
            let after = &rest[at + 1..];
            let name_len = after.bytes().take_while(|&b| is_param_name_byte(b)).count();

            if after.as_bytes().get(name_len) != Some(&b'@') {
                out.push('@');
                rest = after;
                continue;
            }

            let name = &after[..name_len];
            if name.is_empty() {
                out.push('@');
            } else {
                let value = self
                    .get(name)
                    .ok_or_else(|| MissingParameter(name.to_string()))?;
                out.push_str(value);
            }
            rest = &after[name_len + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

fn is_param_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-')
}

/// Parse a `name=value` assignment. The name is trimmed; the value is kept
/// as written.
pub fn parse_assignment(raw: &str) -> Result<(String, String), InvalidAssignment> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(InvalidAssignment(raw.to_string())),
    }
}

/// Path written with `/` separators, as stylesheets and URLs expect.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::RootDir => Some(String::new()),
            Component::CurDir => None,
            other => Some(other.as_os_str().to_string_lossy().into_owned()),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Relative link from the directory containing `file` to directory `dir`,
/// `/`-separated and always ending in `/` (`./` when they coincide).
///
/// Both paths are made absolute against the working directory and resolved
/// lexically; symlinks are not followed.
pub fn relative_dir_link(file: &Path, dir: &Path) -> std::io::Result<String> {
    let from = absolute_path(file)?;
    let from = from.parent().map(Path::to_path_buf).unwrap_or_default();
    let to = absolute_path(dir)?;

    let from_parts: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();
    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut link = String::new();
    for _ in common..from_parts.len() {
        link.push_str("../");
    }
    for part in &to_parts[common..] {
        link.push_str(&part.as_os_str().to_string_lossy());
        link.push('/');
    }
    if link.is_empty() {
        link.push_str("./");
    }
    Ok(link)
}

/// `path` made absolute against the working directory, with `.` and `..`
/// resolved lexically.
pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    Ok(normalize(&std::path::absolute(path)?))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
