//! Persistent build state shared across a multi-document build.
//!
//! The state document lets stylesheets build indexes (recent posts, tag
//! pages) from metadata of other pages. It is XML so a stylesheet can read it
//! with `document($state)`:
//!
//! ```xml
//! <state version="1">
//!   <pages>
//!     <page output="out/a.html" input="src/a.xml">
//!       <title>A</title>
//!       <summary>...</summary>
//!       <date>2024-05-01</date>
//!     </page>
//!   </pages>
//!   <staging>
//!     ...
//!   </staging>
//! </state>
//! ```
//!
//! ## Lifecycle
//!
//! 1. `state init` creates the document if needed and clears `staging`.
//! 2. Each successful `build --state` records its page in `staging`, keyed by
//!    output path.
//! 3. `state finalize` promotes staging over `pages`, then prunes pages whose
//!    input or output file no longer exists.
//!
//! A build therefore always reads the previous run's finalized pages, never
//! half-built ones.

use crate::markup;
use crate::select::PageMeta;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::BTreeMap;
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

const VERSION: &str = "1";

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML encoding error: {0}")]
    Encoding(#[from] quick_xml::encoding::EncodingError),
    #[error("invalid state document: {0}")]
    Invalid(String),
    #[error("cannot read state {path}: {reason}")]
    Load { path: PathBuf, reason: String },
}

/// One built page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRecord {
    pub input: String,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub promoted: Vec<String>,
    pub pruned: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDocument {
    pages: BTreeMap<String, PageRecord>,
    staging: BTreeMap<String, PageRecord>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Pages,
    Staging,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Summary,
    Date,
}

impl StateDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        Self::from_xml(&text).map_err(|e| StateError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write to `path` through a uniquely named temporary file in the same
    /// directory and a rename, so readers never see a half-written document.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let dir = parent_dir(path);
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(self.to_xml().as_bytes())?;
        tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
        debug!(path = %path.display(), pages = self.pages.len(), staged = self.staging.len(), "saved state");
        Ok(())
    }

    /// Load, modify and save `path` while holding an exclusive lock on a
    /// sibling `.lock` file. Concurrent builds sharing one state document
    /// (`make -j`) serialize here instead of overwriting each other.
    pub fn update<T>(path: &Path, f: impl FnOnce(&mut Self) -> T) -> Result<T, StateError> {
        let _lock = StateLock::acquire(path)?;
        let mut state = Self::load(path)?;
        let result = f(&mut state);
        state.save(path)?;
        Ok(result)
    }

    /// `state init`: create the document if missing and clear staging.
    pub fn initialize(path: &Path) -> Result<Self, StateError> {
        let state = Self::update(path, |state| {
            state.staging.clear();
            state.clone()
        })?;
        info!(path = %path.display(), pages = state.pages.len(), "initialized state");
        Ok(state)
    }

    pub fn pages(&self) -> &BTreeMap<String, PageRecord> {
        &self.pages
    }

    pub fn staging(&self) -> &BTreeMap<String, PageRecord> {
        &self.staging
    }

    /// Stage a built page, replacing any earlier record for the same output.
    pub fn record(&mut self, output: impl Into<String>, record: PageRecord) {
        self.staging.insert(output.into(), record);
    }

    /// Promote staging, then prune pages whose files are gone. Relative
    /// paths are resolved against `base`.
    pub fn finalize(&mut self, base: &Path) -> FinalizeReport {
        let staged = std::mem::take(&mut self.staging);
        let promoted: Vec<String> = staged.keys().cloned().collect();
        self.pages.extend(staged);

        let pruned: Vec<String> = self
            .pages
            .iter()
            .filter(|(output, record)| {
                !base.join(output.as_str()).exists() || !base.join(&record.input).exists()
            })
            .map(|(output, _)| output.clone())
            .collect();
        for output in &pruned {
            info!(output = %output, "pruning orphaned page");
            self.pages.remove(output);
        }

        FinalizeReport { promoted, pruned }
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&format!("<state version=\"{VERSION}\">\n"));
        write_section(&mut out, "pages", &self.pages);
        write_section(&mut out, "staging", &self.staging);
        out.push_str("</state>\n");
        out
    }

    pub fn from_xml(xml: &str) -> Result<Self, StateError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut state = Self::new();
        let mut buf = Vec::new();
        let mut seen_root = false;
        let mut section: Option<Section> = None;
        let mut page: Option<(String, PageRecord)> = None;
        let mut field: Option<Field> = None;
        let mut text = String::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"state" if !seen_root => {
                        check_version(&e)?;
                        seen_root = true;
                    }
                    b"pages" if seen_root && section.is_none() => section = Some(Section::Pages),
                    b"staging" if seen_root && section.is_none() => section = Some(Section::Staging),
                    b"page" if section.is_some() && page.is_none() => page = Some(read_page(&e)?),
                    name if page.is_some() && field.is_none() => {
                        field = match name {
                            b"title" => Some(Field::Title),
                            b"summary" => Some(Field::Summary),
                            b"date" => Some(Field::Date),
                            _ => None,
                        };
                        text.clear();
                    }
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"state" if !seen_root => {
                        check_version(&e)?;
                        seen_root = true;
                    }
                    b"page" => {
                        let (output, record) = read_page(&e)?;
                        match section {
                            Some(Section::Pages) => state.pages.insert(output, record),
                            Some(Section::Staging) => state.staging.insert(output, record),
                            None => None,
                        };
                    }
                    _ => {}
                },
                Event::Text(e) if field.is_some() => {
                    text.push_str(&reader.decoder().decode(&e)?);
                }
                Event::GeneralRef(e) if field.is_some() => {
                    text.push_str(&markup::resolve_entity(&reader.decoder().decode(&e)?));
                }
                Event::CData(e) if field.is_some() => {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"title" | b"summary" | b"date" if field.is_some() => {
                        if let (Some(f), Some((_, record))) = (field.take(), page.as_mut()) {
                            let value = (!text.trim().is_empty()).then(|| text.trim().to_string());
                            match f {
                                Field::Title => record.meta.title = value,
                                Field::Summary => record.meta.summary = value,
                                Field::Date => record.meta.date = value,
                            }
                        }
                    }
                    b"page" => {
                        if let Some((output, record)) = page.take() {
                            match section {
                                Some(Section::Pages) => state.pages.insert(output, record),
                                Some(Section::Staging) => state.staging.insert(output, record),
                                None => None,
                            };
                        }
                    }
                    b"pages" | b"staging" => section = None,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !seen_root {
            return Err(StateError::Invalid("missing <state> root element".into()));
        }
        Ok(state)
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Exclusive advisory lock on `<state>.lock`, released when dropped.
struct StateLock {
    file: File,
}

impl StateLock {
    fn acquire(path: &Path) -> Result<Self, StateError> {
        fs::create_dir_all(parent_dir(path))?;
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(PathBuf::from(lock_path))?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        FileExt::unlock(&self.file).ok();
    }
}

fn check_version(e: &BytesStart) -> Result<(), StateError> {
    match attribute(e, b"version")? {
        Some(v) if v != VERSION => Err(StateError::Invalid(format!("unsupported version '{v}'"))),
        _ => Ok(()),
    }
}

fn read_page(e: &BytesStart) -> Result<(String, PageRecord), StateError> {
    let output = attribute(e, b"output")?
        .ok_or_else(|| StateError::Invalid("<page> without an output attribute".into()))?;
    let input = attribute(e, b"input")?.unwrap_or_default();
    Ok((
        output,
        PageRecord {
            input,
            meta: PageMeta::default(),
        },
    ))
}

fn attribute(e: &BytesStart, name: &[u8]) -> Result<Option<String>, StateError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| StateError::Invalid(err.to_string()))?;
        if attr.key.local_name().as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|err| StateError::Invalid(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn write_section(out: &mut String, name: &str, pages: &BTreeMap<String, PageRecord>) {
    if pages.is_empty() {
        out.push_str(&format!("  <{name}/>\n"));
        return;
    }
    out.push_str(&format!("  <{name}>\n"));
    for (output, record) in pages {
        out.push_str(&format!(
            "    <page output=\"{}\" input=\"{}\">\n",
            escape(output.as_str()),
            escape(record.input.as_str())
        ));
        for (tag, value) in [
            ("title", &record.meta.title),
            ("summary", &record.meta.summary),
            ("date", &record.meta.date),
        ] {
            if let Some(value) = value {
                out.push_str(&format!("      <{tag}>{}</{tag}>\n", escape(value.as_str())));
            }
        }
        out.push_str("    </page>\n");
    }
    out.push_str(&format!("  </{name}>\n"));
}
