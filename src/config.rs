//! Build configuration.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. stock defaults,
//! 2. an optional `xml2html.toml` (or the file named by `--config`),
//! 3. command-line flags.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! encoding = "utf-8"        # Output character encoding
//! strip = false             # Strip indentation and blank lines
//! keep_prologue = false     # Keep <?xml?> and <!DOCTYPE> in the output
//! selfclose = []            # Directives applied to the self-closing allow-list
//! preserve = []             # Directives applied to the preserve set
//! # header = "header.html"  # Header template file
//! # footer = "footer.html"  # Footer template file
//!
//! [params]                  # Extra @key@ values for header/footer
//! # site = "My Site"
//!
//! [transform]
//! program = "xsltproc"      # XSLT processor command
//! xinclude = true           # Process XInclude before transforming
//!
//! [state]
//! title = "/*/title"        # Metadata selectors; "" disables a field
//! summary = "/*/summary"
//! date = "/*/date"
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Tag-set directives use the `[+|!]tag[,tag...]` syntax and are applied in
//! order over the built-in defaults, config entries first, then `--selfclose`
//! / `--preserve` flags. Unknown keys are rejected to catch typos early.

use crate::encoding::{EncodingError, OutputEncoding};
use crate::render::RenderOptions;
use crate::select::{MetaSelectors, SelectorError};
use crate::tags::{DirectiveError, TagSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE: &str = "xml2html.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Output encoding label, e.g. `utf-8`, `latin1`, `ascii`.
    pub encoding: String,
    pub strip: bool,
    pub keep_prologue: bool,
    /// Directives for the self-closing allow-list.
    pub selfclose: Vec<String>,
    /// Directives for the preserve set.
    pub preserve: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<PathBuf>,
    /// Properties available to header/footer substitution.
    pub params: BTreeMap<String, String>,
    pub transform: TransformConfig,
    pub state: StateConfig,
    pub processing: ProcessingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
            strip: false,
            keep_prologue: false,
            selfclose: Vec::new(),
            preserve: Vec::new(),
            header: None,
            footer: None,
            params: BTreeMap::new(),
            transform: TransformConfig::default(),
            state: StateConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Config {
    /// Validate values that serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        OutputEncoding::from_label(&self.encoding)?;
        TagSet::default_selfclose().apply_all(&self.selfclose)?;
        TagSet::default_preserve().apply_all(&self.preserve)?;
        self.meta_selectors()?;
        if self.transform.program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "transform.program must not be empty".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        for name in self.params.keys() {
            if name.is_empty()
                || !name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
            {
                return Err(ConfigError::Validation(format!(
                    "params key '{name}' is not a valid parameter name"
                )));
            }
        }
        Ok(())
    }

    /// Fold the configured directives into the frozen pipeline settings.
    pub fn render_options(&self) -> Result<RenderOptions, ConfigError> {
        Ok(RenderOptions {
            drop_prologue: !self.keep_prologue,
            selfclose: Some(TagSet::default_selfclose().apply_all(&self.selfclose)?),
            preserve: TagSet::default_preserve().apply_all(&self.preserve)?,
            strip: self.strip,
            encoding: OutputEncoding::from_label(&self.encoding)?,
        })
    }

    pub fn meta_selectors(&self) -> Result<MetaSelectors, ConfigError> {
        Ok(MetaSelectors::parse(
            &self.state.title,
            &self.state.summary,
            &self.state.date,
        )?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// `xsltproc`-compatible command.
    pub program: String,
    pub xinclude: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: "xsltproc".to_string(),
            xinclude: true,
        }
    }
}

/// Selectors for the metadata recorded in the state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    pub title: String,
    pub summary: String,
    pub date: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            title: "/*/title".to_string(),
            summary: "/*/summary".to_string(),
            date: "/*/date".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of documents rendered at once.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Worker count for the build: `max_processes`, never above the core count.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    match config.max_processes {
        Some(limit) => limit.min(cores),
        None => cores,
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// The stock defaults as a `toml::Value::Table`, the base layer that user
/// overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Lay the file's values over the stock table. Sub-tables (`[transform]`,
/// `[params]`, ...) merge key by key; anything else, directive lists
/// included, is replaced outright.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut merged), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                let value = match merged.remove(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => value,
                };
                merged.insert(key, value);
            }
            toml::Value::Table(merged)
        }
        (_, replacement) => replacement,
    }
}

/// Read a config file as a raw TOML value; `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Turn the stock table plus the file's table (if any) into a checked
/// [`Config`].
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let value = match overlay {
        Some(file) => merge_toml(base, file),
        None => base,
    };
    let config: Config = value.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration.
///
/// An explicit path must exist. Without one, [`CONFIG_FILE`] in the working
/// directory is used when present and stock defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let overlay = match path {
        Some(p) if !p.exists() => return Err(ConfigError::NotFound(p.to_path_buf())),
        Some(p) => load_raw_config(p)?,
        None => load_raw_config(Path::new(CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value()?, overlay)
}

/// A fully-commented stock `xml2html.toml`, printed by `gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# xml2html Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Command-line flags override them.
# Unknown keys will cause an error.

# Output character encoding. Any WHATWG label works (utf-8, latin1,
# iso-8859-15, windows-1251, shift_jis, ...), plus "ascii" for strict 7-bit.
# Characters the encoding cannot represent fail the build.
encoding = "utf-8"

# Remove leading indentation and blank lines outside preserved tags.
strip = false

# Keep a leading <?xml ...?> declaration and <!DOCTYPE ...> in the output.
keep_prologue = false

# Tags allowed to stay self-closing (<br/>). Any other <tag/> is rewritten
# to <tag></tag>. Each entry is a directive applied to the default list
# (area, base, br, col, command, embed, hr, img, input, keygen, link, meta,
# param, source, track, wbr):
#   "+a,b"  add tags
#   "!a,b"  remove tags
#   "a,b"   replace the whole list
selfclose = []

# Tags whose content is never stripped. Same directive syntax, applied to
# the default list (pre, textarea, script, style).
# A preserved tag must not contain a nested tag of the same name.
preserve = []

# Header and footer templates. Whitespace around them is trimmed.
# @name@ is replaced by a parameter value, @@ by a literal @.
# header = "templates/header.html"
# footer = "templates/footer.html"

# ---------------------------------------------------------------------------
# Extra parameters for header/footer substitution (like -p name=value).
# Built-ins: input, output, root, relroot, state.
# ---------------------------------------------------------------------------
[params]
# site = "My Site"

# ---------------------------------------------------------------------------
# XSLT processor
# ---------------------------------------------------------------------------
[transform]
# Command invoked as: program [--xinclude] --stringparam NAME VALUE ... XSL XML
program = "xsltproc"

# Process XInclude elements in the input before transforming.
xinclude = true

# ---------------------------------------------------------------------------
# Page metadata recorded in the state document (build --state FILE).
# Selectors: /step, //step, * and a trailing /@attr. "" disables a field.
# ---------------------------------------------------------------------------
[state]
title = "/*/title"
summary = "/*/summary"
date = "/*/date"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum documents rendered in parallel.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
