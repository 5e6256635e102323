//! The post-processing pipeline applied to transformed markup.
//!
//! ```text
//! transformed markup
//!   → drop <?xml?> / <!DOCTYPE>      (unless the prologue is kept)
//!   → selfclose::normalize           (when an allow-list is configured)
//!   → strip::strip                   (when stripping is requested)
//!   → header + "\n" + body + "\n" + footer, with @key@ substitution
//!   → encode
//! ```
//!
//! Every stage is a pure function of its input. A failure at any stage
//! rejects the whole document: there is no partially rendered output.

use crate::encoding::{EncodingError, OutputEncoding};
use crate::markup;
use crate::params::{MissingParameter, Params};
use crate::selfclose::{self, MalformedMarkup};
use crate::strip;
use crate::tags::TagSet;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error(transparent)]
    Malformed(#[from] MalformedMarkup),
    #[error(transparent)]
    MissingParameter(#[from] MissingParameter),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl RenderError {
    /// True when the failure comes from configuration rather than from the
    /// document itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RenderError::MissingParameter(_) | RenderError::Encoding(EncodingError::Unsupported(_))
        )
    }
}

/// Frozen pipeline settings, built once before any document is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Remove a leading XML declaration and DOCTYPE.
    pub drop_prologue: bool,
    /// Tags allowed to stay self-closing. `None` skips normalization.
    pub selfclose: Option<TagSet>,
    pub preserve: TagSet,
    pub strip: bool,
    pub encoding: OutputEncoding,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            drop_prologue: true,
            selfclose: Some(TagSet::default_selfclose()),
            preserve: TagSet::default_preserve(),
            strip: false,
            encoding: OutputEncoding::Utf8,
        }
    }
}

/// Header and footer text, trimmed when constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Templates {
    header: Option<String>,
    footer: Option<String>,
}

impl Templates {
    pub fn new(header: Option<&str>, footer: Option<&str>) -> Self {
        Self {
            header: header.map(|h| h.trim().to_string()),
            footer: footer.map(|f| f.trim().to_string()),
        }
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    pub fn footer(&self) -> Option<&str> {
        self.footer.as_deref()
    }
}

/// Run the full pipeline and return the encoded bytes.
pub fn render(
    markup: &str,
    templates: &Templates,
    params: &Params,
    options: &RenderOptions,
) -> Result<Vec<u8>, RenderError> {
    let text = render_text(markup, templates, params, options)?;
    let bytes = options.encoding.encode(&text)?;
    debug!(bytes = bytes.len(), encoding = options.encoding.name(), "encoded output");
    Ok(bytes)
}

/// Every stage except the final encoding.
pub fn render_text(
    markup: &str,
    templates: &Templates,
    params: &Params,
    options: &RenderOptions,
) -> Result<String, RenderError> {
    let body = if options.drop_prologue {
        drop_prologue(markup)
    } else {
        markup
    };

    let body = match &options.selfclose {
        Some(allowed) => selfclose::normalize(body, allowed)?,
        None => body.to_string(),
    };

    let body = if options.strip {
        strip::strip(&body, &options.preserve)
    } else {
        body
    };

    let mut text = match templates.header() {
        Some(header) => {
            let mut out = params.substitute(header)?;
            out.push('\n');
            out.push_str(&body);
            out
        }
        None => body,
    };
    if let Some(footer) = templates.footer() {
        text.push('\n');
        text.push_str(&params.substitute(footer)?);
    }
    Ok(text)
}

/// Remove a leading `<?xml ...?>` and `<!DOCTYPE ...>`, each with the
/// whitespace after it. Input without either is returned unchanged.
pub fn drop_prologue(markup: &str) -> &str {
    let mut rest = markup.trim_start_matches('\u{feff}');
    let mut dropped = false;

    let candidate = rest.trim_start();
    if candidate.starts_with("<?xml")
        && candidate[5..].starts_with(|c: char| c.is_ascii_whitespace() || c == '?')
    {
        if let Some(end) = candidate.find("?>") {
            rest = candidate[end + 2..].trim_start();
            dropped = true;
        }
    }

    let candidate = rest.trim_start();
    if candidate.len() >= 9 && candidate.as_bytes()[..9].eq_ignore_ascii_case(b"<!DOCTYPE") {
        if let Ok(gt) = markup::find_tag_end(candidate.as_bytes(), 0) {
            rest = candidate[gt + 1..].trim_start();
            dropped = true;
        }
    }

    if dropped { rest } else { markup }
}
