//! The XSLT step.
//!
//! Transformation is delegated to an external engine behind the
//! [`Transformer`] trait so the rest of the build does not care how markup is
//! produced. Two implementations ship:
//!
//! | Transformer | Used when | Does |
//! |---|---|---|
//! | [`XsltProc`] | `-t STYLESHEET` given | runs `xsltproc [--xinclude] --stringparam ... STYLESHEET INPUT` |
//! | [`Passthrough`] | no stylesheet | reads the input as already-transformed markup |
//!
//! Output is read as UTF-8 unless it declares another encoding in its XML
//! declaration or a `charset` meta tag.
//!
//! Both must be `Sync`: documents are transformed from a rayon pool.

use crate::encoding::{self, EncodingError};
use crate::params::Params;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not run '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("'{program}' failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("cannot decode transform output of {}: {source}", .path.display())]
    Undecodable {
        path: PathBuf,
        source: EncodingError,
    },
}

pub trait Transformer: Sync {
    /// Transform `input`, exposing `params` to the stylesheet as string
    /// parameters. Returns the transformed markup.
    fn transform(&self, input: &Path, params: &Params) -> Result<String, TransformError>;
}

/// No stylesheet: the input already is the markup to post-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transformer for Passthrough {
    fn transform(&self, input: &Path, _params: &Params) -> Result<String, TransformError> {
        decode(input, &std::fs::read(input)?)
    }
}

/// Runs an `xsltproc`-compatible command line tool.
#[derive(Debug, Clone)]
pub struct XsltProc {
    pub program: String,
    pub stylesheet: PathBuf,
    pub xinclude: bool,
}

impl XsltProc {
    pub fn new(stylesheet: impl Into<PathBuf>) -> Self {
        Self {
            program: "xsltproc".to_string(),
            stylesheet: stylesheet.into(),
            xinclude: true,
        }
    }

    /// Arguments passed to the program, in order.
    pub fn args(&self, input: &Path, params: &Params) -> Vec<String> {
        let mut args = Vec::with_capacity(3 + params.len() * 3);
        if self.xinclude {
            args.push("--xinclude".to_string());
        }
        for (name, value) in params.iter() {
            args.push("--stringparam".to_string());
            args.push(name.to_string());
            args.push(value.to_string());
        }
        args.push(self.stylesheet.to_string_lossy().into_owned());
        args.push(input.to_string_lossy().into_owned());
        args
    }
}

impl Transformer for XsltProc {
    fn transform(&self, input: &Path, params: &Params) -> Result<String, TransformError> {
        let args = self.args(input, params);
        debug!(program = %self.program, ?args, "running transform");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| TransformError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransformError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        decode(input, &output.stdout)
    }
}

/// Markup is UTF-8 unless it declares another encoding
/// (`<xsl:output encoding="iso-8859-1"/>` puts one in the output).
fn decode(input: &Path, bytes: &[u8]) -> Result<String, TransformError> {
    encoding::decode_declared(bytes).map_err(|source| TransformError::Undecodable {
        path: input.to_path_buf(),
        source,
    })
}
