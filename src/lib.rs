//! # xml2html
//!
//! A build helper for static sites written as XML and turned into HTML with an
//! XSLT stylesheet. `xsltproc` does the transformation; xml2html drives it over
//! one file or a whole source tree and cleans up what comes out.
//!
//! # Pipeline
//!
//! Every input document goes through the same fixed sequence:
//!
//! ```text
//! input.xml ─ transform ─ drop prologue ─ selfclose ─ strip ─ header/footer ─ encode ─ output.html
//! ```
//!
//! The transform stage is the only one that touches an external process.
//! Everything after it is a pure function from text to bytes, so the
//! post-processing can be unit tested without `xsltproc` installed.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`tags`] | Case-insensitive tag-name sets and `+a,b` / `!a` / `a,b` directives |
//! | [`markup`] | Shared scanning helpers: names, tag ends, line/column positions |
//! | [`selfclose`] | Rewrites `<x/>` to `<x></x>` for tags outside the void allow-list |
//! | [`strip`] | Removes indentation and blank lines outside preserved regions |
//! | [`params`] | Parameter maps, `@name@` substitution, `name=value` parsing, path helpers |
//! | [`encoding`] | Output encodings with strict, position-reporting encode |
//! | [`render`] | The post-transform pipeline as one call |
//! | [`transform`] | The `Transformer` seam: `xsltproc` or passthrough |
//! | [`select`] | Tiny path selectors that pull title/summary/date out of XML |
//! | [`state`] | The XML state document listing built pages across builds |
//! | [`config`] | `xml2html.toml` loading, merging and validation |
//! | [`generate`] | Job planning and the parallel build |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Text Scanning, Not Parsing
//!
//! The selfclose and strip stages work on the serialized HTML that the
//! stylesheet produced. They scan bytes for `<`, quotes and comment markers
//! rather than building a tree, so the output keeps the stylesheet's exact
//! attribute order, quoting and entity spelling. The self-close pass rejects
//! what it cannot skip safely: a comment, CDATA section, processing
//! instruction, quoted attribute value or tag left open at end of input.
//!
//! ## Built-in Parameters
//!
//! Each document gets `input` and `output` parameters, plus `root` and
//! `relroot` when a root is known and `state` when a state document is in
//! use. `relroot` is derived from the output's own location, so a single
//! header can link back to the site root from any depth. These go to both
//! the stylesheet and the header/footer.
//!
//! ## Failures Are Per Document
//!
//! A directory build keeps going when one document fails. Nothing is written
//! for the failed document, the error is reported next to its input path, and
//! the process exits non-zero at the end.

pub mod config;
pub mod encoding;
pub mod generate;
pub mod markup;
pub mod output;
pub mod params;
pub mod render;
pub mod select;
pub mod selfclose;
pub mod state;
pub mod strip;
pub mod tags;
pub mod transform;
