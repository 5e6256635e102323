//! Building documents.
//!
//! Plans which output each input produces, then runs every job through
//! transform → render → write, in parallel on the rayon pool.
//!
//! ## Modes
//!
//! - **Single file**: one `-i INPUT` and an `-o OUTPUT` file. `-r ROOT` is
//!   optional and only feeds the `root`/`relroot` parameters.
//! - **Directory**: several inputs, or an `-o` that is an existing
//!   directory. `-r ROOT` is required and each input maps to
//!   `OUTPUT/<input relative to ROOT>.html`:
//!
//! ```text
//! -r src -o site  src/index.xml        →  site/index.html
//!                 src/blog/2024/a.xml  →  site/blog/2024/a.html   relroot = ../../
//! ```
//!
//! ## Parameters
//!
//! Each job gets built-in parameters (`input`, `output`, `root`, `relroot`,
//! `state`). The stylesheet receives the built-ins plus positional
//! parameters; header/footer substitution additionally sees properties.
//!
//! A job that fails writes nothing. Other jobs still run, and the caller
//! decides what the failures mean for the exit status.

use crate::encoding::{EncodingError, OutputEncoding};
use crate::params::{self, Params};
use crate::render::{self, RenderError, RenderOptions, Templates};
use crate::select::{MetaSelectors, SelectError};
use crate::state::{PageRecord, StateDocument, StateError};
use crate::transform::{TransformError, Transformer};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no input files given")]
    NoInputs,
    #[error("building several inputs into a directory requires -r ROOT")]
    RootRequired,
    #[error("input {} is not inside root {}", .input.display(), .root.display())]
    OutsideRoot { input: PathBuf, root: PathBuf },
    #[error("inputs {} and {} both map to {}", .first.display(), .second.display(), .output.display())]
    DuplicateOutput {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },
    #[error("cannot read template {}: {source}", .path.display())]
    Template {
        path: PathBuf,
        source: TemplateSource,
    },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{0} of {1} documents failed")]
    Failed(usize, usize),
}

#[derive(Error, Debug)]
pub enum TemplateSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Why a single document failed.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata extraction failed: {0}")]
    Select(#[from] SelectError),
}

/// One input → output pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Directory `relroot` points at.
    pub root: Option<PathBuf>,
}

impl Job {
    /// Built-in parameters for this job.
    pub fn builtins(&self, state: Option<&Path>) -> std::io::Result<Params> {
        let mut p = Params::new();
        p.set("input", params::slash_path(&self.input));
        p.set("output", params::slash_path(&self.output));
        if let Some(root) = &self.root {
            p.set("root", params::slash_path(root));
            p.set("relroot", params::relative_dir_link(&self.output, root)?);
        }
        if let Some(state) = state {
            p.set("state", params::slash_path(&params::absolute_path(state)?));
        }
        Ok(p)
    }
}

/// Decide which output each input produces.
pub fn plan_jobs(
    inputs: &[PathBuf],
    output: &Path,
    root: Option<&Path>,
) -> Result<Vec<Job>, GenerateError> {
    match inputs {
        [] => Err(GenerateError::NoInputs),
        [input] if !output.is_dir() => Ok(vec![Job {
            input: input.clone(),
            output: output.to_path_buf(),
            root: root.map(Path::to_path_buf),
        }]),
        _ => {
            let root = root.ok_or(GenerateError::RootRequired)?;
            let abs_root = params::absolute_path(root)?;
            let mut seen = BTreeSet::new();
            let mut jobs: Vec<Job> = Vec::with_capacity(inputs.len());

            for input in inputs {
                let abs_input = params::absolute_path(input)?;
                let rel = abs_input
                    .strip_prefix(&abs_root)
                    .map_err(|_| GenerateError::OutsideRoot {
                        input: input.clone(),
                        root: root.to_path_buf(),
                    })?;
                let target = output.join(rel).with_extension("html");
                if !seen.insert(target.clone()) {
                    let first = jobs
                        .iter()
                        .find(|j| j.output == target)
                        .map(|j| j.input.clone())
                        .unwrap_or_default();
                    return Err(GenerateError::DuplicateOutput {
                        first,
                        second: input.clone(),
                        output: target,
                    });
                }
                jobs.push(Job {
                    input: input.clone(),
                    output: target,
                    root: Some(output.to_path_buf()),
                });
            }
            Ok(jobs)
        }
    }
}

/// Read header/footer files, decoded with the output encoding.
pub fn load_templates(
    header: Option<&Path>,
    footer: Option<&Path>,
    encoding: OutputEncoding,
) -> Result<Templates, GenerateError> {
    let read = |path: Option<&Path>| -> Result<Option<String>, GenerateError> {
        let Some(path) = path else {
            return Ok(None);
        };
        let wrap = |source: TemplateSource| GenerateError::Template {
            path: path.to_path_buf(),
            source,
        };
        let bytes = fs::read(path).map_err(|e| wrap(e.into()))?;
        encoding.decode(&bytes).map(Some).map_err(|e| wrap(e.into()))
    };
    let header = read(header)?;
    let footer = read(footer)?;
    Ok(Templates::new(header.as_deref(), footer.as_deref()))
}

/// Everything a build needs besides the job list. Frozen before the first
/// document is processed and shared read-only across workers.
pub struct BuildContext<'a> {
    pub transformer: &'a dyn Transformer,
    pub templates: Templates,
    pub options: RenderOptions,
    /// `-p` properties and config `[params]`, for header/footer only.
    pub properties: Params,
    /// Positional parameters, for the stylesheet and header/footer.
    pub xslt_params: Params,
    /// State document and the selectors used to fill it.
    pub state: Option<(PathBuf, MetaSelectors)>,
}

/// Progress events, sent as documents finish.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Built { output: PathBuf, bytes: usize },
    Failed { input: PathBuf, error: String },
}

#[derive(Debug)]
pub struct BuiltPage {
    pub job: Job,
    pub bytes: usize,
    pub record: Option<PageRecord>,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<BuiltPage>,
    pub failed: Vec<(Job, JobError)>,
}

impl BuildReport {
    pub fn total(&self) -> usize {
        self.built.len() + self.failed.len()
    }
}

/// Transform, render and write one document.
///
/// Writing is the last step, so a job that fails leaves no output behind.
pub fn build_one(ctx: &BuildContext<'_>, job: &Job) -> Result<BuiltPage, JobError> {
    let state_path = ctx.state.as_ref().map(|(p, _)| p.as_path());
    let builtins = job.builtins(state_path)?;

    let xslt_params = builtins.merged(&ctx.xslt_params);
    let markup = ctx.transformer.transform(&job.input, &xslt_params)?;

    let template_params = builtins.merged(&ctx.properties).merged(&ctx.xslt_params);
    let bytes = render::render(&markup, &ctx.templates, &template_params, &ctx.options)?;

    let record = match &ctx.state {
        Some((_, selectors)) => {
            let xml = fs::read_to_string(&job.input)?;
            Some(PageRecord {
                input: params::slash_path(&job.input),
                meta: selectors.extract(&xml)?,
            })
        }
        None => None,
    };

    if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&job.output, &bytes)?;
    debug!(output = %job.output.display(), bytes = bytes.len(), "wrote document");

    Ok(BuiltPage {
        job: job.clone(),
        bytes: bytes.len(),
        record,
    })
}

/// Build all jobs in parallel, then stage successful pages in the state
/// document when one is configured.
pub fn build_all(
    ctx: &BuildContext<'_>,
    jobs: &[Job],
    events: Option<&Sender<BuildEvent>>,
) -> Result<BuildReport, GenerateError> {
    info!(documents = jobs.len(), "building");

    let results: Vec<(Job, Result<BuiltPage, JobError>)> = jobs
        .par_iter()
        .map(|job| {
            let result = build_one(ctx, job);
            if let Some(tx) = events {
                let event = match &result {
                    Ok(page) => BuildEvent::Built {
                        output: page.job.output.clone(),
                        bytes: page.bytes,
                    },
                    Err(e) => BuildEvent::Failed {
                        input: job.input.clone(),
                        error: e.to_string(),
                    },
                };
                tx.send(event).ok();
            }
            (job.clone(), result)
        })
        .collect();

    let mut report = BuildReport::default();
    for (job, result) in results {
        match result {
            Ok(page) => report.built.push(page),
            Err(e) => {
                warn!(input = %job.input.display(), error = %e, "document failed");
                report.failed.push((job, e));
            }
        }
    }

    if let Some((path, _)) = &ctx.state {
        StateDocument::update(path, |state| {
            for page in &report.built {
                if let Some(record) = &page.record {
                    state.record(params::slash_path(&page.job.output), record.clone());
                }
            }
        })?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Passthrough;
    use crate::transform::tests::MockTransformer;
    use tempfile::TempDir;

    fn context(transformer: &dyn Transformer) -> BuildContext<'_> {
        BuildContext {
            transformer,
            templates: Templates::default(),
            options: RenderOptions::default(),
            properties: Params::new(),
            xslt_params: Params::new(),
            state: None,
        }
    }

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    // =========================================================================
    // Job planning
    // =========================================================================

    #[test]
    fn single_file_job() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out.html");
        let jobs = plan_jobs(&[PathBuf::from("in.xml")], &out, None).unwrap();
        assert_eq!(
            jobs,
            vec![Job {
                input: PathBuf::from("in.xml"),
                output: out,
                root: None,
            }]
        );
    }

    #[test]
    fn no_inputs_is_error() {
        assert!(matches!(
            plan_jobs(&[], Path::new("out.html"), None),
            Err(GenerateError::NoInputs)
        ));
    }

    #[test]
    fn directory_mode_maps_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let site = tmp.path().join("site");
        let inputs = vec![src.join("index.xml"), src.join("blog/2024/a.xml")];

        let jobs = plan_jobs(&inputs, &site, Some(&src)).unwrap();
        assert_eq!(jobs[0].output, site.join("index.html"));
        assert_eq!(jobs[1].output, site.join("blog/2024/a.html"));
        assert_eq!(jobs[1].root.as_deref(), Some(site.as_path()));
    }

    #[test]
    fn directory_mode_for_single_input_into_existing_dir() {
        let tmp = TempDir::new().unwrap();
        let site = tmp.path().join("site");
        fs::create_dir_all(&site).unwrap();
        let input = tmp.path().join("src/page.xml");

        let jobs = plan_jobs(&[input], &site, Some(&tmp.path().join("src"))).unwrap();
        assert_eq!(jobs[0].output, site.join("page.html"));
    }

    #[test]
    fn directory_mode_requires_root() {
        let result = plan_jobs(
            &[PathBuf::from("a.xml"), PathBuf::from("b.xml")],
            Path::new("site"),
            None,
        );
        assert!(matches!(result, Err(GenerateError::RootRequired)));
    }

    #[test]
    fn input_outside_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = plan_jobs(
            &[tmp.path().join("src/a.xml"), tmp.path().join("other/b.xml")],
            &tmp.path().join("site"),
            Some(&tmp.path().join("src")),
        );
        assert!(matches!(result, Err(GenerateError::OutsideRoot { .. })));
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let result = plan_jobs(
            &[src.join("a.xml"), src.join("a.xhtml")],
            &tmp.path().join("site"),
            Some(&src),
        );
        assert!(matches!(result, Err(GenerateError::DuplicateOutput { .. })));
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    #[test]
    fn builtins_include_relroot_and_state() {
        let job = Job {
            input: PathBuf::from("src/blog/a.xml"),
            output: PathBuf::from("site/blog/a.html"),
            root: Some(PathBuf::from("site")),
        };
        let p = job.builtins(Some(Path::new("state.xml"))).unwrap();
        assert_eq!(p.get("input"), Some("src/blog/a.xml"));
        assert_eq!(p.get("output"), Some("site/blog/a.html"));
        assert_eq!(p.get("root"), Some("site"));
        assert_eq!(p.get("relroot"), Some("../"));
        assert!(p.get("state").unwrap().ends_with("/state.xml"));
    }

    #[test]
    fn builtins_without_root() {
        let job = Job {
            input: PathBuf::from("a.xml"),
            output: PathBuf::from("a.html"),
            root: None,
        };
        let p = job.builtins(None).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.get("relroot"), None);
    }

    #[test]
    fn stylesheet_sees_positional_but_not_properties() {
        let tmp = TempDir::new().unwrap();
        let mock = MockTransformer::with_outputs(&[("a.xml", "<p/>")]);
        let mut ctx = context(&mock);
        ctx.properties.set("prop", "1");
        ctx.xslt_params.set("mode", "full");

        let job = Job {
            input: tmp.path().join("a.xml"),
            output: tmp.path().join("a.html"),
            root: None,
        };
        build_one(&ctx, &job).unwrap();

        let calls = mock.get_calls();
        assert_eq!(calls[0].1.get("mode"), Some("full"));
        assert_eq!(calls[0].1.get("prop"), None);
        assert!(calls[0].1.get("input").is_some());
    }

    #[test]
    fn positional_params_win_in_templates() {
        let tmp = TempDir::new().unwrap();
        let mock = MockTransformer::with_outputs(&[("a.xml", "<p>x</p>")]);
        let mut ctx = context(&mock);
        ctx.templates = Templates::new(Some("<h1>@title@ @site@</h1>"), None);
        ctx.properties.set("title", "prop");
        ctx.properties.set("site", "S");
        ctx.xslt_params.set("title", "positional");

        let job = Job {
            input: tmp.path().join("a.xml"),
            output: tmp.path().join("a.html"),
            root: None,
        };
        build_one(&ctx, &job).unwrap();
        assert_eq!(
            fs::read_to_string(&job.output).unwrap(),
            "<h1>positional S</h1>\n<p>x</p>"
        );
    }

    // =========================================================================
    // Building
    // =========================================================================

    #[test]
    fn passthrough_build_writes_output() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "in.html", "<?xml version=\"1.0\"?>\n<div/>");
        let ctx = context(&Passthrough);
        let job = Job {
            input,
            output: tmp.path().join("nested/out.html"),
            root: None,
        };
        let page = build_one(&ctx, &job).unwrap();
        assert_eq!(fs::read_to_string(&job.output).unwrap(), "<div></div>");
        assert_eq!(page.bytes, 11);
        assert!(page.record.is_none());
    }

    #[test]
    fn failed_document_writes_nothing_others_continue() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let site = tmp.path().join("site");
        let good = write(&src, "good.html", "<p/>");
        let bad = write(&src, "bad.html", "<a href=\"x/>");

        let ctx = context(&Passthrough);
        let jobs = plan_jobs(&[good, bad], &site, Some(&src)).unwrap();
        let report = build_all(&ctx, &jobs, None).unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(report.built.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(site.join("good.html").exists());
        assert!(!site.join("bad.html").exists());
        assert!(matches!(
            report.failed[0].1,
            JobError::Render(RenderError::Malformed(_))
        ));
    }

    #[test]
    fn metadata_failure_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "page.html", "<div><p>a<br></p></div>");
        let output = tmp.path().join("page.out.html");
        let mut ctx = context(&Passthrough);
        ctx.state = Some((tmp.path().join("state.xml"), MetaSelectors::default()));

        let job = Job {
            input,
            output: output.clone(),
            root: None,
        };
        let err = build_one(&ctx, &job).unwrap_err();
        assert!(matches!(err, JobError::Select(_)));
        assert!(!output.exists());
    }

    #[test]
    fn events_are_sent_per_document() {
        let tmp = TempDir::new().unwrap();
        let input = write(tmp.path(), "a.html", "<p>x</p>");
        let ctx = context(&Passthrough);
        let jobs = plan_jobs(&[input], &tmp.path().join("a.out.html"), None).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        build_all(&ctx, &jobs, Some(&tx)).unwrap();
        drop(tx);
        let events: Vec<BuildEvent> = rx.into_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BuildEvent::Built { bytes: 8, .. }));
    }

    #[test]
    fn build_records_metadata_in_staging() {
        let tmp = TempDir::new().unwrap();
        let input = write(
            tmp.path(),
            "post.xml",
            "<post><title>Hello</title><date>2024-05-01</date></post>",
        );
        let state_path = tmp.path().join("state.xml");
        let mock = MockTransformer::with_outputs(&[("post.xml", "<p>x</p>")]);
        let mut ctx = context(&mock);
        ctx.state = Some((state_path.clone(), MetaSelectors::default()));

        let output = tmp.path().join("post.html");
        let jobs = plan_jobs(&[input], &output, None).unwrap();
        let report = build_all(&ctx, &jobs, None).unwrap();
        assert!(report.failed.is_empty());

        let state = StateDocument::load(&state_path).unwrap();
        let record = &state.staging()[&params::slash_path(&output)];
        assert_eq!(record.meta.title.as_deref(), Some("Hello"));
        assert_eq!(record.meta.date.as_deref(), Some("2024-05-01"));
        assert_eq!(record.meta.summary, None);
        assert!(state.pages().is_empty());
    }

    #[test]
    fn template_decoding_uses_output_encoding() {
        let tmp = TempDir::new().unwrap();
        let header = tmp.path().join("h.html");
        fs::write(&header, b"<p>caf\xe9</p>\n").unwrap();

        let latin1 = OutputEncoding::from_label("latin1").unwrap();
        let templates = load_templates(Some(&header), None, latin1).unwrap();
        assert_eq!(templates.header(), Some("<p>café</p>"));

        let err = load_templates(Some(&header), None, OutputEncoding::Utf8).unwrap_err();
        assert!(matches!(err, GenerateError::Template { .. }));
    }

    #[test]
    fn missing_template_is_error() {
        let err = load_templates(None, Some(Path::new("/nonexistent/f.html")), OutputEncoding::Utf8)
            .unwrap_err();
        assert!(matches!(err, GenerateError::Template { .. }));
    }
}
