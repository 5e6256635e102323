//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Pages are shown by what they are (title, output) first, with the source
//! file and other details as indented context lines. Untitled pages fall back
//! to their output path in parentheses.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! site/index.html (2.1 KB)
//! site/blog/a.html (812 B)
//! FAILED src/blog/b.xml
//!     malformed markup at line 3, column 9: unterminated quoted attribute value
//!
//! Built 2 of 3 documents, 1 failed
//! ```
//!
//! ## State
//!
//! ```text
//! Pages
//! 001 Hello → site/a.html
//!     Source: src/a.xml
//!     Date: 2024-05-01
//!     Summary: First post...
//!
//! Staging
//! 001 (site/b.html)
//!     Source: src/b.xml
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::generate::{BuildEvent, BuildReport};
use crate::state::{FinalizeReport, PageRecord, StateDocument};
use std::collections::BTreeMap;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Page header: title with its output, or the output alone in parens.
///
/// ```text
/// 001 Hello → site/a.html
/// 002 (site/b.html)
/// ```
fn page_line(index: usize, title: Option<&str>, output: &str) -> String {
    match title {
        Some(t) if !t.is_empty() => format!("{} {} → {}", format_index(index), t, output),
        _ => format!("{} ({})", format_index(index), output),
    }
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn human_bytes(n: usize) -> String {
    if n < 1024 {
        format!("{} B", n)
    } else if n < 1024 * 1024 {
        format!("{:.1} KB", n as f64 / 1024.0)
    } else {
        format!("{:.1} MB", n as f64 / (1024.0 * 1024.0))
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    match event {
        BuildEvent::Built { output, bytes } => {
            vec![format!("{} ({})", output.display(), human_bytes(*bytes))]
        }
        BuildEvent::Failed { input, error } => vec![
            format!("FAILED {}", input.display()),
            format!("{}{}", indent(1), error),
        ],
    }
}

pub fn format_build_summary(report: &BuildReport) -> Vec<String> {
    let total = report.total();
    let line = if report.failed.is_empty() {
        format!("Built {}", plural(total, "document"))
    } else {
        format!(
            "Built {} of {}, {} failed",
            report.built.len(),
            plural(total, "document"),
            report.failed.len()
        )
    };
    vec![String::new(), line]
}

pub fn print_build_summary(report: &BuildReport) {
    for line in format_build_summary(report) {
        println!("{}", line);
    }
}

// ============================================================================
// State
// ============================================================================

fn format_pages(heading: &str, pages: &BTreeMap<String, PageRecord>, lines: &mut Vec<String>) {
    lines.push(heading.to_string());
    if pages.is_empty() {
        lines.push(format!("{}(none)", indent(1)));
        return;
    }
    for (i, (output, record)) in pages.iter().enumerate() {
        lines.push(page_line(i + 1, record.meta.title.as_deref(), output));
        lines.push(format!("{}Source: {}", indent(1), record.input));
        if let Some(date) = &record.meta.date {
            lines.push(format!("{}Date: {}", indent(1), date));
        }
        if let Some(summary) = &record.meta.summary {
            lines.push(format!("{}Summary: {}", indent(1), truncate(summary, 60)));
        }
    }
}

pub fn format_state(state: &StateDocument) -> Vec<String> {
    let mut lines = Vec::new();
    format_pages("Pages", state.pages(), &mut lines);
    if !state.staging().is_empty() {
        lines.push(String::new());
        format_pages("Staging", state.staging(), &mut lines);
    }
    lines
}

pub fn print_state(state: &StateDocument) {
    for line in format_state(state) {
        println!("{}", line);
    }
}

pub fn format_finalize_report(report: &FinalizeReport, total: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for output in &report.pruned {
        lines.push(format!("Pruned {}", output));
    }
    lines.push(format!(
        "Promoted {}, pruned {}, {} in state",
        plural(report.promoted.len(), "page"),
        report.pruned.len(),
        total
    ));
    lines
}

pub fn print_finalize_report(report: &FinalizeReport, total: usize) {
    for line in format_finalize_report(report, total) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingError;
    use crate::generate::{BuiltPage, Job, JobError};
    use crate::select::PageMeta;
    use crate::transform::TransformError;
    use std::path::PathBuf;

    fn job(name: &str) -> Job {
        Job {
            input: PathBuf::from(format!("src/{name}.xml")),
            output: PathBuf::from(format!("site/{name}.html")),
            root: None,
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn page_line_with_title() {
        assert_eq!(page_line(1, Some("Hello"), "site/a.html"), "001 Hello → site/a.html");
    }

    #[test]
    fn page_line_without_title() {
        assert_eq!(page_line(12, None, "site/a.html"), "012 (site/a.html)");
        assert_eq!(page_line(1, Some(""), "a.html"), "001 (a.html)");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo world", 5), "héllo...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(812), "812 B");
        assert_eq!(human_bytes(2150), "2.1 KB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    // =========================================================================
    // Build
    // =========================================================================

    #[test]
    fn build_event_lines() {
        let built = BuildEvent::Built {
            output: PathBuf::from("site/a.html"),
            bytes: 812,
        };
        assert_eq!(format_build_event(&built), vec!["site/a.html (812 B)"]);

        let failed = BuildEvent::Failed {
            input: PathBuf::from("src/b.xml"),
            error: "boom".to_string(),
        };
        assert_eq!(format_build_event(&failed), vec!["FAILED src/b.xml", "    boom"]);
    }

    #[test]
    fn build_summary_all_ok() {
        let report = BuildReport {
            built: vec![BuiltPage {
                job: job("a"),
                bytes: 1,
                record: None,
            }],
            failed: vec![],
        };
        assert_eq!(format_build_summary(&report), vec!["", "Built 1 document"]);
    }

    #[test]
    fn build_summary_with_failures() {
        let report = BuildReport {
            built: vec![BuiltPage {
                job: job("a"),
                bytes: 1,
                record: None,
            }],
            failed: vec![(
                job("b"),
                JobError::Transform(TransformError::Undecodable {
                    path: PathBuf::from("src/b.xml"),
                    source: EncodingError::Undecodable("UTF-8"),
                }),
            )],
        };
        assert_eq!(
            format_build_summary(&report)[1],
            "Built 1 of 2 documents, 1 failed"
        );
    }

    // =========================================================================
    // State
    // =========================================================================

    #[test]
    fn state_listing() {
        let mut state = StateDocument::new();
        state.record(
            "site/b.html",
            PageRecord {
                input: "src/b.xml".into(),
                meta: PageMeta::default(),
            },
        );
        state.record(
            "site/a.html",
            PageRecord {
                input: "src/a.xml".into(),
                meta: PageMeta {
                    title: Some("Hello".into()),
                    summary: Some("First post".into()),
                    date: Some("2024-05-01".into()),
                },
            },
        );
        let lines = format_state(&state);
        assert_eq!(
            lines,
            vec![
                "Pages",
                "    (none)",
                "",
                "Staging",
                "001 Hello → site/a.html",
                "    Source: src/a.xml",
                "    Date: 2024-05-01",
                "    Summary: First post",
                "002 (site/b.html)",
                "    Source: src/b.xml",
            ]
        );
    }

    #[test]
    fn finalize_report_lines() {
        let report = FinalizeReport {
            promoted: vec!["a.html".into()],
            pruned: vec!["old.html".into()],
        };
        assert_eq!(
            format_finalize_report(&report, 4),
            vec!["Pruned old.html", "Promoted 1 page, pruned 1, 4 in state"]
        );
    }
}
