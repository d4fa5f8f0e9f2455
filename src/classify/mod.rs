//! Classification of raw copy-tool output lines.
//!
//! Robocopy emits semi-structured, locale-variant text: file operation rows
//! (`status<ws>size<tab>path`), summary tables, separators, and free-form
//! error messages, in the console language of the host. [`classify`] maps
//! every line to a [`ClassifiedLine`] deterministically and infallibly. Only
//! the status token of a structured row participates in error/extra/copy/skip
//! decisions, so a file literally named `FAILED_backup.txt` is never
//! misclassified from its name.

mod format;
mod rules;

pub use format::{format_file_line, format_size};

use rules::{
    COPYING, ERROR_LINE, EXTRA, FILE_LINE, INFO_STAMP, SEPARATOR, SKIPPED, SUMMARY,
};

/// Operation kind of a single output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Copying,
    Skipped,
    Extra,
    Error,
    Summary,
    Separator,
    Info,
    Plain,
}

/// Counter bucket a structured status token contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterCategory {
    Copied,
    Skipped,
    Extra,
}

/// A classified output line. Derived per line, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    pub kind: LineKind,
    /// Status token of a structured row, trimmed. `None` for unstructured
    /// lines; `Some("")` for a structured size/path row with no token.
    pub status: Option<String>,
    /// Raw size field of a structured row.
    pub size: Option<String>,
    /// Path field of a structured row, trimmed.
    pub path: Option<String>,
}

impl ClassifiedLine {
    fn unstructured(kind: LineKind) -> Self {
        Self {
            kind,
            status: None,
            size: None,
            path: None,
        }
    }

    /// Whether the line was a structured file-operation row.
    pub fn is_structured(&self) -> bool {
        self.status.is_some()
    }
}

/// Classify one raw output line. Pure and total: every input yields a
/// result, never an error.
pub fn classify(line: &str) -> ClassifiedLine {
    if let Some(caps) = FILE_LINE.captures(line) {
        let status = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let size = caps[2].to_string();
        let path = caps[3].trim().to_string();

        return ClassifiedLine {
            kind: status_kind(status),
            status: Some(status.to_string()),
            size: Some(size),
            path: Some(path),
        };
    }

    ClassifiedLine::unstructured(heuristic_kind(line))
}

/// Kind for a structured row, decided from the status token alone.
fn status_kind(status: &str) -> LineKind {
    if status.eq_ignore_ascii_case("FAILED") || status.eq_ignore_ascii_case("MISMATCH") {
        return LineKind::Error;
    }
    if EXTRA.is_match(status) {
        return LineKind::Extra;
    }
    if COPYING.is_match(status) {
        return LineKind::Copying;
    }
    if SKIPPED.is_match(status) {
        return LineKind::Skipped;
    }
    // Unknown or absent token: an untyped size/path row.
    LineKind::Plain
}

/// Whole-line fallback for unstructured lines, in strict priority order.
fn heuristic_kind(line: &str) -> LineKind {
    if line.trim().is_empty() {
        return LineKind::Plain;
    }
    if ERROR_LINE.is_match(line) {
        return LineKind::Error;
    }
    if EXTRA.is_match(line) {
        return LineKind::Extra;
    }
    if COPYING.is_match(line) {
        return LineKind::Copying;
    }
    if SKIPPED.is_match(line) {
        return LineKind::Skipped;
    }
    if SUMMARY.is_match(line) {
        return LineKind::Summary;
    }
    if SEPARATOR.is_match(line) {
        return LineKind::Separator;
    }
    if INFO_STAMP.is_match(line) {
        return LineKind::Info;
    }
    LineKind::Plain
}

/// Which run counter a structured status token increments, if any.
pub fn counter_category(status: &str) -> Option<CounterCategory> {
    if COPYING.is_match(status) {
        Some(CounterCategory::Copied)
    } else if SKIPPED.is_match(status) {
        Some(CounterCategory::Skipped)
    } else if EXTRA.is_match(status) {
        Some(CounterCategory::Extra)
    } else {
        None
    }
}
