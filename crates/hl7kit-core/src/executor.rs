//! Parallel validation of message files
//!
//! Each file is read, parsed (ER7 batches or a single XML message) and every
//! message in it validated. Files run on the rayon pool; results come back
//! in input order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::parser::{PipeParser, XmlParser, is_xml};
use crate::validation::{ValidationReport, Validator};
use crate::{Hl7Error, Result};

/// Progress reporting callback type
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information about execution progress
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total_files: usize,
    pub completed_files: usize,
    pub current_file: Option<PathBuf>,
    pub elapsed: Duration,
}

/// Outcome for one file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: PathBuf,
    /// One report per message, in file order
    pub messages: Vec<ValidationReport>,
    /// Set when the file could not be read or parsed
    pub error: Option<String>,
    /// Messages in a batch that failed to parse and were skipped
    pub skipped: usize,
    #[serde(skip)]
    pub duration: Duration,
}

impl FileReport {
    pub fn error_count(&self) -> usize {
        self.messages.iter().map(ValidationReport::error_count).sum::<usize>()
            + usize::from(self.error.is_some())
            + self.skipped
    }

    pub fn warning_count(&self) -> usize {
        self.messages
            .iter()
            .map(ValidationReport::warning_count)
            .sum()
    }

    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }
}

/// Totals over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub files: usize,
    pub messages: usize,
    pub errors: usize,
    pub warnings: usize,
    /// Files that could not be parsed at all
    pub failed_files: usize,
}

impl ExecutionSummary {
    pub fn from_reports(reports: &[FileReport]) -> Self {
        reports.iter().fold(Self::default(), |mut summary, report| {
            summary.files += 1;
            summary.messages += report.messages.len();
            summary.errors += report.error_count();
            summary.warnings += report.warning_count();
            summary.failed_files += usize::from(report.error.is_some());
            summary
        })
    }
}

/// Parses and validates files on the rayon pool
#[derive(Clone)]
pub struct ValidationExecutor {
    parser: PipeParser,
    xml: XmlParser,
    validator: Validator,
    progress: Option<ProgressCallback>,
}

impl ValidationExecutor {
    pub fn new(parser: PipeParser, validator: Validator) -> Self {
        let xml = XmlParser::new(parser.registry().clone(), parser.options().clone());
        Self {
            parser,
            xml,
            validator,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Parse and validate every message in `text`.
    ///
    /// A batch message that fails to parse is skipped and counted; the
    /// rest of the batch is still validated.
    pub fn validate_text(&self, text: &str) -> Result<(Vec<ValidationReport>, usize)> {
        let (messages, skipped) = if is_xml(text) {
            (vec![self.xml.parse(text)?], 0)
        } else {
            let batch = self.parser.parse_batch(text)?;
            (batch.messages, batch.skipped)
        };
        let reports = messages
            .iter()
            .map(|message| self.validator.validate(message))
            .collect();
        Ok((reports, skipped))
    }

    pub fn validate_file(&self, path: &Path) -> FileReport {
        let _span = info_span!("validate_file", path = %path.display()).entered();
        let start = Instant::now();
        let outcome = std::fs::read(path)
            .map_err(|e| Hl7Error::io_error(path, e))
            .and_then(|bytes| self.validate_text(&String::from_utf8_lossy(&bytes)));

        let (messages, skipped, error) = match outcome {
            Ok((messages, skipped)) => (messages, skipped, None),
            Err(e) => {
                warn!("Failed to process {}: {}", path.display(), e);
                (Vec::new(), 0, Some(e.to_string()))
            }
        };
        let duration = start.elapsed();
        debug!(
            "Processed {} message(s) from {} in {:?}",
            messages.len(),
            path.display(),
            duration
        );
        FileReport {
            path: path.to_path_buf(),
            messages,
            error,
            skipped,
            duration,
        }
    }

    /// Validate `files` in parallel, returning reports in input order
    pub fn validate_files(&self, files: &[PathBuf]) -> Vec<FileReport> {
        let total_files = files.len();
        let start = Instant::now();
        let completed = AtomicUsize::new(0);

        let mut indexed: Vec<(usize, FileReport)> = files
            .par_iter()
            .enumerate()
            .map(|(index, path)| {
                let report = self.validate_file(path);
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                self.report_progress(ProgressInfo {
                    total_files,
                    completed_files: done,
                    current_file: Some(path.clone()),
                    elapsed: start.elapsed(),
                });
                (index, report)
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        info!(
            "Validated {} file(s) in {:?}",
            total_files,
            start.elapsed()
        );
        indexed.into_iter().map(|(_, report)| report).collect()
    }

    fn report_progress(&self, info: ProgressInfo) {
        if let Some(callback) = &self.progress {
            callback(info);
        }
    }
}

/// Validate `files` in parallel with one parser/validator pair
pub fn validate_files(
    files: &[PathBuf],
    parser: &PipeParser,
    validator: &Validator,
) -> Vec<FileReport> {
    ValidationExecutor::new(parser.clone(), validator.clone()).validate_files(files)
}
