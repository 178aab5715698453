//! Batch stages around the core algorithms.
//!
//! Each stage walks a directory of inputs, processes the items
//! independently (in parallel where the items allow it) and collects a
//! [`StageReport`]. A failing item is recorded as a [`Skip`] and never
//! aborts the batch; only a stage with nothing to process at all fails.

pub mod group;
pub mod reduce;
pub mod select;

pub use group::run_group_stage;
pub use reduce::{ReduceOutcome, resolve_members, run_reduce_stage};
pub use select::run_select_stage;

use crate::calibrate::CalibrationError;
use crate::ensemble::ReduceError;
use crate::probability::ProbabilityError;
use crate::series_grouper::GroupingError;
use crate::slice::SliceError;
use crate::summary::SummaryError;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("nothing to process in {}", .0.display())]
    NothingToProcess(PathBuf),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("expected {expected} ensemble members, found {found}")]
    MemberCount { expected: usize, found: usize },

    #[error("grouping error: {0}")]
    Grouping(#[from] GroupingError),

    #[error("summary error: {0}")]
    Summary(#[from] SummaryError),
}

/// Why one slice of the select or reduce stage could not be processed.
#[derive(Debug, Error)]
pub enum SliceFailure {
    #[error(transparent)]
    Slice(#[from] SliceError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Reduce(#[from] ReduceError),

    #[error("cannot write image: {0}")]
    Image(#[from] image::ImageError),

    #[error("{}: {source}", path.display())]
    Probability {
        path: PathBuf,
        #[source]
        source: ProbabilityError,
    },

    #[error("no matching group folder in {}", .0.display())]
    MissingGroup(PathBuf),

    #[error("cannot read group folder: {0}")]
    GroupFolder(Arc<GroupingError>),

    #[error("file index {index} outside a group of {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),
}

impl PipelineError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An input item that was not processed, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Skip {
    pub item: String,
    pub reason: String,
}

impl Skip {
    pub fn new(item: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self {
            item: item.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.reason)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageReport {
    pub stage: &'static str,
    pub processed: usize,
    pub outputs: Vec<PathBuf>,
    pub skipped: Vec<Skip>,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    pub fn skip(&mut self, skip: Skip) {
        warn!(stage = self.stage, item = %skip.item, reason = %skip.reason, "skipped");
        self.skipped.push(skip);
    }

    pub fn output(&mut self, path: PathBuf) {
        self.processed += 1;
        self.outputs.push(path);
    }

    /// Fold per-item outcomes into the report, keeping their order.
    pub(crate) fn record_all(&mut self, outcomes: impl IntoIterator<Item = Result<PathBuf, Skip>>) {
        for outcome in outcomes {
            match outcome {
                Ok(path) => self.output(path),
                Err(skip) => self.skip(skip),
            }
        }
    }

    pub fn log_summary(&self, elapsed: std::time::Duration) {
        info!(
            stage = self.stage,
            processed = self.processed,
            skipped = self.skipped.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "stage finished"
        );
    }
}

/// Files directly inside `dir` whose extension is one of `extensions`,
/// sorted by path.
pub(crate) fn files_with_extension(
    dir: &Path,
    extensions: &[&str],
) -> Result<Vec<PathBuf>, PipelineError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(PipelineError::io(dir))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_keeps_outcome_order() {
        let mut report = StageReport::new("test");
        report.record_all([
            Ok(PathBuf::from("a")),
            Err(Skip::new("b", "broken")),
            Ok(PathBuf::from("c")),
        ]);
        assert_eq!(report.processed, 2);
        assert_eq!(report.outputs, [PathBuf::from("a"), PathBuf::from("c")]);
        assert_eq!(report.skipped[0].to_string(), "b: broken");
    }

    #[test]
    fn slice_failures_render_as_skip_reasons() {
        let skip = Skip::new("case__0009", SliceFailure::OutOfRange { index: 9, len: 3 });
        assert_eq!(skip.to_string(), "case__0009: file index 9 outside a group of 3");

        let missing = SliceFailure::MissingGroup(PathBuf::from("groups"));
        assert_eq!(missing.to_string(), "no matching group folder in groups");
    }
}
