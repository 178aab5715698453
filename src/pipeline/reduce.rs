use super::{PipelineError, Skip, SliceFailure, StageReport, files_with_extension};
use crate::calibrate;
use crate::config::{EnsembleConfig, PipelineConfig};
use crate::ensemble::{self, PixelGeometry};
use crate::naming::SliceId;
use crate::probability::ProbabilityMap;
use crate::series_grouper::{GroupingError, SeriesGrouper};
use crate::slice::Slice;
use crate::summary::{self, SummaryRecord};

use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use web_time::Instant;

pub const SUMMARY_FILE: &str = "summary.csv";

const MEMBER_PREFIX: &str = "ensemble_";

#[derive(Clone, Debug, PartialEq)]
pub struct ReduceOutcome {
    pub report: StageReport,
    pub records: Vec<SummaryRecord>,
    pub summary_path: PathBuf,
}

/// Member folders from the configuration, or the `ensemble_*` folders of
/// `ensemble_root` in name order when none are configured.
pub fn resolve_members(
    config: &EnsembleConfig,
    ensemble_root: Option<&Path>,
) -> Result<Vec<PathBuf>, PipelineError> {
    let members = match (config.members.is_empty(), ensemble_root) {
        (false, _) => config.members.clone(),
        (true, Some(root)) => {
            let mut found: Vec<PathBuf> = std::fs::read_dir(root)
                .map_err(PipelineError::io(root))?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(MEMBER_PREFIX))
                })
                .collect();
            found.sort();
            found
        }
        (true, None) => Vec::new(),
    };

    if let Some(expected) = config.expected_members {
        if members.len() != expected {
            return Err(PipelineError::MemberCount {
                expected,
                found: members.len(),
            });
        }
    }
    Ok(members)
}

/// Reduce every slice predicted by the ensemble `members`.
///
/// The probability files of the first member define the slices. Each slice
/// is reduced, measured against its calibrated DICOM image from
/// `groups_dir`, rendered to `output_dir` and summarised in
/// [`SUMMARY_FILE`].
pub fn run_reduce_stage(
    members: &[PathBuf],
    groups_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<ReduceOutcome, PipelineError> {
    let started = Instant::now();
    let mut report = StageReport::new("reduce");

    let Some(first) = members.first() else {
        return Err(PipelineError::NothingToProcess(groups_dir.to_path_buf()));
    };
    let files = files_with_extension(first, &["npz", "npy"])?;
    if files.is_empty() {
        return Err(PipelineError::NothingToProcess(first.clone()));
    }

    let mut slices: Vec<(SliceId, PathBuf)> = Vec::with_capacity(files.len());
    let mut seen: HashMap<SliceId, PathBuf> = HashMap::new();
    for path in files {
        let Some(id) = SliceId::from_path(&path) else {
            report.skip(Skip::new(path.display(), "not a slice identifier"));
            continue;
        };
        if let Some(first) = seen.get(&id) {
            report.skip(Skip::new(
                path.display(),
                format!("slice {id} already provided by {}", first.display()),
            ));
            continue;
        }
        seen.insert(id.clone(), path.clone());
        slices.push((id, path));
    }

    std::fs::create_dir_all(output_dir).map_err(PipelineError::io(output_dir))?;
    info!(
        slices = slices.len(),
        members = members.len(),
        "reducing ensemble predictions"
    );

    let groups = load_groups(&slices, groups_dir, config);

    let outcomes: Vec<Result<(PathBuf, SummaryRecord), Skip>> = slices
        .par_iter()
        .map(|(id, path)| {
            reduce_slice(id, path, members, &groups, groups_dir, output_dir, config)
                .map(|record| (output_dir.join(id.prediction_name()), record))
                .map_err(|failure| Skip::new(id, failure))
        })
        .collect();

    let mut records = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Ok((prediction, record)) => {
                report.output(prediction);
                records.push(record);
            }
            Err(skip) => report.skip(skip),
        }
    }

    let summary_path = output_dir.join(SUMMARY_FILE);
    summary::write_csv_file(&summary_path, &records)?;
    info!(path = %summary_path.display(), rows = records.len(), "wrote summary");

    report.log_summary(started.elapsed());
    Ok(ReduceOutcome {
        report,
        records,
        summary_path,
    })
}

/// Ordered slices per group folder; groups without a folder are absent.
type GroupIndex = HashMap<String, Result<Vec<Slice>, Arc<GroupingError>>>;

/// Ordered member slices of every group referenced by `slices`.
fn load_groups(
    slices: &[(SliceId, PathBuf)],
    groups_dir: &Path,
    config: &PipelineConfig,
) -> GroupIndex {
    let names: BTreeSet<&str> = slices.iter().map(|(id, _)| id.group.as_str()).collect();
    names
        .into_par_iter()
        .filter_map(|name| {
            let folder = groups_dir.join(name);
            folder.is_dir().then(|| {
                let ordered = SeriesGrouper::ordered_slices(&folder, config.selection.sort_by)
                    .map_err(Arc::new);
                (name.to_string(), ordered)
            })
        })
        .collect()
}

fn reduce_slice(
    id: &SliceId,
    first_member_file: &Path,
    members: &[PathBuf],
    groups: &GroupIndex,
    groups_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<SummaryRecord, SliceFailure> {
    let file_name = first_member_file
        .file_name()
        .ok_or_else(|| SliceFailure::NoFileName(first_member_file.to_path_buf()))?;

    let maps = members
        .par_iter()
        .map(|member| {
            let path = member.join(file_name);
            ProbabilityMap::open(&path, &config.ensemble.array_name)
                .map_err(|source| SliceFailure::Probability { path, source })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let result = ensemble::reduce(&maps, &config.ensemble.reducer())?;

    let group = match groups.get(&id.group) {
        Some(Ok(group)) => group,
        Some(Err(err)) => return Err(SliceFailure::GroupFolder(Arc::clone(err))),
        None => return Err(SliceFailure::MissingGroup(groups_dir.to_path_buf())),
    };
    let slice = group.get(id.file_index).ok_or(SliceFailure::OutOfRange {
        index: id.file_index,
        len: group.len(),
    })?;

    let (slice, object) = Slice::open_with_pixels(&slice.path)?;
    let calibrated = calibrate::calibrated_pixels(&object, slice.rescale)?;

    let defaults = &config.defaults;
    let geometry = PixelGeometry {
        spacing: slice.pixel_spacing.unwrap_or(defaults.pixel_spacing),
        slice_thickness: *slice
            .slice_thickness
            .value_or(&defaults.slice_thickness),
    };
    let region = result.region_stats(calibrated.view(), geometry)?;
    let uncertainty = result.uncertainty(config.ensemble.variance_threshold);
    if region.mean_intensity.is_none() {
        info!(slice = %id, "empty mask, mean intensity undefined");
    }

    result
        .mask_image()?
        .save(output_dir.join(id.prediction_name()))?;
    result
        .variance_image()?
        .save(output_dir.join(id.uncertainty_name()))?;

    debug!(
        slice = %id,
        mask_pixels = region.pixel_count,
        uncertain_pixels = uncertainty.count,
        "reduced slice"
    );

    Ok(SummaryRecord::new(
        &slice.path,
        id.to_string(),
        &uncertainty,
        &region,
        slice
            .study_description
            .clone()
            .unwrap_or_else(|| defaults.study_description.clone()),
        slice
            .series_description
            .clone()
            .unwrap_or_else(|| defaults.series_description.clone()),
    ))
}
