use super::{PipelineError, Skip, StageReport};
use crate::config::GroupingConfig;
use crate::naming;
use crate::series_grouper::SeriesGrouper;

use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use web_time::Instant;

/// Group every DICOM folder below `input_root` into axial series and copy
/// each series into its own folder under `output_root`.
///
/// Folders with no more than `min_files` DICOM files are skipped, as are
/// folders whose export names would collide with an earlier folder.
pub fn run_group_stage(
    input_root: &Path,
    output_root: &Path,
    config: &GroupingConfig,
) -> Result<StageReport, PipelineError> {
    let started = Instant::now();
    let mut report = StageReport::new("group");

    let folders = candidate_folders(input_root, &mut report)?;
    let mut eligible = Vec::new();
    let mut claimed: HashMap<String, PathBuf> = HashMap::new();

    for folder in folders {
        let count = match SeriesGrouper::count_dicom_files(&folder, &config.dicom_extension) {
            Ok(count) => count,
            Err(err) => {
                report.skip(Skip::new(folder.display(), err));
                continue;
            }
        };
        if count <= config.min_files {
            if count == 0 {
                debug!(folder = %folder.display(), "no DICOM files");
            } else {
                report.skip(Skip::new(
                    folder.display(),
                    format!("only {count} DICOM files (needs more than {})", config.min_files),
                ));
            }
            continue;
        }

        let stem = naming::group_folder_name(&folder, config.name_ancestor_depth, 0);
        if let Some(first) = claimed.get(&stem) {
            report.skip(Skip::new(
                folder.display(),
                format!("export names collide with {}", first.display()),
            ));
            continue;
        }
        claimed.insert(stem, folder.clone());
        eligible.push(folder);
    }

    if eligible.is_empty() {
        return Err(PipelineError::NothingToProcess(input_root.to_path_buf()));
    }

    std::fs::create_dir_all(output_root).map_err(PipelineError::io(output_root))?;
    info!(folders = eligible.len(), "grouping series folders");

    let outcomes: Vec<Vec<Result<PathBuf, Skip>>> = eligible
        .par_iter()
        .map(|folder| group_one(folder, output_root, config))
        .collect();

    report.record_all(outcomes.into_iter().flatten());
    report.log_summary(started.elapsed());
    Ok(report)
}

fn group_one(
    folder: &Path,
    output_root: &Path,
    config: &GroupingConfig,
) -> Vec<Result<PathBuf, Skip>> {
    let groups = match SeriesGrouper::group_folder(folder) {
        Ok(groups) => groups,
        Err(err) => return vec![Err(Skip::new(folder.display(), err))],
    };

    if groups.is_empty() {
        return vec![Err(Skip::new(folder.display(), "no axial slices"))];
    }

    info!(folder = %folder.display(), groups = groups.len(), "grouped axial series");
    match SeriesGrouper::export(&groups, folder, output_root, config.name_ancestor_depth) {
        Ok(created) => created.into_iter().map(Ok).collect(),
        Err(err) => vec![Err(Skip::new(folder.display(), err))],
    }
}

/// Every readable directory below `root`, including `root`, in file-name
/// order. Directories that cannot be walked are reported and left out.
fn candidate_folders(
    root: &Path,
    report: &mut StageReport,
) -> Result<Vec<PathBuf>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::NothingToProcess(root.to_path_buf()));
    }

    let mut folders = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => folders.push(entry.into_path()),
            Ok(_) => {}
            Err(err) => {
                let item = err.path().unwrap_or(root).to_path_buf();
                // the entry itself was listed before descending into it failed
                folders.retain(|folder| folder != &item);
                report.skip(Skip::new(item.display(), err));
            }
        }
    }
    Ok(folders)
}
