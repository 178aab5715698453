use super::{PipelineError, Skip, SliceFailure, StageReport, files_with_extension};
use crate::calibrate;
use crate::config::SelectionConfig;
use crate::label_volume::LabelVolume;
use crate::naming::SliceId;
use crate::series_grouper::SeriesGrouper;
use crate::slice::Slice;

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use web_time::Instant;

/// Export the anchor slices of every segmented group as windowed 8-bit PNGs.
///
/// `labels_dir` holds one `<group-name>.npy` label volume per group folder in
/// `groups_dir`. Every z slice that contains the anchor label is mapped back
/// to its DICOM file, calibrated, windowed and written to `output_dir` under
/// its [`SliceId`].
pub fn run_select_stage(
    labels_dir: &Path,
    groups_dir: &Path,
    output_dir: &Path,
    config: &SelectionConfig,
) -> Result<StageReport, PipelineError> {
    let started = Instant::now();
    let mut report = StageReport::new("select");

    let volumes = files_with_extension(labels_dir, &["npy"])?;
    if volumes.is_empty() {
        return Err(PipelineError::NothingToProcess(labels_dir.to_path_buf()));
    }

    std::fs::create_dir_all(output_dir).map_err(PipelineError::io(output_dir))?;
    info!(volumes = volumes.len(), anchor_label = config.anchor_label, "selecting anchor slices");

    let outcomes: Vec<Vec<Result<PathBuf, Skip>>> = volumes
        .par_iter()
        .map(|path| select_from_volume(path, groups_dir, output_dir, config))
        .collect();

    report.record_all(outcomes.into_iter().flatten());
    report.log_summary(started.elapsed());
    Ok(report)
}

fn select_from_volume(
    volume_path: &Path,
    groups_dir: &Path,
    output_dir: &Path,
    config: &SelectionConfig,
) -> Vec<Result<PathBuf, Skip>> {
    let item = volume_path.display();
    let Some(group) = volume_path.file_stem().and_then(|stem| stem.to_str()) else {
        return vec![Err(Skip::new(item, "file name is not valid UTF-8"))];
    };

    let volume = match LabelVolume::open(volume_path) {
        Ok(volume) => volume,
        Err(err) => return vec![Err(Skip::new(item, err))],
    };

    let group_folder = groups_dir.join(group);
    if !group_folder.is_dir() {
        return vec![Err(Skip::new(item, "no matching group folder"))];
    }

    let slices = match SeriesGrouper::ordered_slices(&group_folder, config.sort_by) {
        Ok(slices) => slices,
        Err(err) => return vec![Err(Skip::new(group_folder.display(), err))],
    };

    let anchors = volume.slices_containing(config.anchor_label);
    if anchors.is_empty() {
        return vec![Err(Skip::new(
            item,
            format!("label {} not present", config.anchor_label),
        ))];
    }
    debug!(group, anchors = anchors.len(), files = slices.len(), "anchor slices found");

    anchors
        .into_iter()
        .map(|z| {
            let file_index = volume.file_index(z, config.reverse_slice_axis);
            let id = SliceId::new(group, file_index);
            slices
                .get(file_index)
                .ok_or(SliceFailure::OutOfRange {
                    index: file_index,
                    len: slices.len(),
                })
                .and_then(|slice| export_slice(slice, &id, output_dir, config))
                .map_err(|failure| Skip::new(&id, failure))
        })
        .collect()
}

fn export_slice(
    slice: &Slice,
    id: &SliceId,
    output_dir: &Path,
    config: &SelectionConfig,
) -> Result<PathBuf, SliceFailure> {
    let (slice, object) = Slice::open_with_pixels(&slice.path)?;
    let calibrated = calibrate::calibrated_pixels(&object, slice.rescale)?;
    let windowed = calibrate::window_to_u8(calibrated.view(), config.window);

    let path = output_dir.join(id.classifier_input_name());
    calibrate::to_gray_image(windowed.view())?.save(&path)?;
    debug!(slice = %id, source = %slice.path.display(), "exported anchor slice");
    Ok(path)
}
