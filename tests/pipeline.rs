mod common;

use common::{SyntheticSlice, write_member, write_member_npy, write_slice};
use dicom_ensemble::config::{PipelineConfig, SelectionConfig};
use dicom_ensemble::pipeline::{self, PipelineError};
use dicom_ensemble::summary::{HEADER, UNDEFINED};
use ndarray::Array3;
use ndarray_npy::write_npy;
use std::fs;
use std::path::{Path, PathBuf};

const ROWS: u16 = 2;
const COLUMNS: u16 = 3;

/// Three 2x3 slices; file names deliberately disagree with instance order.
fn write_group(groups_dir: &Path) -> PathBuf {
    let folder = groups_dir.join("case_group1");
    let slices = [
        ("c.dcm", 1, vec![0i16; 6]),
        ("a.dcm", 2, vec![1024, 1034, 1044, 0, -2000, 1100]),
        ("b.dcm", 3, vec![24i16; 6]),
    ];
    for (name, instance, pixels) in slices {
        write_slice(
            &folder.join(name),
            &SyntheticSlice::axial("1.2.3.7", f64::from(instance), instance)
                .with_pixels(pixels, ROWS, COLUMNS),
        );
    }
    folder
}

fn write_members(root: &Path, file: &str) -> Vec<PathBuf> {
    let targets: [[f32; 6]; 3] = [
        [0.9, 0.9, 0.2, 0.1, 0.1, 0.8],
        [0.9, 0.9, 0.2, 0.1, 0.1, 0.8],
        [0.9, 0.6, 0.2, 0.1, 0.1, 0.4],
    ];
    targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let member = root.join(format!("ensemble_1_{i}"));
            write_member(&member.join(file), target, ROWS as usize, COLUMNS as usize);
            member
        })
        .collect()
}

#[test]
fn reduce_stage_measures_and_summarises() {
    let groups = tempfile::tempdir().unwrap();
    let ensemble = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let folder = write_group(groups.path());
    let members = write_members(ensemble.path(), "case_group1__0001.npz");

    let config = PipelineConfig::default();
    let outcome =
        pipeline::run_reduce_stage(&members, groups.path(), output.path(), &config).unwrap();

    assert_eq!(outcome.report.processed, 1);
    assert!(outcome.report.skipped.is_empty());
    let record = &outcome.records[0];
    assert_eq!(record.filename, "case_group1__0001");
    assert_eq!(PathBuf::from(&record.dicom_file_path), folder.join("a.dcm"));

    // mean map thresholds to [[1, 1, 0], [0, 0, 1]]
    assert_eq!(record.mask_pixels, 3);
    assert_eq!(record.mask_area, 0.75);
    assert_eq!(record.mask_volume, 1.5);
    let mean_hu = record.mask_mean_intensity.unwrap();
    assert!((mean_hu - 86.0 / 3.0).abs() < 1e-9);

    assert_eq!(record.uncertain_pixel_count, 2);
    assert!((record.mean_variance.unwrap() - (0.02 + 0.32 / 9.0) / 2.0).abs() < 1e-6);
    assert_eq!(record.mean_variance_percent, Some(50.0));
    assert_eq!(record.median_variance_percent, Some(50.0));
    assert_eq!(record.study_description, "CT ABDOMEN");
    assert_eq!(record.series_description, "No_SeriesDescription");

    assert!(output.path().join("prediction_case_group1__0001.png").is_file());
    assert!(output.path().join("uncertainty_case_group1__0001.png").is_file());

    let mask = image::open(output.path().join("prediction_case_group1__0001.png"))
        .unwrap()
        .to_luma8();
    assert_eq!(mask.dimensions(), (3, 2));
    assert_eq!(mask.get_pixel(0, 0).0, [255]);
    assert_eq!(mask.get_pixel(2, 0).0, [0]);

    let csv = fs::read_to_string(&outcome.summary_path).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next().unwrap(), HEADER.join(","));
    assert_eq!(lines.count(), 1);
}

#[test]
fn reduce_stage_reports_and_skips_bad_items() {
    let groups = tempfile::tempdir().unwrap();
    let ensemble = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_group(groups.path());

    let members = write_members(ensemble.path(), "case_group1__0009.npz");
    write_members(ensemble.path(), "missing_group1__0000.npz");
    write_members(ensemble.path(), "case_group1__0002.npz");
    write_member(&members[0].join("stray.npz"), &[0.5; 6], 2, 3);
    // shape mismatch in the last member
    write_member(&members[0].join("case_group1__0000.npz"), &[0.9; 6], 2, 3);
    write_member(&members[1].join("case_group1__0000.npz"), &[0.9; 6], 2, 3);
    write_member(&members[2].join("case_group1__0000.npz"), &[0.9; 6], 3, 2);

    let config = PipelineConfig::default();
    let outcome =
        pipeline::run_reduce_stage(&members, groups.path(), output.path(), &config).unwrap();

    let mut skipped: Vec<&str> = outcome
        .report
        .skipped
        .iter()
        .map(|skip| skip.item.as_str())
        .collect();
    skipped.sort();
    assert_eq!(outcome.report.skipped.len(), 4, "{:?}", outcome.report.skipped);
    assert!(skipped.iter().any(|item| item.ends_with("stray.npz")));
    assert!(skipped.contains(&"case_group1__0000"));
    assert!(skipped.contains(&"case_group1__0009"));
    assert!(skipped.contains(&"missing_group1__0000"));

    // slice 2 has identical members everywhere except the last two pixels
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].filename, "case_group1__0002");
    assert_eq!(outcome.records[0].mask_mean_intensity.map(f64::round), Some(-1000.0));

    let csv = fs::read_to_string(&outcome.summary_path).unwrap();
    assert_eq!(csv.lines().count(), 2);
}

#[test]
fn empty_mask_and_certain_ensemble_are_undefined() {
    let groups = tempfile::tempdir().unwrap();
    let ensemble = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_group(groups.path());

    let members: Vec<PathBuf> = (0..5)
        .map(|i| {
            let member = ensemble.path().join(format!("ensemble_2_{i}"));
            write_member(&member.join("case_group1__0000.npz"), &[0.1; 6], 2, 3);
            member
        })
        .collect();

    let outcome = pipeline::run_reduce_stage(
        &members,
        groups.path(),
        output.path(),
        &PipelineConfig::default(),
    )
    .unwrap();

    let record = &outcome.records[0];
    assert_eq!(record.mask_pixels, 0);
    assert_eq!(record.mask_mean_intensity, None);
    assert_eq!(record.uncertain_pixel_count, 0);
    assert_eq!(record.mean_variance, None);

    let csv = fs::read_to_string(&outcome.summary_path).unwrap();
    let row = csv.lines().nth(1).unwrap();
    assert_eq!(row.matches(UNDEFINED).count(), 5);
}

#[test]
fn members_are_discovered_and_counted() {
    let ensemble = tempfile::tempdir().unwrap();
    write_members(ensemble.path(), "case_group1__0001.npz");
    fs::create_dir(ensemble.path().join("final_output")).unwrap();

    let mut config = PipelineConfig::default();
    let members = pipeline::resolve_members(&config.ensemble, Some(ensemble.path())).unwrap();
    assert_eq!(members.len(), 3);
    assert!(members.windows(2).all(|w| w[0] < w[1]));

    config.ensemble.expected_members = Some(10);
    let err = pipeline::resolve_members(&config.ensemble, Some(ensemble.path())).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::MemberCount {
            expected: 10,
            found: 3
        }
    ));
}

#[test]
fn select_stage_exports_anchor_slices() {
    let groups = tempfile::tempdir().unwrap();
    let labels = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_group(groups.path());

    // (x, y, z) = (columns, rows, slices); label 29 on z = 0 only
    let mut volume = Array3::<u8>::zeros((3, 2, 3));
    volume[[1, 1, 0]] = 29;
    volume[[0, 0, 2]] = 5;
    write_npy(labels.path().join("case_group1.npy"), &volume).unwrap();
    write_npy(labels.path().join("unknown_group1.npy"), &volume).unwrap();

    let report = pipeline::run_select_stage(
        labels.path(),
        groups.path(),
        output.path(),
        &SelectionConfig::default(),
    )
    .unwrap();

    // reversed axis: z = 0 is the last file by instance number
    let exported = output.path().join("case_group1__0002_0000.png");
    assert_eq!(report.outputs, [exported.clone()]);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].item.ends_with("unknown_group1.npy"));

    let image = image::open(&exported).unwrap().to_luma8();
    assert_eq!(image.dimensions(), (3, 2));
    // 24 stored - 1024 = -1000 HU, below the window
    assert!(image.pixels().all(|p| p.0 == [0]));
}

#[test]
fn select_stage_without_volumes_fails() {
    let labels = tempfile::tempdir().unwrap();
    let err = pipeline::run_select_stage(
        labels.path(),
        labels.path(),
        labels.path(),
        &SelectionConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::NothingToProcess(_)));
}

#[test]
fn slice_in_two_formats_is_reduced_once() {
    let groups = tempfile::tempdir().unwrap();
    let ensemble = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_group(groups.path());
    let members = write_members(ensemble.path(), "case_group1__0001.npz");
    for member in &members {
        write_member_npy(&member.join("case_group1__0001.npy"), &[0.9; 6], 2, 3);
    }

    let outcome = pipeline::run_reduce_stage(
        &members,
        groups.path(),
        output.path(),
        &PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.report.skipped.len(), 1);
    assert!(outcome.report.skipped[0].item.ends_with("case_group1__0001.npz"));
    assert!(outcome.report.skipped[0].reason.contains("already provided"));

    // the .npy copy sorts first and is the one reduced
    assert_eq!(outcome.records[0].mask_pixels, 6);
    let csv = fs::read_to_string(&outcome.summary_path).unwrap();
    assert_eq!(csv.lines().count(), 2);
}
