//! Per-slice summary records and their CSV output.

use crate::ensemble::{RegionStats, UncertaintyStats};

use serde::{Serialize, Serializer};
use std::path::Path;
use thiserror::Error;

/// Written in place of a statistic that has no value.
pub const UNDEFINED: &str = "undefined";

/// Column order of the summary file.
pub const HEADER: [&str; 13] = [
    "dicom_file_path",
    "filename",
    "uncertain_pixel_count",
    "mean_variance",
    "median_variance",
    "mean_variance_percent",
    "median_variance_percent",
    "mask_pixels",
    "mask_area",
    "mask_volume",
    "mask_mean_intensity",
    "study_description",
    "series_description",
];

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One reduced slice. Field order matches [`HEADER`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub dicom_file_path: String,
    pub filename: String,
    pub uncertain_pixel_count: usize,
    #[serde(serialize_with = "or_undefined")]
    pub mean_variance: Option<f64>,
    #[serde(serialize_with = "or_undefined")]
    pub median_variance: Option<f64>,
    #[serde(serialize_with = "or_undefined")]
    pub mean_variance_percent: Option<f64>,
    #[serde(serialize_with = "or_undefined")]
    pub median_variance_percent: Option<f64>,
    pub mask_pixels: usize,
    pub mask_area: f64,
    pub mask_volume: f64,
    #[serde(serialize_with = "or_undefined")]
    pub mask_mean_intensity: Option<f64>,
    pub study_description: String,
    pub series_description: String,
}

impl SummaryRecord {
    pub fn new(
        dicom_file_path: &Path,
        filename: impl Into<String>,
        uncertainty: &UncertaintyStats,
        region: &RegionStats,
        study_description: impl Into<String>,
        series_description: impl Into<String>,
    ) -> Self {
        let summary = uncertainty.summary.as_ref();
        Self {
            dicom_file_path: dicom_file_path.display().to_string(),
            filename: filename.into(),
            uncertain_pixel_count: uncertainty.count,
            mean_variance: summary.map(|s| s.mean_variance),
            median_variance: summary.map(|s| s.median_variance),
            mean_variance_percent: summary.map(|s| s.mean_percent),
            median_variance_percent: summary.map(|s| s.median_percent),
            mask_pixels: region.pixel_count,
            mask_area: region.area,
            mask_volume: region.volume,
            mask_mean_intensity: region.mean_intensity,
            study_description: study_description.into(),
            series_description: series_description.into(),
        }
    }
}

fn or_undefined<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) if value.is_finite() => serializer.serialize_f64(*value),
        _ => serializer.serialize_str(UNDEFINED),
    }
}

/// Write `records` as CSV. The header is written even when there are no rows.
pub fn write_csv<W: std::io::Write>(
    writer: W,
    records: &[SummaryRecord],
) -> Result<(), SummaryError> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv.write_record(HEADER)?;
    for record in records {
        csv.serialize(record)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &Path, records: &[SummaryRecord]) -> Result<(), SummaryError> {
    let file = std::fs::File::create(path)?;
    write_csv(std::io::BufWriter::new(file), records)
}
