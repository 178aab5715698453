//! # DICOM-ensemble library
//!
//! This crate reconstructs axial series from folders of DICOM files and
//! reduces ensembles of per-slice segmentation probabilities into a single
//! prediction with a measure of its uncertainty.

//!
//! The library builds on the dicom-rs ecosystem. It covers two pipelines
//! that meet on disk:
//!
//!  - **Series reconstruction.** Every slice is classified as axial,
//!    coronal, sagittal or oblique from its direction cosines. Axial slices
//!    are grouped by study, series, frame of reference, thickness, spacing,
//!    series and acquisition number, then ordered along z. Each group is
//!    copied into its own folder, ready for an external 3-D segmentation.
//!  - **Ensemble reduction.** The probability maps that N independent
//!    classifier runs produce for one slice are folded into a mean map, a
//!    variance map and a binary mask. Mask area, volume and mean calibrated
//!    intensity are measured against the original DICOM slice, and the
//!    disagreement between members is summarised per slice.
//!
//! Between the two, [`pipeline::run_select_stage`] picks the slices that
//! contain an anchor structure in the segmentation's label volume and writes
//! them as windowed 8-bit images for the classifier.
//!
//! Folders and slices are processed in parallel using rayon. A broken item
//! is reported and skipped; it never aborts the batch.
//!
//! # Examples
//!
//! ## Grouping the axial series of one folder
//!
//! ```no_run
//! # use dicom_ensemble::series_grouper::SeriesGrouper;
//! # use std::path::PathBuf;
//! let groups = SeriesGrouper::group_folder(PathBuf::from("dicom"))
//!     .expect("should have scanned the folder");
//! for (index, group) in groups.indexed() {
//!     println!("group {index}: {} slices", group.len());
//! }
//! ```
//!
//! ## Reducing an ensemble for one slice
//!
//! ```no_run
//! # use dicom_ensemble::ensemble::{self, ReducerConfig};
//! # use dicom_ensemble::probability::ProbabilityMap;
//! let maps: Vec<_> = (0..5)
//!     .map(|fold| ProbabilityMap::open(format!("ensemble_1_{fold}/case__0041.npz"), "probabilities"))
//!     .collect::<Result<_, _>>()
//!     .expect("should have loaded every member");
//! let result = ensemble::reduce(&maps, &ReducerConfig::default())
//!     .expect("members should share one shape");
//! let uncertainty = result.uncertainty(1e-4);
//! println!("{} uncertain pixels", uncertainty.count);
//! result.variance_image().unwrap().save("uncertainty.png").unwrap();
//! ```

pub mod calibrate;
pub mod config;
pub mod ensemble;
pub mod enums;
pub mod label_volume;
pub mod naming;
pub mod orientation;
pub mod pipeline;
pub mod probability;
pub mod series_grouper;
pub mod slice;
pub mod stats;
pub mod summary;
