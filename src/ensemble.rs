//! Reduction of an ensemble of probability maps into one prediction.
//!
//! For one slice, the target-class planes of N ensemble members are folded
//! into a per-pixel mean and population variance. The mean is thresholded
//! into a binary mask; the variance measures how much the members disagree.
//!
//! Two normalizations of the variance exist and are kept apart:
//!
//!  - [`UncertaintyStats`] rescales only the *uncertain* pixels (variance
//!    above a threshold) to `0..=100` for summary percentages.
//!  - [`EnsembleResult::variance_display`] rescales the *whole* map to
//!    `0..=255` for rendering.

use crate::calibrate::{self, CalibrationError};
use crate::probability::{ProbabilityError, ProbabilityMap};
use crate::stats;

use image::GrayImage;
use ndarray::{Array2, ArrayView2, Zip};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("no ensemble members to reduce")]
    NoMembers,

    #[error("member {member} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        member: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("member {member}: {source}")]
    Probability {
        member: usize,
        #[source]
        source: ProbabilityError,
    },

    #[error("mask has shape {mask:?} but the intensity image has {image:?}")]
    ImageShape {
        mask: (usize, usize),
        image: (usize, usize),
    },
}

/// Parameters of the per-slice reduction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReducerConfig {
    /// Channel holding the target tissue probability.
    pub target_class: usize,
    /// A pixel is foreground when its mean probability is strictly above this.
    pub mask_threshold: f64,
    /// Pixels with variance at or below this are considered certain.
    pub variance_threshold: f64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            target_class: 1,
            mask_threshold: 0.5,
            variance_threshold: 1e-4,
        }
    }
}

/// Streaming per-pixel mean and variance (Welford).
#[derive(Clone, Debug)]
pub struct EnsembleAccumulator {
    count: usize,
    mean: Array2<f64>,
    m2: Array2<f64>,
}

impl EnsembleAccumulator {
    pub fn new(shape: (usize, usize)) -> Self {
        Self {
            count: 0,
            mean: Array2::zeros(shape),
            m2: Array2::zeros(shape),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn push(&mut self, plane: ArrayView2<'_, f64>) -> Result<(), ReduceError> {
        if plane.dim() != self.mean.dim() {
            return Err(ReduceError::ShapeMismatch {
                member: self.count,
                expected: self.mean.dim(),
                found: plane.dim(),
            });
        }

        self.count += 1;
        let n = self.count as f64;
        Zip::from(&mut self.mean)
            .and(&mut self.m2)
            .and(&plane)
            .par_for_each(|mean, m2, &x| {
                let delta = x - *mean;
                *mean += delta / n;
                *m2 += delta * (x - *mean);
            });
        Ok(())
    }

    /// Mean and population variance, `None` before the first member.
    pub fn finish(self) -> Option<(Array2<f64>, Array2<f64>)> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        let variance = self.m2.mapv(|m2| (m2 / n).max(0.0));
        Some((self.mean, variance))
    }
}

/// Physical size of one pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelGeometry {
    pub spacing: (f64, f64),
    pub slice_thickness: f64,
}

/// Measurements over the foreground of the binary mask.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionStats {
    pub pixel_count: usize,
    pub area: f64,
    pub volume: f64,
    /// Mean calibrated intensity inside the mask, `None` for an empty mask.
    pub mean_intensity: Option<f64>,
}

/// Summary of the pixels the ensemble disagrees on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UncertaintyStats {
    pub count: usize,
    /// `None` when no pixel exceeds the threshold.
    pub summary: Option<UncertaintySummary>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UncertaintySummary {
    pub mean_variance: f64,
    pub median_variance: f64,
    pub mean_percent: f64,
    pub median_percent: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnsembleResult {
    pub members: usize,
    pub mean_map: Array2<f64>,
    pub variance_map: Array2<f64>,
    pub binary_mask: Array2<u8>,
}

/// Reduce the target-class planes of `maps`.
///
/// All members must share one shape; a mismatch fails the whole slice.
pub fn reduce(
    maps: &[ProbabilityMap],
    config: &ReducerConfig,
) -> Result<EnsembleResult, ReduceError> {
    let mut accumulator: Option<EnsembleAccumulator> = None;

    for (member, map) in maps.iter().enumerate() {
        let plane = map
            .class_plane(config.target_class)
            .map_err(|source| ReduceError::Probability { member, source })?;
        accumulator
            .get_or_insert_with(|| EnsembleAccumulator::new(plane.dim()))
            .push(plane.view())?;
    }

    let accumulator = accumulator.ok_or(ReduceError::NoMembers)?;
    reduce_accumulated(accumulator, config.mask_threshold)
}

/// Finish an accumulator into a result with a mask at `mask_threshold`.
pub fn reduce_accumulated(
    accumulator: EnsembleAccumulator,
    mask_threshold: f64,
) -> Result<EnsembleResult, ReduceError> {
    let members = accumulator.count();
    let (mean_map, variance_map) = accumulator.finish().ok_or(ReduceError::NoMembers)?;
    let binary_mask = mean_map.mapv(|p| u8::from(p > mask_threshold));

    Ok(EnsembleResult {
        members,
        mean_map,
        variance_map,
        binary_mask,
    })
}

impl EnsembleResult {
    pub fn shape(&self) -> (usize, usize) {
        self.mean_map.dim()
    }

    pub fn mask_pixel_count(&self) -> usize {
        self.binary_mask.iter().filter(|&&m| m == 1).count()
    }

    /// Area, volume and mean intensity of the mask over `calibrated`.
    pub fn region_stats(
        &self,
        calibrated: ArrayView2<'_, i16>,
        geometry: PixelGeometry,
    ) -> Result<RegionStats, ReduceError> {
        if calibrated.dim() != self.shape() {
            return Err(ReduceError::ImageShape {
                mask: self.shape(),
                image: calibrated.dim(),
            });
        }

        let inside: Vec<f64> = Zip::from(&self.binary_mask)
            .and(&calibrated)
            .fold(Vec::new(), |mut inside, &m, &v| {
                if m == 1 {
                    inside.push(f64::from(v));
                }
                inside
            });

        let pixel_count = inside.len();
        let area = region_area(pixel_count, geometry.spacing);
        Ok(RegionStats {
            pixel_count,
            area,
            volume: area * geometry.slice_thickness,
            mean_intensity: stats::mean(&inside),
        })
    }

    /// Statistics over pixels with variance strictly above `threshold`.
    pub fn uncertainty(&self, threshold: f64) -> UncertaintyStats {
        let mut uncertain: Vec<f64> = self
            .variance_map
            .iter()
            .copied()
            .filter(|&v| v > threshold)
            .collect();

        let count = uncertain.len();
        let percent = normalize_percent(&uncertain);
        let mut percent: Vec<f64> = percent.into_iter().map(f64::from).collect();

        let summary = match (
            stats::mean(&uncertain),
            stats::median(&mut uncertain),
            stats::mean(&percent),
            stats::median(&mut percent),
        ) {
            (Some(mean_variance), Some(median_variance), Some(mean_percent), Some(median_percent)) => {
                Some(UncertaintySummary {
                    mean_variance,
                    median_variance,
                    mean_percent,
                    median_percent,
                })
            }
            _ => None,
        };

        UncertaintyStats { count, summary }
    }

    /// Whole variance map rescaled to `0..=255`.
    pub fn variance_display(&self) -> Array2<u8> {
        normalize_display(self.variance_map.view())
    }

    /// Binary mask as 0/255.
    pub fn mask_display(&self) -> Array2<u8> {
        self.binary_mask.mapv(|m| m * 255)
    }

    pub fn variance_image(&self) -> Result<GrayImage, CalibrationError> {
        calibrate::to_gray_image(self.variance_display().view())
    }

    pub fn mask_image(&self) -> Result<GrayImage, CalibrationError> {
        calibrate::to_gray_image(self.mask_display().view())
    }
}

pub fn region_area(pixel_count: usize, spacing: (f64, f64)) -> f64 {
    pixel_count as f64 * spacing.0 * spacing.1
}

/// Min-max rescale of the uncertain variances to `0..=100`.
pub fn normalize_percent(uncertain: &[f64]) -> Vec<u8> {
    let Some((min, max)) = stats::min_max(uncertain) else {
        return Vec::new();
    };
    uncertain
        .iter()
        .map(|&v| stats::rescale_to(v, min, max, 100))
        .collect()
}

/// Min-max rescale of a full map to `0..=255`.
pub fn normalize_display(map: ArrayView2<'_, f64>) -> Array2<u8> {
    match stats::min_max(map.iter()) {
        Some((min, max)) => map.mapv(|v| stats::rescale_to(v, min, max, 255)),
        None => Array2::zeros(map.dim()),
    }
}
