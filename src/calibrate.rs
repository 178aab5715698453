//! Conversion of stored pixel values into calibrated intensity units.

use dicom::object::DefaultDicomObject;
use dicom::pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use image::{GrayImage, ImageBuffer};
use ndarray::{Array2, ArrayView2, s};
use rayon::prelude::*;
use serde::Deserialize;
use thiserror::Error;

/// Stored value some vendors use for pixels outside the reconstruction circle.
pub const OUTSIDE_SCAN: i16 = -2000;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("image of {width}x{height} pixels cannot be rendered")]
    Render { width: usize, height: usize },
}

/// Linear rescale parameters of one slice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

/// Calibrated intensity band rendered to 8 bits.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct Window {
    pub low: i16,
    pub high: i16,
}

impl Default for Window {
    /// Skeletal muscle band.
    fn default() -> Self {
        Self { low: -29, high: 150 }
    }
}

/// Calibrate raw stored values.
///
/// [`OUTSIDE_SCAN`] pixels are zeroed first. The slope is applied only when
/// it differs from 1, then the intercept is added; the result saturates at
/// the `i16` bounds.
pub fn calibrate(raw: ArrayView2<'_, i16>, rescale: Rescale) -> Array2<i16> {
    let intercept = rescale.intercept.round() as i16;
    let scale = rescale.slope != 1.0;

    raw.mapv(|value| {
        let value = if value == OUTSIDE_SCAN { 0 } else { value };
        let value = if scale {
            (f64::from(value) * rescale.slope).round() as i16
        } else {
            value
        };
        value.saturating_add(intercept)
    })
}

/// Decode the first frame of a DICOM image as raw stored values, without
/// applying the modality LUT.
pub fn stored_pixels(object: &DefaultDicomObject) -> Result<Array2<i16>, CalibrationError> {
    let pixel_data = object.decode_pixel_data()?;
    let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
    let array = pixel_data.to_ndarray_with_options::<i16>(&options)?;
    Ok(array.slice_move(s![0, .., .., 0]))
}

/// Decode and calibrate the first frame of a DICOM image.
pub fn calibrated_pixels(
    object: &DefaultDicomObject,
    rescale: Rescale,
) -> Result<Array2<i16>, CalibrationError> {
    let raw = stored_pixels(object)?;
    Ok(calibrate(raw.view(), rescale))
}

/// Clip calibrated values to `window` and stretch the band over 0..=255.
pub fn window_to_u8(calibrated: ArrayView2<'_, i16>, window: Window) -> Array2<u8> {
    let low = f64::from(window.low);
    let range = f64::from(window.high) - low;

    calibrated.mapv(|value| {
        if range <= 0.0 {
            return 0;
        }
        let clipped = value.clamp(window.low, window.high);
        ((f64::from(clipped) - low) * 255.0 / range).round() as u8
    })
}

/// Row-major 8-bit pixels as a grayscale image.
pub fn to_gray_image(pixels: ArrayView2<'_, u8>) -> Result<GrayImage, CalibrationError> {
    let (height, width) = pixels.dim();
    let data: Vec<u8> = pixels.into_par_iter().copied().collect();
    ImageBuffer::from_raw(width as u32, height as u32, data)
        .ok_or(CalibrationError::Render { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn unit_slope_only_adds_intercept() {
        let raw = array![[0i16, 1024, 40]];
        let hu = calibrate(
            raw.view(),
            Rescale {
                slope: 1.0,
                intercept: -1024.0,
            },
        );
        assert_eq!(hu, array![[-1024i16, 0, -984]]);
    }

    #[test]
    fn outside_scan_is_zeroed_before_calibration() {
        let raw = array![[OUTSIDE_SCAN, -1999]];
        let hu = calibrate(
            raw.view(),
            Rescale {
                slope: 1.0,
                intercept: -1024.0,
            },
        );
        assert_eq!(hu, array![[-1024i16, -3023]]);
    }

    #[test]
    fn slope_is_applied_and_rounded() {
        let raw = array![[3i16, 100]];
        let hu = calibrate(
            raw.view(),
            Rescale {
                slope: 0.5,
                intercept: 10.0,
            },
        );
        assert_eq!(hu, array![[12i16, 60]]);
    }

    #[test]
    fn calibration_saturates() {
        let raw = array![[i16::MIN + 1]];
        let hu = calibrate(
            raw.view(),
            Rescale {
                slope: 1.0,
                intercept: -1024.0,
            },
        );
        assert_eq!(hu[[0, 0]], i16::MIN);
    }

    #[test]
    fn window_clips_and_stretches() {
        let hu = array![[-500i16, -29, 150, 1000]];
        let png = window_to_u8(hu.view(), Window::default());
        assert_eq!(png, array![[0u8, 0, 255, 255]]);
    }

    #[test]
    fn gray_image_keeps_dimensions() {
        let pixels = Array2::<u8>::zeros((3, 5));
        let image = to_gray_image(pixels.view()).unwrap();
        assert_eq!(image.dimensions(), (5, 3));
    }

    #[test]
    fn gray_image_is_row_major() {
        let pixels = Array2::from_shape_fn((2, 3), |(y, x)| (y * 10 + x) as u8);
        let image = to_gray_image(pixels.view()).unwrap();
        assert_eq!(image.get_pixel(2, 0).0, [2]);
        assert_eq!(image.get_pixel(0, 1).0, [10]);
        assert_eq!(image.into_raw(), vec![0, 1, 2, 10, 11, 12]);
    }
}
