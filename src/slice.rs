use crate::calibrate::Rescale;
use crate::enums::{Defaulted, Orientation};
use crate::orientation::{self, DirectionCosine};

use dicom::core::Tag;
use dicom::object::{DefaultDicomObject, InMemDicomObject, OpenFileOptions, open_file};
use dicom_dictionary_std::tags;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Slice thickness assumed when the header carries none.
pub const DEFAULT_SLICE_THICKNESS: f64 = 1e-4;

/// Patient position assumed when the header carries none.
pub const ORIGIN: [f64; 3] = [0.0, 0.0, 0.0];

#[derive(Debug, Error)]
pub enum SliceError {
    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

/// Header attributes of one 2-D DICOM image.
#[derive(Clone, Debug, PartialEq)]
pub struct Slice {
    pub path: PathBuf,
    pub study_id: Defaulted<String>,
    pub series_id: Defaulted<String>,
    pub frame_of_reference_id: Defaulted<String>,
    pub slice_thickness: Defaulted<f64>,
    pub spacing_between_slices: Defaulted<f64>,
    pub position: Defaulted<[f64; 3]>,
    pub series_number: Defaulted<String>,
    pub acquisition_number: Defaulted<String>,
    pub orientation_vectors: Option<(DirectionCosine, DirectionCosine)>,
    pub instance_number: Option<i32>,
    pub pixel_spacing: Option<(f64, f64)>,
    pub rescale: Rescale,
    pub study_description: Option<String>,
    pub series_description: Option<String>,
}

impl Slice {
    /// Read the header of a DICOM file, stopping before the pixel data.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SliceError> {
        let path = path.as_ref();
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)?;
        Ok(Self::from_dicom_object(&object, path))
    }

    /// Read a DICOM file including its pixel data.
    pub fn open_with_pixels(
        path: impl AsRef<Path>,
    ) -> Result<(Self, DefaultDicomObject), SliceError> {
        let path = path.as_ref();
        let object = open_file(path)?;
        let slice = Self::from_dicom_object(&object, path);
        Ok((slice, object))
    }

    pub fn from_dicom_object(object: &InMemDicomObject, path: impl Into<PathBuf>) -> Self {
        let orientation_vectors = floats(object, tags::IMAGE_ORIENTATION_PATIENT)
            .filter(|values| values.len() >= 6)
            .map(|v| ([v[0], v[1], v[2]], [v[3], v[4], v[5]]));

        let position = floats(object, tags::IMAGE_POSITION_PATIENT)
            .filter(|values| values.len() >= 3)
            .map(|v| [v[0], v[1], v[2]]);

        let pixel_spacing = floats(object, tags::PIXEL_SPACING)
            .filter(|values| values.len() >= 2)
            .map(|v| (v[0], v[1]));

        let rescale = Rescale {
            slope: float(object, tags::RESCALE_SLOPE).unwrap_or(1.0),
            intercept: float(object, tags::RESCALE_INTERCEPT).unwrap_or(0.0),
        };

        Self {
            path: path.into(),
            study_id: Defaulted::from_option(text(object, tags::STUDY_INSTANCE_UID)),
            series_id: Defaulted::from_option(text(object, tags::SERIES_INSTANCE_UID)),
            frame_of_reference_id: Defaulted::from_option(text(
                object,
                tags::FRAME_OF_REFERENCE_UID,
            )),
            slice_thickness: Defaulted::from_option(float(object, tags::SLICE_THICKNESS)),
            spacing_between_slices: Defaulted::from_option(float(
                object,
                tags::SPACING_BETWEEN_SLICES,
            )),
            position: Defaulted::from_option(position),
            series_number: Defaulted::from_option(text(object, tags::SERIES_NUMBER)),
            acquisition_number: Defaulted::from_option(text(object, tags::ACQUISITION_NUMBER)),
            orientation_vectors,
            instance_number: object
                .element(tags::INSTANCE_NUMBER)
                .ok()
                .and_then(|element| element.to_int::<i32>().ok()),
            pixel_spacing,
            rescale,
            study_description: text(object, tags::STUDY_DESCRIPTION),
            series_description: text(object, tags::SERIES_DESCRIPTION),
        }
    }

    pub fn orientation(&self) -> Orientation {
        match &self.orientation_vectors {
            Some((row, column)) => orientation::classify(Some(row), Some(column)),
            None => orientation::classify(None, None),
        }
    }

    pub fn is_axial(&self) -> bool {
        self.orientation() == Orientation::Axial
    }

    /// Position along the patient z axis, the origin when unknown.
    pub fn z_position(&self) -> f64 {
        self.position.value_or(&ORIGIN)[2]
    }

    pub fn thickness_or_default(&self) -> f64 {
        *self.slice_thickness.value_or(&DEFAULT_SLICE_THICKNESS)
    }
}

fn text(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches('\0').trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn float(object: &InMemDicomObject, tag: Tag) -> Option<f64> {
    object.element(tag).ok()?.to_float64().ok()
}

fn floats(object: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    object.element(tag).ok()?.to_multi_float64().ok()
}
