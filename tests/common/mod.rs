#![allow(dead_code)]

use dicom::core::{DataElement, PrimitiveValue, VR, dicom_value};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::tags;
use ndarray::{Array3, Array4};
use ndarray_npy::{NpzWriter, write_npy};
use std::fs::{self, File};
use std::path::Path;

pub const AXIAL: [&str; 6] = ["1", "0", "0", "0", "1", "0"];
pub const CORONAL: [&str; 6] = ["1", "0", "0", "0", "0", "-1"];

/// Header attributes of a synthetic CT slice.
#[derive(Clone, Debug)]
pub struct SyntheticSlice {
    pub series: &'static str,
    pub orientation: [&'static str; 6],
    pub z: f64,
    pub instance: i32,
    pub thickness: &'static str,
    /// Stored pixel values, row-major, with their (rows, columns).
    pub pixels: Option<(Vec<i16>, u16, u16)>,
}

impl SyntheticSlice {
    pub fn axial(series: &'static str, z: f64, instance: i32) -> Self {
        Self {
            series,
            orientation: AXIAL,
            z,
            instance,
            thickness: "2.0",
            pixels: None,
        }
    }

    pub fn with_pixels(mut self, values: Vec<i16>, rows: u16, columns: u16) -> Self {
        self.pixels = Some((values, rows, columns));
        self
    }
}

pub fn write_slice(path: &Path, slice: &SyntheticSlice) {
    let sop_instance = format!("1.2.826.0.1.{}.{}", slice.series.len(), slice.instance);
    let z = slice.z.to_string();
    let mut object = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2")),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance.as_str())),
        DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.1")),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(slice.series)),
        DataElement::new(tags::FRAME_OF_REFERENCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.9")),
        DataElement::new(tags::STUDY_DESCRIPTION, VR::LO, PrimitiveValue::from("CT ABDOMEN")),
        DataElement::new(tags::SERIES_NUMBER, VR::IS, PrimitiveValue::from("3")),
        DataElement::new(tags::ACQUISITION_NUMBER, VR::IS, PrimitiveValue::from("1")),
        DataElement::new(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from(slice.instance.to_string())),
        DataElement::new(tags::SLICE_THICKNESS, VR::DS, PrimitiveValue::from(slice.thickness)),
        DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            dicom_value!(Strs, ["-100", "-100", z.as_str()]),
        ),
        DataElement::new(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            dicom_value!(
                Strs,
                [
                    slice.orientation[0],
                    slice.orientation[1],
                    slice.orientation[2],
                    slice.orientation[3],
                    slice.orientation[4],
                    slice.orientation[5]
                ]
            ),
        ),
        DataElement::new(tags::PIXEL_SPACING, VR::DS, dicom_value!(Strs, ["0.5", "0.5"])),
        DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("-1024")),
        DataElement::new(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1")),
    ]);

    if let Some((values, rows, columns)) = &slice.pixels {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        object.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1u16)));
        object.put(DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ));
        object.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(*rows)));
        object.put(DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(*columns)));
        object.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16u16)));
        object.put(DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16u16)));
        object.put(DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15u16)));
        object.put(DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1u16)));
        object.put(DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::from(bytes)));
    }

    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.2")
                .media_storage_sop_instance_uid(sop_instance),
        )
        .expect("valid file meta");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    file.write_to_file(path).expect("DICOM file written");
}

fn member_channels(target: &[f32], rows: usize, columns: usize) -> Array4<f32> {
    let mut channels = Array3::<f32>::zeros((2, rows, columns));
    for (i, &p) in target.iter().enumerate() {
        channels[[0, i / columns, i % columns]] = 1.0 - p;
        channels[[1, i / columns, i % columns]] = p;
    }
    channels.into_shape_with_order((2, 1, rows, columns)).unwrap()
}

/// Write one ensemble member's two-class probabilities for a 2-D slice.
pub fn write_member(path: &Path, target: &[f32], rows: usize, columns: usize) {
    let channels = member_channels(target, rows, columns);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut npz = NpzWriter::new(File::create(path).unwrap());
    npz.add_array("probabilities", &channels).unwrap();
    npz.finish().unwrap();
}

/// Same as [`write_member`], as a bare `.npy` array.
pub fn write_member_npy(path: &Path, target: &[f32], rows: usize, columns: usize) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    write_npy(path, &member_channels(target, rows, columns)).unwrap();
}
