//! Label volumes returned by the external 3-D segmentation.
//!
//! A volume is stored as an `.npy` array with axes `(x, y, z)`; each voxel
//! holds the small positive label of the structure it belongs to.

use ndarray::{Array3, Axis};
use ndarray_npy::{ReadNpyError, ReadableElement, read_npy};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelVolumeError {
    #[error("cannot read label volume: {0}")]
    Read(#[from] ReadNpyError),

    #[error("label volume has no slices")]
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabelVolume {
    data: Array3<i32>,
}

impl LabelVolume {
    pub fn new(data: Array3<i32>) -> Result<Self, LabelVolumeError> {
        if data.len_of(Axis(2)) == 0 {
            return Err(LabelVolumeError::Empty);
        }
        Ok(Self { data })
    }

    /// Load a 3-D label array of any common integer or float dtype.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LabelVolumeError> {
        let path = path.as_ref();
        let data = match read_npy::<_, Array3<i32>>(path) {
            Ok(data) => data,
            Err(ReadNpyError::WrongDescriptor(descriptor)) => match Self::read_converted(path)? {
                Some(data) => data,
                None => return Err(ReadNpyError::WrongDescriptor(descriptor).into()),
            },
            Err(err) => return Err(err.into()),
        };
        Self::new(data)
    }

    /// Retry with the other dtypes, `None` when none of them matches.
    fn read_converted(path: &Path) -> Result<Option<Array3<i32>>, ReadNpyError> {
        if let Some(data) = read_as::<u8>(path, i32::from)? {
            return Ok(Some(data));
        }
        if let Some(data) = read_as::<u16>(path, i32::from)? {
            return Ok(Some(data));
        }
        if let Some(data) = read_as::<i16>(path, i32::from)? {
            return Ok(Some(data));
        }
        if let Some(data) = read_as::<i8>(path, i32::from)? {
            return Ok(Some(data));
        }
        if let Some(data) = read_as::<u32>(path, |v| i32::try_from(v).unwrap_or(i32::MAX))? {
            return Ok(Some(data));
        }
        let narrow = |v: i64| v.clamp(i32::MIN.into(), i32::MAX.into()) as i32;
        if let Some(data) = read_as::<i64>(path, narrow)? {
            return Ok(Some(data));
        }
        if let Some(data) = read_as::<f64>(path, |v| v.round() as i32)? {
            return Ok(Some(data));
        }
        read_as::<f32>(path, |v| v.round() as i32)
    }

    /// Dimensions `(x, y, z)`.
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn depth(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Indices along z of the slices that contain `label`, ascending.
    pub fn slices_containing(&self, label: i32) -> Vec<usize> {
        self.data
            .axis_iter(Axis(2))
            .enumerate()
            .filter(|(_, slice)| slice.iter().any(|&voxel| voxel == label))
            .map(|(z, _)| z)
            .collect()
    }

    /// Index of the source file a z index corresponds to.
    ///
    /// With `reversed` the volume's z axis runs opposite to the file order.
    /// That convention comes from how the segmentation writes its output and
    /// is not checked against the orientation metadata.
    pub fn file_index(&self, z: usize, reversed: bool) -> usize {
        if reversed { self.depth() - 1 - z } else { z }
    }
}

/// Read `path` as an array of `T`, `None` when the stored dtype differs.
fn read_as<T>(path: &Path, convert: fn(T) -> i32) -> Result<Option<Array3<i32>>, ReadNpyError>
where
    T: ReadableElement + Copy,
{
    match read_npy::<_, Array3<T>>(path) {
        Ok(data) => Ok(Some(data.mapv(convert))),
        Err(ReadNpyError::WrongDescriptor(_)) => Ok(None),
        Err(err) => Err(err),
    }
}
