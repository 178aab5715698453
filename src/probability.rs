//! Per-class probability output of one ensemble member for one slice.

use ndarray::{Array2, ArrayD, Axis, IxDyn};
use ndarray_npy::{NpzReader, ReadNpyError, ReadNpzError, read_npy};
use std::{fs::File, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbabilityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read npz archive: {0}")]
    Npz(#[from] ReadNpzError),

    #[error("cannot read npy array: {0}")]
    Npy(#[from] ReadNpyError),

    #[error("array `{0}` not found in archive")]
    MissingArray(String),

    #[error("class {class} requested but the map has {available} classes")]
    MissingClass { class: usize, available: usize },

    #[error("class channel has shape {0:?}, expected a single 2-D plane")]
    NotPlanar(Vec<usize>),
}

/// Class probabilities with the class on axis 0.
///
/// The last two axes of a channel are the image plane. Any axes in between
/// (such as a singleton depth axis written by 2-D classifiers) must have
/// length 1.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityMap {
    channels: ArrayD<f32>,
}

impl ProbabilityMap {
    pub fn new(channels: ArrayD<f32>) -> Self {
        Self { channels }
    }

    /// Load from an `.npz` archive entry named `array_name`, or from a bare
    /// `.npy` file.
    pub fn open(path: impl AsRef<Path>, array_name: &str) -> Result<Self, ProbabilityError> {
        let path = path.as_ref();
        let is_npy = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("npy"));

        let channels = if is_npy {
            match read_npy::<_, ArrayD<f32>>(path) {
                Ok(channels) => channels,
                Err(ReadNpyError::WrongDescriptor(_)) => {
                    read_npy::<_, ArrayD<f64>>(path)?.mapv(|v| v as f32)
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            Self::read_npz(path, array_name)?
        };

        Ok(Self::new(channels))
    }

    fn read_npz(path: &Path, array_name: &str) -> Result<ArrayD<f32>, ProbabilityError> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let name = npz
            .names()?
            .into_iter()
            .find(|name| name == array_name || name.strip_suffix(".npy") == Some(array_name))
            .ok_or_else(|| ProbabilityError::MissingArray(array_name.to_string()))?;

        match npz.by_name::<_, IxDyn>(&name) {
            Ok(channels) => Ok(channels),
            Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(_))) => {
                let channels: ArrayD<f64> = npz.by_name(&name)?;
                Ok(channels.mapv(|v| v as f32))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn class_count(&self) -> usize {
        self.channels.shape().first().copied().unwrap_or(0)
    }

    /// Probability plane of `class` as `f64`.
    pub fn class_plane(&self, class: usize) -> Result<Array2<f64>, ProbabilityError> {
        let available = self.class_count();
        if class >= available {
            return Err(ProbabilityError::MissingClass { class, available });
        }

        let channel = self.channels.index_axis(Axis(0), class);
        let shape = channel.shape();
        let (leading, plane) = shape.split_at(shape.len().saturating_sub(2));
        if leading.iter().any(|&n| n != 1) {
            return Err(ProbabilityError::NotPlanar(shape.to_vec()));
        }
        let (height, width) = match plane {
            [height, width] => (*height, *width),
            [width] => (1, *width),
            _ => (1, 1),
        };

        let values: Vec<f64> = channel.iter().map(|&v| f64::from(v)).collect();
        Array2::from_shape_vec((height, width), values)
            .map_err(|_| ProbabilityError::NotPlanar(channel.shape().to_vec()))
    }
}
