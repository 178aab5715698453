//! Pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use crate::calibrate::Window;
use crate::enums::SortBy;
use crate::ensemble::ReducerConfig;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub grouping: GroupingConfig,
    pub selection: SelectionConfig,
    pub ensemble: EnsembleConfig,
    pub defaults: DefaultsConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupingConfig {
    /// A folder is grouped only with strictly more DICOM files than this.
    pub min_files: usize,
    pub dicom_extension: String,
    /// Ancestor folder used in export names, counted up from the leaf.
    pub name_ancestor_depth: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            min_files: 8,
            dicom_extension: "dcm".to_string(),
            name_ancestor_depth: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    /// Segmentation label of the anchor vertebra (L3 in the reference model).
    pub anchor_label: i32,
    pub window: Window,
    pub reverse_slice_axis: bool,
    pub sort_by: SortBy,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            anchor_label: 29,
            window: Window::default(),
            reverse_slice_axis: true,
            sort_by: SortBy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsembleConfig {
    /// Member output folders. Empty means `ensemble_*` folders are discovered.
    pub members: Vec<PathBuf>,
    pub expected_members: Option<usize>,
    pub array_name: String,
    pub target_class: usize,
    pub mask_threshold: f64,
    pub variance_threshold: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        let reducer = ReducerConfig::default();
        Self {
            members: Vec::new(),
            expected_members: None,
            array_name: "probabilities".to_string(),
            target_class: reducer.target_class,
            mask_threshold: reducer.mask_threshold,
            variance_threshold: reducer.variance_threshold,
        }
    }
}

impl EnsembleConfig {
    pub fn reducer(&self) -> ReducerConfig {
        ReducerConfig {
            target_class: self.target_class,
            mask_threshold: self.mask_threshold,
            variance_threshold: self.variance_threshold,
        }
    }
}

/// Values substituted for header attributes missing from a slice.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    pub pixel_spacing: (f64, f64),
    pub slice_thickness: f64,
    pub study_description: String,
    pub series_description: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            pixel_spacing: (1e-4, 1e-4),
            slice_thickness: crate::slice::DEFAULT_SLICE_THICKNESS,
            study_description: "No_StudyDescription".to_string(),
            series_description: "No_SeriesDescription".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Load `path` when given, the defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.grouping.dicom_extension.is_empty() {
            return invalid("grouping.dicom_extension must not be empty");
        }
        if self.selection.window.low >= self.selection.window.high {
            return invalid("selection.window.low must be below selection.window.high");
        }
        if self.ensemble.array_name.is_empty() {
            return invalid("ensemble.array_name must not be empty");
        }
        if !(self.ensemble.variance_threshold >= 0.0) {
            return invalid("ensemble.variance_threshold must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.ensemble.mask_threshold) {
            return invalid("ensemble.mask_threshold must lie in [0, 1]");
        }
        if self.ensemble.expected_members == Some(0) {
            return invalid("ensemble.expected_members must be positive");
        }
        let (sx, sy) = self.defaults.pixel_spacing;
        if !(sx > 0.0 && sy > 0.0 && self.defaults.slice_thickness > 0.0) {
            return invalid("default spacing and thickness must be positive");
        }
        Ok(())
    }
}
