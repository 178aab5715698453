use serde::Deserialize;

/// Anatomical plane a slice was acquired in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
    Oblique,
    Unknown,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
            Orientation::Oblique => "oblique",
            Orientation::Unknown => "unknown",
        }
    }
}

/// A header attribute that was either present in the file or missing.
///
/// Missing values still take part in series grouping: two slices that both
/// lack an attribute compare equal on it, so slices with nothing but
/// defaults can collide into one group.
#[derive(Clone, Debug, PartialEq)]
pub enum Defaulted<T> {
    Known(T),
    Default,
}

impl<T> Defaulted<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Defaulted::Known(value),
            None => Defaulted::Default,
        }
    }

    pub fn known(&self) -> Option<&T> {
        match self {
            Defaulted::Known(value) => Some(value),
            Defaulted::Default => None,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Defaulted::Default)
    }

    /// The stored value, or `default` when the attribute was missing.
    pub fn value_or<'a>(&'a self, default: &'a T) -> &'a T {
        self.known().unwrap_or(default)
    }
}

/// Order in which the files of one group folder are indexed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    InstanceNumber,
    ImagePositionPatient,
}
