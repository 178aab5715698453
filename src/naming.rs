//! Deterministic names for exported groups and selected slices.
//!
//! A slice identifier is `<group-name>__<file-index>`, with the index
//! zero-padded to four digits. The double underscore separates the two
//! halves, so group names may themselves contain single underscores.

use std::fmt;
use std::path::{Component, Path};

const SEPARATOR: &str = "__";

const EXTENSIONS: [&str; 5] = [".nii.gz", ".nii", ".npz", ".npy", ".png"];

/// Name of the folder a group is exported to: `<ancestor>_<leaf>_group<index>`.
///
/// `ancestor_depth` counts upward from the leaf folder; when the path is too
/// short the ancestor is left out.
pub fn group_folder_name(folder: &Path, ancestor_depth: usize, index: usize) -> String {
    let parts: Vec<String> = folder
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let leaf = parts.last().map(String::as_str).unwrap_or("root");
    let ancestor = (ancestor_depth > 0)
        .then(|| parts.len().checked_sub(ancestor_depth + 1))
        .flatten()
        .map(|i| parts[i].as_str());

    match ancestor {
        Some(ancestor) => format!("{ancestor}_{leaf}_group{index}"),
        None => format!("{leaf}_group{index}"),
    }
}

/// One selected slice of one exported group.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceId {
    pub group: String,
    pub file_index: usize,
}

impl SliceId {
    pub fn new(group: impl Into<String>, file_index: usize) -> Self {
        Self {
            group: group.into(),
            file_index,
        }
    }

    /// Parse an identifier from a file stem or a file name with a known
    /// extension.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = EXTENSIONS
            .iter()
            .find_map(|ext| name.strip_suffix(ext))
            .unwrap_or(name);
        let (group, index) = stem.rsplit_once(SEPARATOR)?;
        if group.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self::new(group, index.parse().ok()?))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::parse(path.file_name()?.to_str()?)
    }

    /// File name handed to the per-slice classifier (single input channel).
    pub fn classifier_input_name(&self) -> String {
        format!("{self}_0000.png")
    }

    pub fn prediction_name(&self) -> String {
        format!("prediction_{self}.png")
    }

    pub fn uncertainty_name(&self) -> String {
        format!("uncertainty_{self}.png")
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{:04}", self.group, self.file_index)
    }
}
