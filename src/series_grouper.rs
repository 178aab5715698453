use crate::enums::{Defaulted, SortBy};
use crate::naming;
use crate::slice::Slice;

use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum GroupingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),
}

/// Attributes two slices must share to belong to the same series.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupKey {
    pub folder: PathBuf,
    pub study_id: Defaulted<String>,
    pub series_id: Defaulted<String>,
    pub slice_thickness: Defaulted<f64>,
    pub spacing_between_slices: Defaulted<f64>,
    pub frame_of_reference_id: Defaulted<String>,
    pub series_number: Defaulted<String>,
    pub acquisition_number: Defaulted<String>,
}

impl GroupKey {
    pub fn of(slice: &Slice) -> Self {
        Self {
            folder: slice
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            study_id: slice.study_id.clone(),
            series_id: slice.series_id.clone(),
            slice_thickness: slice.slice_thickness.clone(),
            spacing_between_slices: slice.spacing_between_slices.clone(),
            frame_of_reference_id: slice.frame_of_reference_id.clone(),
            series_number: slice.series_number.clone(),
            acquisition_number: slice.acquisition_number.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupMember {
    pub z: f64,
    pub path: PathBuf,
}

/// Axial slices of one series, ordered by ascending z position.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesGroup {
    pub key: GroupKey,
    pub members: Vec<GroupMember>,
}

impl SeriesGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.members.iter().map(|member| member.path.as_path())
    }
}

/// Series groups in the order their keys were first seen.
///
/// The position of a group is its export index, so this order must not
/// depend on anything but the discovery order of the files.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeriesGroups {
    groups: Vec<SeriesGroup>,
}

impl SeriesGroups {
    fn push(&mut self, key: GroupKey, member: GroupMember) {
        match self.groups.iter_mut().find(|group| group.key == key) {
            Some(group) => group.members.push(member),
            None => self.groups.push(SeriesGroup {
                key,
                members: vec![member],
            }),
        }
    }

    fn sort_members(&mut self) {
        for group in &mut self.groups {
            // stable, so equal z keeps discovery order
            group.members.sort_by(|a, b| a.z.total_cmp(&b.z));
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeriesGroup> {
        self.groups.iter()
    }

    /// Groups paired with their 1-based export index.
    pub fn indexed(&self) -> impl Iterator<Item = (usize, &SeriesGroup)> {
        self.groups.iter().enumerate().map(|(i, group)| (i + 1, group))
    }
}

pub struct SeriesGrouper;

impl SeriesGrouper {
    /// Group already parsed slices. Non-axial slices are dropped.
    pub fn group_slices(slices: impl IntoIterator<Item = Slice>) -> SeriesGroups {
        let mut groups = SeriesGroups::default();

        for slice in slices {
            if !slice.is_axial() {
                debug!(
                    path = %slice.path.display(),
                    orientation = slice.orientation().as_str(),
                    "discarding non-axial slice"
                );
                continue;
            }
            let key = GroupKey::of(&slice);
            let z = slice.z_position();
            groups.push(key, GroupMember { z, path: slice.path });
        }

        groups.sort_members();
        groups
    }

    /// Group every readable axial DICOM file found below `folder`.
    ///
    /// Files are visited in file-name order, so repeated runs over an
    /// unchanged folder produce identical groups. Files that are not DICOM
    /// are skipped without error.
    pub fn group_folder(folder: impl AsRef<Path>) -> Result<SeriesGroups, GroupingError> {
        let paths = Self::files_below(folder.as_ref())?;
        let slices: Vec<Slice> = paths
            .par_iter()
            .filter_map(|path| match Slice::open(path) {
                Ok(slice) => Some(slice),
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "not a DICOM file");
                    None
                }
            })
            .collect();

        Ok(Self::group_slices(slices))
    }

    /// Number of files directly inside `folder` with the given extension.
    pub fn count_dicom_files(folder: &Path, extension: &str) -> Result<usize, GroupingError> {
        let mut count = 0;
        for entry in fs::read_dir(folder)? {
            let path = entry?.path();
            if path.is_file() && has_extension(&path, extension) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Copy each group's files into `<out_root>/<group name>` and return the
    /// created folders in index order.
    pub fn export(
        groups: &SeriesGroups,
        source_folder: &Path,
        out_root: &Path,
        ancestor_depth: usize,
    ) -> Result<Vec<PathBuf>, GroupingError> {
        let mut created = Vec::with_capacity(groups.len());

        for (index, group) in groups.indexed() {
            let name = naming::group_folder_name(source_folder, ancestor_depth, index);
            let destination = out_root.join(&name);
            fs::create_dir_all(&destination)?;

            for path in group.paths() {
                let file_name = path
                    .file_name()
                    .ok_or_else(|| GroupingError::NoFileName(path.to_path_buf()))?;
                fs::copy(path, destination.join(file_name))?;
            }

            info!(group = %name, files = group.len(), "exported series group");
            created.push(destination);
        }

        Ok(created)
    }

    /// Readable DICOM slices directly inside `folder`, ordered by `sort_by`.
    ///
    /// Slices missing the sort attribute come first, as they compare lowest.
    pub fn ordered_slices(folder: &Path, sort_by: SortBy) -> Result<Vec<Slice>, GroupingError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(folder)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut slices: Vec<Slice> = paths
            .par_iter()
            .filter_map(|path| Slice::open(path).ok())
            .collect();

        slices.sort_by(|a, b| {
            Self::sort_order(a, sort_by)
                .partial_cmp(&Self::sort_order(b, sort_by))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(slices)
    }

    fn sort_order(slice: &Slice, sort_by: SortBy) -> Option<f64> {
        match sort_by {
            SortBy::InstanceNumber => slice.instance_number.map(f64::from),
            SortBy::ImagePositionPatient => slice.position.known().map(|position| position[2]),
        }
    }

    fn files_below(folder: &Path) -> Result<Vec<PathBuf>, GroupingError> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(folder).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        Ok(paths)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
