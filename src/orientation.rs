use crate::enums::Orientation;

/// Smallest dominant normal component still accepted as a canonical plane.
pub const PLANE_TOLERANCE: f64 = 0.8;

pub type DirectionCosine = [f64; 3];

/// Classify a slice plane from its row and column direction cosines.
///
/// The plane is read off the dominant component of the slice normal
/// (`row × column`): x gives sagittal, y coronal and z axial. A dominant
/// component below [`PLANE_TOLERANCE`] in magnitude is oblique. Missing
/// cosines yield [`Orientation::Unknown`].
pub fn classify(row: Option<&DirectionCosine>, column: Option<&DirectionCosine>) -> Orientation {
    let (Some(row), Some(column)) = (row, column) else {
        return Orientation::Unknown;
    };

    let normal = cross(row, column);
    let (axis, component) = normal
        .iter()
        .copied()
        .enumerate()
        .skip(1)
        .fold((0, normal[0]), |best, (i, c)| {
            if c.abs() > best.1.abs() { (i, c) } else { best }
        });

    // NaN lands here as well
    if !(component.abs() >= PLANE_TOLERANCE) {
        return Orientation::Oblique;
    }

    match axis {
        0 => Orientation::Sagittal,
        1 => Orientation::Coronal,
        _ => Orientation::Axial,
    }
}

fn cross(a: &DirectionCosine, b: &DirectionCosine) -> DirectionCosine {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
