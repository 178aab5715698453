//! Small statistical primitives over `f64` samples.
//!
//! Empty input has no mean or median; these return `None` rather than a
//! number so callers cannot mistake missing data for a measured zero.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of `values`. Reorders the slice.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some((values[n / 2 - 1] + values[n / 2]) / 2.0)
    }
}

/// Smallest and largest finite-ordered value, `None` for empty input.
pub fn min_max<'a>(values: impl IntoIterator<Item = &'a f64>) -> Option<(f64, f64)> {
    values.into_iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((min, max)) => Some((min.min(v), max.max(v))),
    })
}

/// Linearly map `value` from `[min, max]` onto the integers `0..=ceiling`.
///
/// A zero-width range maps everything to 0.
pub fn rescale_to(value: f64, min: f64, max: f64, ceiling: u8) -> u8 {
    let range = max - min;
    if !(range > 0.0) {
        return 0;
    }
    let scaled = (value - min) / range * f64::from(ceiling);
    scaled.round().clamp(0.0, f64::from(ceiling)) as u8
}
