//! Peak-to-peak artifact detection.
//!
//! A channel is bad when `max(x) − min(x) > |criterion|` over the block.
use ndarray::{Array2, ArrayD, Axis, Ix2};

use crate::error::{not_2d, Result};

/// Ascending 0-based indices of channels exceeding the peak-to-peak
/// `criterion`. A negative criterion is used by absolute value.
pub fn detect_bad_channels(data: &Array2<f32>, criterion: f64) -> Vec<usize> {
    let criterion = criterion.abs();
    data.axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| {
            let (lo, hi) = row
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            (hi as f64 - lo as f64) > criterion
        })
        .map(|(ch, _)| ch)
        .collect()
}

pub fn detect_bad_channels_dyn(data: &ArrayD<f32>, criterion: f64) -> Result<Vec<usize>> {
    let view = data
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| not_2d(data.shape()))?;
    Ok(detect_bad_channels(&view.to_owned(), criterion))
}

/// Keep only segments in which no channel exceeds `criterion`.
///
/// Returns the surviving segments and the number dropped.
pub fn drop_bad_segments(segments: Vec<Array2<f32>>, criterion: f64) -> (Vec<Array2<f32>>, usize) {
    let before = segments.len();
    let kept: Vec<Array2<f32>> = segments
        .into_iter()
        .filter(|seg| detect_bad_channels(seg, criterion).is_empty())
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}
