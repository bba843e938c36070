//! Forward-backward (zero-phase) SOS filtering.
//!
//! Matches `scipy.signal.sosfiltfilt(sos, x, axis=1, padtype='constant')`.
//!
//! Each channel is extended by `padlen` copies of its first and last sample,
//! filtered forward with steady-state initial conditions scaled by the first
//! extended sample, reversed, filtered again with conditions scaled by the
//! last output, reversed back, and stripped of the padding. The magnitude
//! response is squared and the phase response cancels.
use ndarray::{Array2, ArrayD, ArrayView1, Ix2};

use super::design::{butter, SecondOrderSections};
use crate::error::{not_2d, EegError, Result};

/// Zero-phase Butterworth filtering of every channel of `data` ([C, T]).
///
/// With neither cutoff given the block is returned unchanged. Output is
/// always `f32`, computation runs in `f64`.
///
/// # Errors
///
/// * [`EegError::InvalidArgument`] for an invalid filter spec (see
///   [`FilterSpec::kind`](super::FilterSpec::kind)) or when `T` does not
///   exceed the edge padding length.
pub fn filtfilt(
    data: &Array2<f32>,
    sample_rate: f64,
    order: usize,
    low_cut: Option<f64>,
    high_cut: Option<f64>,
) -> Result<Array2<f32>> {
    if low_cut.is_none() && high_cut.is_none() {
        return Ok(data.clone());
    }
    let sos = butter(order, sample_rate, low_cut, high_cut)?;
    sosfiltfilt(&sos, data)
}

/// [`filtfilt`] for a dynamically-shaped array; fails with
/// [`EegError::Shape`] unless the input is 2-D.
pub fn filtfilt_dyn(
    data: &ArrayD<f32>,
    sample_rate: f64,
    order: usize,
    low_cut: Option<f64>,
    high_cut: Option<f64>,
) -> Result<Array2<f32>> {
    let data = data
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| not_2d(data.shape()))?;
    filtfilt(&data.to_owned(), sample_rate, order, low_cut, high_cut)
}

/// Apply precomputed sections forward and backward along the sample axis.
pub fn sosfiltfilt(sos: &SecondOrderSections, data: &Array2<f32>) -> Result<Array2<f32>> {
    let n_t = data.ncols();
    let edge = pad_len(sos);
    if n_t <= edge {
        return Err(EegError::InvalidArgument(format!(
            "signal length ({n_t} samples) must be greater than the filter padding ({edge} samples)"
        )));
    }

    let zi = sosfilt_zi(sos);
    let mut out = Array2::<f32>::zeros(data.raw_dim());
    for (ch, row) in data.rows().into_iter().enumerate() {
        let filtered = filtfilt_1d(sos, &zi, row, edge);
        out.row_mut(ch).assign(&ArrayView1::from(&filtered));
    }
    Ok(out)
}

fn filtfilt_1d(sos: &SecondOrderSections, zi: &[[f64; 2]], x: ArrayView1<f32>, edge: usize) -> Vec<f32> {
    let n = x.len();
    let first = x[0] as f64;
    let last = x[n - 1] as f64;

    // Constant extension.
    let mut ext: Vec<f64> = Vec::with_capacity(n + 2 * edge);
    ext.extend(std::iter::repeat(first).take(edge));
    ext.extend(x.iter().map(|&v| v as f64));
    ext.extend(std::iter::repeat(last).take(edge));

    sosfilt_inplace(sos, &mut ext, zi, first);
    ext.reverse();
    let y0 = ext[0];
    sosfilt_inplace(sos, &mut ext, zi, y0);
    ext.reverse();

    ext[edge..edge + n].iter().map(|&v| v as f32).collect()
}

/// Cascade every section over `x` in place (direct form II transposed),
/// starting from `zi · x0`.
fn sosfilt_inplace(sos: &SecondOrderSections, x: &mut [f64], zi: &[[f64; 2]], x0: f64) {
    for (s, z) in sos.sections().iter().zip(zi) {
        let [b0, b1, b2, _, a1, a2] = *s;
        let (mut z0, mut z1) = (z[0] * x0, z[1] * x0);
        for v in x.iter_mut() {
            let xin = *v;
            let y = b0 * xin + z0;
            z0 = b1 * xin - a1 * y + z1;
            z1 = b2 * xin - a2 * y;
            *v = y;
        }
    }
}

/// Steady-state initial conditions for a unit step, per section.
///
/// For one biquad, solving `(I − Aᵀ)·zi = b[1:] − a[1:]·b0` gives
/// `zi0 = (B0 + B1) / (1 + a1 + a2)`, `zi1 = B1 − a2·zi0`. Later sections
/// see the DC gain of everything before them, so they are scaled by it.
fn sosfilt_zi(sos: &SecondOrderSections) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sos.sections()
        .iter()
        .map(|&[b0, b1, b2, a0, a1, a2]| {
            let big_b0 = b1 - a1 * b0;
            let big_b1 = b2 - a2 * b0;
            let z0 = (big_b0 + big_b1) / (1.0 + a1 + a2);
            let z1 = big_b1 - a2 * z0;
            let zi = [scale * z0, scale * z1];
            scale *= (b0 + b1 + b2) / (a0 + a1 + a2);
            zi
        })
        .collect()
}

/// Edge padding: `3 · ntaps`, where sections with a trailing zero in both
/// numerator and denominator count as first order.
fn pad_len(sos: &SecondOrderSections) -> usize {
    let rows = sos.sections();
    let zero_b2 = rows.iter().filter(|s| s[2] == 0.0).count();
    let zero_a2 = rows.iter().filter(|s| s[5] == 0.0).count();
    let ntaps = 2 * rows.len() + 1 - zero_b2.min(zero_a2);
    3 * ntaps
}
