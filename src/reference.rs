//! Average reference over good channels.
//!
//! `data`: [C, T]  →  `data[c, t] -= mean(data[good, t])`
//!
//! Bad channels are 1-based channel numbers. They are excluded from the mean
//! but still re-referenced.
use ndarray::{Array1, Array2, ArrayD, Axis, Ix2};

use crate::error::{not_2d, EegError, Result};

pub fn average_reference(data: &Array2<f32>, bad_channels: &[usize]) -> Result<Array2<f32>> {
    let mut out = data.clone();
    average_reference_inplace(&mut out, bad_channels)?;
    Ok(out)
}

pub fn average_reference_inplace(data: &mut Array2<f32>, bad_channels: &[usize]) -> Result<()> {
    let good: Vec<usize> = (0..data.nrows())
        .filter(|ch| !bad_channels.contains(&(ch + 1)))
        .collect();
    if good.is_empty() {
        return Err(EegError::InvalidArgument(
            "no good channels from which to build reference".into(),
        ));
    }

    // Accumulate in f64 so large channel counts do not lose precision.
    let mut mean = Array1::<f64>::zeros(data.ncols());
    for &ch in &good {
        mean.zip_mut_with(&data.row(ch), |m, &v| *m += v as f64);
    }
    mean /= good.len() as f64;
    let mean = mean.mapv(|v| v as f32);

    for mut row in data.axis_iter_mut(Axis(0)) {
        row -= &mean;
    }
    Ok(())
}

pub fn average_reference_dyn(data: &ArrayD<f32>, bad_channels: &[usize]) -> Result<Array2<f32>> {
    let view = data
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| not_2d(data.shape()))?;
    average_reference(&view.to_owned(), bad_channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn channel_sum_is_zero_after_reference() {
        let data = Array2::from_shape_fn((8, 512), |(c, t)| ((c * 7 + t * 3) as f32).sin());
        let out = average_reference(&data, &[]).unwrap();
        let col_sums = out.sum_axis(Axis(0));
        for &s in col_sums.iter() {
            approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-4_f32);
        }
    }

    #[test]
    fn bad_channels_are_excluded_from_mean() {
        // Channels 1 and 2 (1-based) hold 2 and 4; channel 3 is bad at 100.
        let data = Array2::from_shape_fn((3, 10), |(c, _)| [2.0_f32, 4.0, 100.0][c]);
        let out = average_reference(&data, &[3]).unwrap();
        for t in 0..10 {
            approx::assert_abs_diff_eq!(out[[0, t]], -1.0, epsilon = 1e-6);
            approx::assert_abs_diff_eq!(out[[1, t]], 1.0, epsilon = 1e-6);
            approx::assert_abs_diff_eq!(out[[2, t]], 97.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn good_channel_mean_is_zero() {
        let data = Array2::from_shape_fn((5, 64), |(c, t)| (c as f32 + 1.0) * (t as f32 * 0.1).cos());
        let bads = [2, 5];
        let out = average_reference(&data, &bads).unwrap();
        for t in 0..64 {
            let s: f32 = [0, 2, 3].iter().map(|&c| out[[c, t]]).sum();
            approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn all_bad_is_rejected() {
        let data = Array2::<f32>::ones((2, 4));
        let err = average_reference(&data, &[1, 2]).unwrap_err();
        assert_eq!(err.to_string(), "no good channels from which to build reference");
    }

    #[test]
    fn input_is_not_modified() {
        let data = Array2::from_elem((4, 100), 5.0_f32);
        let out = average_reference(&data, &[]).unwrap();
        assert!(data.iter().all(|&v| v == 5.0));
        assert!(out.iter().all(|&v| v.abs() < 1e-6));
    }
}
