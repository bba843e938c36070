//! Segment extraction around event times.
//!
//! ## Window rule
//!
//! With `n(s) = round(s · sr)` (half away from zero), the sample at the event
//! belongs to the left half of the window and the right half starts one
//! sample after it:
//!
//! ```text
//! right_start = n(center) + 1
//! start       = right_start − n(pad_left)
//! stop        = right_start + n(pad_right)
//! ```
//!
//! so every window has exactly `n(pad_left) + n(pad_right)` samples no matter
//! where `center` falls between samples.
//!
//! ## Segmenter
//!
//! [`Segmenter`] walks the recording epoch by epoch, filters each raw block
//! once and cuts every requested window that lands in it. Windows crossing a
//! block edge are reported, not padded or truncated.
use std::collections::BTreeMap;

use log::{debug, info, warn};
use ndarray::{s, Array2, ArrayD, Ix2};

use crate::epoch::{Epoch, RecordingReader};
use crate::error::{not_2d, EegError, Result};
use crate::filter::filtfilt;

/// Convert seconds to the nearest sample count.
pub fn seconds_to_samples(seconds: f64, sample_rate: f64) -> i64 {
    (seconds * sample_rate).round() as i64
}

/// Cut the window around `center` (seconds from the start of `data`).
///
/// # Errors
///
/// [`EegError::OutOfRange`] carrying `center` when the window starts before
/// sample 0 or ends after the last sample.
pub fn extract_segment(
    data: &Array2<f32>,
    center: f64,
    pad_left: f64,
    pad_right: f64,
    sample_rate: f64,
) -> Result<Array2<f32>> {
    let right_start = seconds_to_samples(center, sample_rate) + 1;
    let start = right_start - seconds_to_samples(pad_left, sample_rate);
    let stop = right_start + seconds_to_samples(pad_right, sample_rate);
    if start < 0 || stop > data.ncols() as i64 || start > stop {
        return Err(EegError::OutOfRange { time: center });
    }
    Ok(data.slice(s![.., start as usize..stop as usize]).to_owned())
}

/// [`extract_segment`] for a dynamically-shaped array.
pub fn extract_segment_dyn(
    data: &ArrayD<f32>,
    center: f64,
    pad_left: f64,
    pad_right: f64,
    sample_rate: f64,
) -> Result<Array2<f32>> {
    let view = data
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| not_2d(data.shape()))?;
    extract_segment(&view.to_owned(), center, pad_left, pad_right, sample_rate)
}

/// Result of one [`Segmenter::extract_segments`] batch.
///
/// Only categories with at least one entry appear in each map.
#[derive(Debug, Clone, Default)]
pub struct Segments {
    /// Extracted windows per category, in ascending time order.
    pub segments: BTreeMap<String, Vec<Array2<f32>>>,
    /// Requested times (seconds from recording start) whose window did not
    /// fit inside an epoch.
    pub out_of_range: BTreeMap<String, Vec<f64>>,
}

impl Segments {
    pub fn count(&self, label: &str) -> usize {
        self.segments.get(label).map_or(0, Vec::len)
    }

    pub fn out_of_range_count(&self) -> usize {
        self.out_of_range.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Default)]
enum DataCache {
    #[default]
    Empty,
    Loaded(Array2<f32>),
}

/// Epoch-wise segment extraction over a [`RecordingReader`].
///
/// Holds at most one filtered epoch at a time.
pub struct Segmenter<R> {
    reader: R,
    order: usize,
    low_cut: Option<f64>,
    high_cut: Option<f64>,
    cache: DataCache,
}

impl<R: RecordingReader> Segmenter<R> {
    /// Unfiltered segmenter (filter order 4 is kept for [`with_filter`](Self::with_filter)).
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            order: 4,
            low_cut: None,
            high_cut: None,
            cache: DataCache::Empty,
        }
    }

    /// Filter every loaded epoch with a zero-phase Butterworth filter.
    pub fn with_filter(mut self, order: usize, low_cut: Option<f64>, high_cut: Option<f64>) -> Self {
        self.order = order;
        self.low_cut = low_cut;
        self.high_cut = high_cut;
        self
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_reader(self) -> R {
        self.reader
    }

    pub fn sampling_rate(&self) -> f64 {
        self.reader.sampling_rate()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.cache, DataCache::Loaded(_))
    }

    /// Read and filter `epoch` into the cache.
    ///
    /// Fails with [`EegError::Programming`] if a block is already loaded.
    pub fn load_epoch(&mut self, epoch: &Epoch) -> Result<()> {
        if self.is_loaded() {
            return Err(EegError::Programming(
                "a data block is already loaded, clear it first".into(),
            ));
        }
        let raw = self.reader.read_epoch(epoch)?;
        let sr = self.reader.sampling_rate();
        debug!(
            "loading epoch [{:.3}, {:.3}) s: {} ch × {} samples",
            epoch.t0,
            epoch.t1,
            raw.nrows(),
            raw.ncols()
        );
        let filtered = filtfilt(&raw, sr, self.order, self.low_cut, self.high_cut)?;
        self.cache = DataCache::Loaded(filtered);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.cache = DataCache::Empty;
    }

    /// The currently loaded filtered block.
    pub fn loaded(&self) -> Result<&Array2<f32>> {
        match &self.cache {
            DataCache::Loaded(data) => Ok(data),
            DataCache::Empty => Err(EegError::Programming("no data loaded".into())),
        }
    }

    /// Extract a `[pad_left + pad_right]`-second window around every time in
    /// `requests` (category → seconds from recording start).
    ///
    /// Each epoch is read and filtered at most once. The cache is empty when
    /// this returns, whether or not it succeeded.
    pub fn extract_segments(
        &mut self,
        requests: &BTreeMap<String, Vec<f64>>,
        pad_left: f64,
        pad_right: f64,
    ) -> Result<Segments> {
        for (side, value) in [("left", pad_left), ("right", pad_right)] {
            if !(value >= 0.0) {
                return Err(EegError::InvalidArgument(format!(
                    "negative {side} padding: {value}"
                )));
            }
        }

        let result = self.extract_by_epoch(requests, pad_left, pad_right);
        self.clear();
        let out = result?;

        let n_ok: usize = out.segments.values().map(Vec::len).sum();
        info!(
            "extracted {n_ok} segments over {} categories ({} out of range)",
            out.segments.len(),
            out.out_of_range_count()
        );
        Ok(out)
    }

    fn extract_by_epoch(
        &mut self,
        requests: &BTreeMap<String, Vec<f64>>,
        pad_left: f64,
        pad_right: f64,
    ) -> Result<Segments> {
        let epochs = self.reader.epochs().to_vec();
        let sr = self.reader.sampling_rate();
        let mut out = Segments::default();

        // ── Assign times to epochs ────────────────────────────────────────────
        let mut by_epoch: Vec<Vec<(&str, f64)>> = vec![Vec::new(); epochs.len()];
        for (label, times) in requests {
            let mut sorted = times.clone();
            sorted.sort_by(f64::total_cmp);
            let mut idx = 0;
            for t in sorted {
                while idx < epochs.len() && t >= epochs[idx].t1 {
                    idx += 1;
                }
                match epochs.get(idx) {
                    Some(epoch) if epoch.contains(t) => by_epoch[idx].push((label.as_str(), t)),
                    _ => {
                        warn!("{label}: time {t} s is not inside any epoch");
                        out.out_of_range.entry(label.clone()).or_default().push(t);
                    }
                }
            }
        }

        // ── Cut windows ───────────────────────────────────────────────────────
        for (epoch, assigned) in epochs.iter().zip(&by_epoch) {
            if assigned.is_empty() {
                continue;
            }
            self.clear();
            self.load_epoch(epoch)?;
            let data = self.loaded()?;
            for &(label, t) in assigned {
                match extract_segment(data, t - epoch.t0, pad_left, pad_right, sr) {
                    Ok(seg) => out.segments.entry(label.to_string()).or_default().push(seg),
                    Err(EegError::OutOfRange { .. }) => {
                        warn!("{label}: segment at {t} s extends beyond its epoch");
                        out.out_of_range.entry(label.to_string()).or_default().push(t);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        for times in out.out_of_range.values_mut() {
            times.sort_by(f64::total_cmp);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn block() -> Array2<f32> {
        array![
            [3.0_f32, 6.0, 7.0, 4.0, 2.0, 1.0, 7.0, 5.0, 3.0, 0.0],
            [4.0, 1.0, 7.0, 3.0, 5.0, 4.0, 7.0, 8.0, 0.0, 8.0],
        ]
    }

    #[test]
    fn worked_example() {
        let seg = extract_segment(&block(), 3.0, 1.5, 1.0, 2.0).unwrap();
        assert_eq!(seg, array![[2.0_f32, 1.0, 7.0, 5.0, 3.0], [5.0, 4.0, 7.0, 8.0, 0.0]]);
    }

    #[test]
    fn window_length_is_constant() {
        for center in [2.5, 2.6, 3.0, 3.1, 3.4] {
            let seg = extract_segment(&block(), center, 1.5, 1.0, 2.0).unwrap();
            assert_eq!(seg.ncols(), 5, "center {center}");
        }
    }

    #[test]
    fn window_past_either_edge_is_out_of_range() {
        let err = extract_segment(&block(), 0.5, 1.5, 1.0, 2.0).unwrap_err();
        assert!(matches!(err, EegError::OutOfRange { time } if time == 0.5));
        let err = extract_segment(&block(), 4.0, 1.5, 1.0, 2.0).unwrap_err();
        assert!(matches!(err, EegError::OutOfRange { time } if time == 4.0));
    }

    #[test]
    fn half_samples_round_away_from_zero() {
        assert_eq!(seconds_to_samples(1.25, 2.0), 3);
        assert_eq!(seconds_to_samples(0.75, 2.0), 2);
        assert_eq!(seconds_to_samples(1.2, 2.0), 2);
    }

    #[test]
    fn dyn_input_must_be_2d() {
        let data = ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 3, 4]));
        let err = extract_segment_dyn(&data, 1.0, 0.5, 0.5, 2.0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "input array must be 2-dimensional. Got shape: (2, 3, 4)"
        );
    }
}
