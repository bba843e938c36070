//! Recording epochs and the reader seam.
//!
//! A recording is a sequence of contiguous acquisition runs ("epochs") with
//! possible gaps between them. Times are seconds from recording start and an
//! epoch covers the half-open interval `[t0, t1)`.
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub t0: f64,
    pub t1: f64,
}

impl Epoch {
    pub fn new(t0: f64, t1: f64) -> Self {
        Self { t0, t1 }
    }

    /// `t0 <= time < t1`.
    pub fn contains(&self, time: f64) -> bool {
        self.t0 <= time && time < self.t1
    }

    pub fn duration(&self) -> f64 {
        self.t1 - self.t0
    }
}

/// Source of raw multichannel data, one epoch at a time.
///
/// Implementations own the container format; the segmenter only needs the
/// epoch table, the sampling rate and a way to pull one `[C, T]` block.
pub trait RecordingReader {
    /// Ordered, non-overlapping epochs.
    fn epochs(&self) -> &[Epoch];

    fn sampling_rate(&self) -> f64;

    /// Acquisition start as an RFC 3339 string, when the container has one.
    fn start_time(&self) -> Option<String> {
        None
    }

    /// Channel indices (1-based) marked bad by the recording itself.
    fn bad_channels(&self) -> Vec<usize> {
        Vec::new()
    }

    /// Read the raw block for `epoch`, shape `[C, T]`.
    fn read_epoch(&mut self, epoch: &Epoch) -> Result<Array2<f32>>;
}

impl<R: RecordingReader + ?Sized> RecordingReader for &mut R {
    fn epochs(&self) -> &[Epoch] {
        (**self).epochs()
    }

    fn sampling_rate(&self) -> f64 {
        (**self).sampling_rate()
    }

    fn start_time(&self) -> Option<String> {
        (**self).start_time()
    }

    fn bad_channels(&self) -> Vec<usize> {
        (**self).bad_channels()
    }

    fn read_epoch(&mut self, epoch: &Epoch) -> Result<Array2<f32>> {
        (**self).read_epoch(epoch)
    }
}
