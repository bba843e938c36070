//! Per-category averaging with shared shape, rate and event position.
//!
//! [`Averages`] accumulates one averaged `[C, T]` block per category label.
//! Every block shares the sampling rate, the shape of the first block added
//! and the event position (`center_samples` from the block start). When the
//! average reference is switched on it is applied to stored blocks and to
//! every block added afterwards.
//!
//! [`Average`] is the stand-alone variant: each category is averaged on its
//! own and consistency is only checked when they are combined with
//! [`Averages::from_averages`].
//!
//! ## Timeline
//!
//! Categories are laid back to back starting at 0, in integer microseconds:
//!
//! ```text
//! duration = trunc(1e6 · n_samples / sr)
//! event    = begin + trunc(1e6 · center_samples / sr)
//! ```
use ndarray::{Array2, ArrayD, Ix2};
use serde::{Deserialize, Serialize};

use crate::error::{fmt_shape, not_2d, EegError, Result};
use crate::reference::average_reference;
use crate::segment::seconds_to_samples;

/// One averaged category.
#[derive(Debug, Clone, PartialEq)]
pub struct Average {
    pub label: String,
    /// Averaged block, shape `[C, T]`.
    pub data: Array2<f32>,
    pub num_segments: usize,
    /// Event position in samples from the start of `data`.
    pub center_samples: usize,
    pub sample_rate: f64,
    /// 1-based channel numbers excluded from the reference.
    pub bad_channels: Vec<usize>,
}

impl Average {
    /// Average `segments` as a single category.
    pub fn new(
        label: impl Into<String>,
        segments: &[Array2<f32>],
        center_samples: usize,
        sample_rate: f64,
        bad_channels: Vec<usize>,
    ) -> Result<Self> {
        let data = mean_of(segments)?;
        check_center(center_samples, &data)?;
        Ok(Self {
            label: label.into(),
            data,
            num_segments: segments.len(),
            center_samples,
            sample_rate,
            bad_channels,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Re-reference `data` to the mean of the good channels.
    pub fn set_average_reference(&mut self) -> Result<()> {
        self.data = average_reference(&self.data, &self.bad_channels)?;
        Ok(())
    }
}

/// One category's span on the output timeline, in microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub category: String,
    pub status: String,
    pub name: String,
    pub begin_time: u64,
    pub end_time: u64,
    pub event_begin: u64,
    pub event_end: u64,
    pub bad_channels: Vec<usize>,
    pub num_segments: usize,
}

/// Ordered collection of category averages sharing rate, shape and centre.
#[derive(Debug, Clone)]
pub struct Averages {
    center_samples: usize,
    sample_rate: f64,
    bad_channels: Vec<usize>,
    averages: Vec<Average>,
    average_reference: bool,
}

impl Averages {
    pub fn new(center_samples: usize, sample_rate: f64, bad_channels: Vec<usize>) -> Self {
        Self {
            center_samples,
            sample_rate,
            bad_channels,
            averages: Vec::new(),
            average_reference: false,
        }
    }

    /// Build from an event position given in seconds, snapped to the nearest
    /// sample.
    pub fn with_center_seconds(center: f64, sample_rate: f64, bad_channels: Vec<usize>) -> Result<Self> {
        let n = seconds_to_samples(center, sample_rate);
        if n < 0 {
            return Err(EegError::InvalidArgument(format!(
                "center cannot be negative: {center} s"
            )));
        }
        Ok(Self::new(n as usize, sample_rate, bad_channels))
    }

    /// Combine independently averaged categories.
    ///
    /// All blocks must share the shape and sampling rate of the first one.
    /// The event position and bad channels of the first become the shared
    /// ones; each category keeps its own for the timeline.
    pub fn from_averages(averages: Vec<Average>) -> Result<Self> {
        let first = averages
            .first()
            .ok_or_else(|| EegError::InvalidArgument("no averages to combine".into()))?;
        for avg in &averages[1..] {
            if avg.data.shape() != first.data.shape() {
                return Err(EegError::Shape(format!(
                    "averaged data blocks of different shape: {} != {}",
                    fmt_shape(avg.data.shape()),
                    fmt_shape(first.data.shape())
                )));
            }
            if avg.sample_rate != first.sample_rate {
                return Err(EegError::InvalidArgument(format!(
                    "averages have different sampling rates: {} != {}",
                    avg.sample_rate, first.sample_rate
                )));
            }
        }
        let mut out = Self::new(first.center_samples, first.sample_rate, first.bad_channels.clone());
        for avg in averages {
            match out.averages.iter().position(|a| a.label == avg.label) {
                Some(i) => out.averages[i] = avg,
                None => out.averages.push(avg),
            }
        }
        Ok(out)
    }

    /// Average `segments` and store them under `label`.
    ///
    /// Re-adding an existing label replaces its block in place.
    pub fn add(&mut self, label: impl Into<String>, segments: &[Array2<f32>]) -> Result<()> {
        let label = label.into();
        let mut data = mean_of(segments)?;

        match self.averages.first() {
            None => check_center(self.center_samples, &data)?,
            Some(first) if first.data.shape() != data.shape() => {
                return Err(EegError::Shape(format!(
                    "attempting to add averaged data block of different shape {} \
                     than previously added blocks {}",
                    fmt_shape(data.shape()),
                    fmt_shape(first.data.shape())
                )));
            }
            Some(_) => {}
        }

        if self.average_reference {
            data = average_reference(&data, &self.bad_channels)?;
        }

        let avg = Average {
            label,
            data,
            num_segments: segments.len(),
            center_samples: self.center_samples,
            sample_rate: self.sample_rate,
            bad_channels: self.bad_channels.clone(),
        };
        match self.averages.iter().position(|a| a.label == avg.label) {
            Some(i) => self.averages[i] = avg,
            None => self.averages.push(avg),
        }
        Ok(())
    }

    /// [`add`](Self::add) for segments of unchecked dimensionality.
    pub fn add_dyn(&mut self, label: impl Into<String>, segments: &[ArrayD<f32>]) -> Result<()> {
        let segments = segments
            .iter()
            .map(|seg| {
                seg.view()
                    .into_dimensionality::<Ix2>()
                    .map(|v| v.to_owned())
                    .map_err(|_| not_2d(seg.shape()))
            })
            .collect::<Result<Vec<_>>>()?;
        self.add(label, &segments)
    }

    /// Re-reference every stored block and every block added from now on.
    ///
    /// Nothing changes unless every block can be re-referenced.
    pub fn set_average_reference(&mut self) -> Result<()> {
        let referenced = self
            .averages
            .iter()
            .map(|avg| average_reference(&avg.data, &avg.bad_channels))
            .collect::<Result<Vec<_>>>()?;
        for (avg, data) in self.averages.iter_mut().zip(referenced) {
            avg.data = data;
        }
        self.average_reference = true;
        Ok(())
    }

    pub fn average_reference_on(&self) -> bool {
        self.average_reference
    }

    /// Lay categories back to back and compute their event times.
    pub fn build_timeline(&self) -> Result<Vec<TimelineEntry>> {
        if self.averages.is_empty() {
            return Err(EegError::InvalidArgument("no averages have been added".into()));
        }
        let mut begin = 0_u64;
        let timeline = self
            .averages
            .iter()
            .map(|avg| {
                let duration = (1e6 * avg.data.ncols() as f64 / avg.sample_rate) as u64;
                let event = begin + (1e6 * avg.center_samples as f64 / avg.sample_rate) as u64;
                let entry = TimelineEntry {
                    category: avg.label.clone(),
                    status: "unedited".into(),
                    name: "Average".into(),
                    begin_time: begin,
                    end_time: begin + duration,
                    event_begin: event,
                    event_end: event,
                    bad_channels: avg.bad_channels.clone(),
                    num_segments: avg.num_segments,
                };
                begin += duration;
                entry
            })
            .collect();
        Ok(timeline)
    }

    pub fn center_samples(&self) -> usize {
        self.center_samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn bad_channels(&self) -> &[usize] {
        &self.bad_channels
    }

    pub fn len(&self) -> usize {
        self.averages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }

    /// Categories in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Average> {
        self.averages.iter()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.averages.iter().map(|a| a.label.as_str()).collect()
    }

    pub fn get(&self, label: &str) -> Option<&Average> {
        self.averages.iter().find(|a| a.label == label)
    }

    pub fn data(&self, label: &str) -> Option<&Array2<f32>> {
        self.get(label).map(|a| &a.data)
    }

    pub fn num_segments(&self, label: &str) -> Option<usize> {
        self.get(label).map(|a| a.num_segments)
    }
}

/// Element-wise mean of equally shaped blocks, accumulated in f64.
fn mean_of(segments: &[Array2<f32>]) -> Result<Array2<f32>> {
    let first = segments
        .first()
        .ok_or_else(|| EegError::InvalidArgument("cannot average an empty list of segments".into()))?;
    let mut acc = Array2::<f64>::zeros(first.raw_dim());
    for seg in segments {
        if seg.shape() != first.shape() {
            return Err(EegError::Shape(format!(
                "segments have different shapes: {} != {}",
                fmt_shape(seg.shape()),
                fmt_shape(first.shape())
            )));
        }
        acc.zip_mut_with(seg, |a, &v| *a += v as f64);
    }
    let n = segments.len() as f64;
    Ok(acc.mapv(|v| (v / n) as f32))
}

fn check_center(center_samples: usize, data: &Array2<f32>) -> Result<()> {
    if center_samples > data.ncols() {
        return Err(EegError::InvalidArgument(format!(
            "center ({center_samples} samples) cannot be larger than length of the \
             averaged data block ({} samples)",
            data.ncols()
        )));
    }
    Ok(())
}
