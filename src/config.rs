//! ERP workflow configuration.
//!
//! [`ErpConfig`] holds every tunable parameter of the averaging workflow.
//! All fields have defaults, and the whole struct can be read from JSON so a
//! run can be reproduced from a file.

use serde::{Deserialize, Serialize};

use crate::error::{EegError, Result};
use crate::segment::seconds_to_samples;

/// Configuration for the event-related averaging workflow.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use evoked::ErpConfig;
///
/// let cfg = ErpConfig {
///     labels:  vec!["TRSP".into()],
///     lowpass: Some(30.0),   // 30 Hz lowpass before segmenting
///     ..ErpConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErpConfig {
    /// Event codes to segment on, one category per code.
    ///
    /// Default: `[]`; at least one is required by [`validate`](Self::validate).
    pub labels: Vec<String>,

    /// Category names for the output, parallel to `labels`.
    ///
    /// When `None` the labels themselves name the categories.
    ///
    /// Default: `None`.
    pub categories: Option<Vec<String>>,

    /// Window length before each event in seconds.
    ///
    /// The event sample itself counts toward this side.
    ///
    /// Default: `1.0` s.
    pub left_padding: f64,

    /// Window length after each event in seconds.
    ///
    /// Default: `1.0` s.
    pub right_padding: f64,

    /// Highpass cutoff in Hz. With `lowpass` also set and
    /// `highpass < lowpass` the filter is a bandpass; with
    /// `highpass > lowpass` it is a bandstop over `[lowpass, highpass]`.
    ///
    /// Default: `None`.
    pub highpass: Option<f64>,

    /// Lowpass cutoff in Hz.
    ///
    /// Default: `None`.
    pub lowpass: Option<f64>,

    /// Butterworth order. The signal is filtered forward and backward, so the
    /// effective order is twice this for high/lowpass and four times this for
    /// bandpass/bandstop.
    ///
    /// Default: `4`.
    pub filter_order: usize,

    /// Peak-to-peak amplitude criterion for segment rejection. A segment is
    /// dropped if any channel's `max − min` exceeds it.
    ///
    /// Default: `None` (no rejection).
    pub artifact_criterion: Option<f64>,

    /// Re-reference the averages to the mean of the good channels.
    ///
    /// Default: `false`.
    pub average_reference: bool,

    /// 1-based channel numbers to exclude from the reference, added to any
    /// the recording marks bad itself.
    ///
    /// Default: `[]`.
    pub bad_channels: Vec<usize>,

    /// Recording device name copied to the output.
    ///
    /// Default: `""`.
    pub device: String,
}

impl Default for ErpConfig {
    /// 1 s / 1 s windows · order 4 · no filtering, rejection or reference.
    fn default() -> Self {
        Self {
            labels: vec![],
            categories: None,
            left_padding: 1.0,
            right_padding: 1.0,
            highpass: None,
            lowpass: None,
            filter_order: 4,
            artifact_criterion: None,
            average_reference: false,
            bad_channels: vec![],
            device: String::new(),
        }
    }
}

impl ErpConfig {
    /// Check value ranges and that `categories` matches `labels`.
    pub fn validate(&self) -> Result<()> {
        if self.labels.is_empty() {
            return Err(EegError::InvalidArgument("no labels specified".into()));
        }
        if let Some(cats) = &self.categories {
            if cats.len() != self.labels.len() {
                return Err(EegError::InvalidArgument(format!(
                    "number of event labels {:?} does not equal number of categories {:?}",
                    self.labels, cats
                )));
            }
        }
        for (side, value) in [("left", self.left_padding), ("right", self.right_padding)] {
            if !(value >= 0.0) {
                return Err(EegError::InvalidArgument(format!(
                    "negative {side} padding: {value}"
                )));
            }
        }
        for (name, freq) in [("highpass", self.highpass), ("lowpass", self.lowpass)] {
            if let Some(f) = freq {
                if !(f > 0.0) {
                    return Err(EegError::InvalidArgument(format!(
                        "non-positive {name} frequency: {f}"
                    )));
                }
            }
        }
        if self.filter_order < 1 {
            return Err(EegError::InvalidArgument(format!(
                "filter order < 1: {}",
                self.filter_order
            )));
        }
        if let Some(c) = self.artifact_criterion {
            if !(c >= 0.0) {
                return Err(EegError::InvalidArgument(format!(
                    "negative artifact criterion: {c}"
                )));
            }
        }
        Ok(())
    }

    /// `(category, label)` pairs in configured order.
    pub fn category_labels(&self) -> Vec<(String, String)> {
        let names = self.categories.as_ref().unwrap_or(&self.labels);
        names.iter().cloned().zip(self.labels.iter().cloned()).collect()
    }

    /// Event position inside each window, in seconds from its first sample.
    ///
    /// # Examples
    ///
    /// ```
    /// use evoked::ErpConfig;
    /// let cfg = ErpConfig { left_padding: 0.1234, ..ErpConfig::default() };
    /// assert_eq!(cfg.center_seconds(100.0).unwrap(), 0.11);
    /// ```
    pub fn center_seconds(&self, sample_rate: f64) -> Result<f64> {
        Ok(self.center_samples(sample_rate)? as f64 / sample_rate)
    }

    /// Index of the event sample inside each window: `round(left_padding · sr) − 1`.
    ///
    /// The event sample closes the left half of the window, so a left padding
    /// shorter than one sample leaves it outside and is rejected.
    pub fn center_samples(&self, sample_rate: f64) -> Result<usize> {
        let n = seconds_to_samples(self.left_padding, sample_rate);
        if n < 1 {
            return Err(EegError::InvalidArgument(format!(
                "left padding of {} s is shorter than one sample at {sample_rate} Hz",
                self.left_padding
            )));
        }
        Ok((n - 1) as usize)
    }

    /// Read a configuration from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| EegError::Format(format!("config: {e}")))
    }
}
