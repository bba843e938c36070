//! # evoked: event-related averaging of continuous EEG
//!
//! `evoked` cuts fixed-length windows around event markers out of a
//! continuous, possibly discontiguous multichannel recording, filters them
//! with a zero-phase Butterworth filter, rejects windows with artifacts,
//! averages them per category and optionally re-references the averages.
//! The Butterworth design and forward-backward filtering are ported from
//! SciPy (`signal.butter(..., output='sos')` and `signal.sosfiltfilt`).
//!
//! ## Pipeline overview
//!
//! ```text
//! recording.safetensors      events.json
//!   │                          │
//!   ├─ io::Recording           io::EventTable      code → sorted times
//!   │
//!   ├─ Segmenter               per epoch: read → filtfilt → cut windows
//!   │    └─ extract_segment    round(center·sr)+1 split, constant length
//!   ├─ drop_bad_segments       max − min > criterion on any channel
//!   ├─ Averages::add           per-category mean, shared shape and centre
//!   ├─ set_average_reference   subtract mean of good channels
//!   └─ io::write_averages      avg_<i> tensors + timeline + history
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use evoked::io::{EventTable, Recording};
//! use evoked::{run_erp, ErpConfig};
//! use std::path::Path;
//!
//! let mut rec = Recording::load(Path::new("data/raw.safetensors")).unwrap();
//! let events  = EventTable::load(Path::new("data/events.json")).unwrap();
//!
//! let cfg = ErpConfig {
//!     labels:  vec!["TRSP".into()],
//!     lowpass: Some(30.0),
//!     ..ErpConfig::default()
//! };
//! let out = run_erp(&mut rec, &events, &cfg).unwrap();
//! for avg in out.averages.iter() {
//!     println!("{}: {} segments, shape {:?}", avg.label, avg.num_segments, avg.shape());
//! }
//! ```
//!
//! ## Running individual steps
//!
//! ```
//! use evoked::filter::filtfilt;
//! use evoked::segment::extract_segment;
//! use evoked::reference::average_reference;
//! use evoked::Averages;
//! use ndarray::Array2;
//!
//! let data: Array2<f32> = Array2::zeros((4, 1000)); // [C, T] at 250 Hz
//!
//! // 4th-order 1–30 Hz bandpass, forward and backward
//! let data = filtfilt(&data, 250.0, 4, Some(1.0), Some(30.0)).unwrap();
//!
//! // 0.2 s before / 0.5 s after an event at 2 s
//! let seg = extract_segment(&data, 2.0, 0.2, 0.5, 250.0).unwrap();
//! assert_eq!(seg.dim(), (4, 175));
//!
//! let mut avgs = Averages::new(50, 250.0, vec![]);
//! avgs.add("target", &[seg]).unwrap();
//! let referenced = average_reference(avgs.data("target").unwrap(), &[]).unwrap();
//! assert_eq!(referenced.dim(), (4, 175));
//! ```

pub mod artifact;
pub mod average;
pub mod config;
pub mod epoch;
pub mod error;
pub mod filter;
pub mod io;
pub mod reference;
pub mod segment;
pub mod workflow;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// errors
pub use error::{EegError, Result};

// config
pub use config::ErpConfig;

// epochs and the reader seam
pub use epoch::{Epoch, RecordingReader};

// filter design and zero-phase application
pub use filter::{butter, filtfilt, filtfilt_dyn, FilterKind, FilterSpec, SecondOrderSections};

// segmentation
pub use segment::{extract_segment, extract_segment_dyn, seconds_to_samples, Segmenter, Segments};

// artifact rejection
pub use artifact::{detect_bad_channels, detect_bad_channels_dyn, drop_bad_segments};

// reference
pub use reference::{average_reference, average_reference_dyn};

// averaging
pub use average::{Average, Averages, TimelineEntry};

// workflow
pub use workflow::{run_erp, ErpOutput, HistoryEntry};
