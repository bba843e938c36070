//! Butterworth IIR design and zero-phase application.
//!
//! - [`design`]: SOS Butterworth design for the four band types, matching
//!   `scipy.signal.butter(..., output='sos')`, memoised in a bounded LRU.
//! - [`apply`]: forward-backward filtering with constant edge padding,
//!   matching `scipy.signal.sosfiltfilt(..., padtype='constant')`.

pub mod apply;
pub mod design;

pub use apply::{filtfilt, filtfilt_dyn, sosfiltfilt};
pub use design::{
    butter, design, CoefficientCache, FilterKind, FilterSpec, SecondOrderSections, CACHE_CAPACITY,
};
