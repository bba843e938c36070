//! Error taxonomy for the averaging core.
//!
//! | Variant           | Meaning                                              |
//! |-------------------|------------------------------------------------------|
//! | `Shape`           | wrong dimensionality or mismatched block shapes      |
//! | `InvalidArgument` | bad parameter combination (equal cutoffs, …)         |
//! | `OutOfRange`      | one segment request falls outside the loaded data    |
//! | `Programming`     | state-machine misuse (double load, read while empty) |
//!
//! `OutOfRange` is the only kind that [`Segmenter`](crate::segment::Segmenter)
//! swallows; it is recorded per category and the batch continues.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EegError {
    #[error("{0}")]
    Shape(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("requested segment at {time} s extends beyond data block")]
    OutOfRange { time: f64 },

    #[error("programming error: {0}")]
    Programming(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed recording: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, EegError>;

/// Format a shape the way error messages in this crate print it: `(a, b)`.
pub(crate) fn fmt_shape(shape: &[usize]) -> String {
    match shape {
        [n] => format!("({n},)"),
        dims => {
            let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}

/// Error returned by every `*_dyn` entry point handed a non-2-D array.
pub(crate) fn not_2d(shape: &[usize]) -> EegError {
    EegError::Shape(format!(
        "input array must be 2-dimensional. Got shape: {}",
        fmt_shape(shape)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_formatting() {
        assert_eq!(fmt_shape(&[3]), "(3,)");
        assert_eq!(fmt_shape(&[32, 10]), "(32, 10)");
        assert_eq!(fmt_shape(&[2, 2, 2]), "(2, 2, 2)");
    }

    #[test]
    fn out_of_range_message_carries_time() {
        let e = EegError::OutOfRange { time: 12.5 };
        assert!(e.to_string().contains("12.5"));
    }
}
