use core::fmt;

use crate::device::DeviceFault;
use crate::element::ElementType;

/// Result alias for `lloyd`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned synchronously when an operation is submitted.
///
/// Every variant is a caller contract violation detected before any device
/// work is queued. Faults raised while a kernel runs travel through the
/// returned [`Event`](crate::Event) instead and only show up here when a
/// caller converts them with `?`.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A buffer has the wrong number of dimensions.
    DimensionalityMismatch {
        /// Argument name.
        argument: &'static str,
        /// Expected number of dimensions.
        expected: usize,
        /// Found number of dimensions.
        found: usize,
    },

    /// Buffer extents are not consistent with each other.
    ShapeMismatch {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        actual: String,
    },

    /// A buffer is not laid out in C-contiguous order.
    NonContiguous {
        /// Argument name.
        argument: &'static str,
    },

    /// Buffers taking part in one operation disagree on their element type.
    ElementTypeMismatch {
        /// Argument name.
        argument: &'static str,
        /// Element type shared by the other buffers.
        expected: ElementType,
        /// Element type of this buffer.
        found: ElementType,
    },

    /// Element type outside the supported set (f32/f64 data, i32/i64 indices).
    UnsupportedElementType {
        /// Argument name.
        argument: &'static str,
        /// Element type found.
        found: ElementType,
    },

    /// A buffer was allocated in a different execution context than the queue.
    IncompatibleContext {
        /// Argument name.
        argument: &'static str,
    },

    /// The same buffer was passed for two arguments of one operation.
    AliasedArguments {
        /// First argument name.
        first: &'static str,
        /// Second argument name.
        second: &'static str,
    },

    /// An extent cannot be represented by the chosen index type.
    IndexOverflow {
        /// Extent that must be stored.
        extent: usize,
        /// Index element type of the output.
        index_type: ElementType,
    },

    /// Invalid parameter value.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: &'static str,
    },

    /// A kernel faulted while executing on the device.
    DeviceFault(DeviceFault),

    /// Generic error with message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DimensionalityMismatch {
                argument,
                expected,
                found,
            } => write!(
                f,
                "argument `{argument}` must have {expected} dimension(s), found {found}"
            ),
            Error::ShapeMismatch { expected, actual } => {
                write!(f, "shape mismatch: expected {expected}, actual {actual}")
            }
            Error::NonContiguous { argument } => {
                write!(f, "argument `{argument}` must be C-contiguous")
            }
            Error::ElementTypeMismatch {
                argument,
                expected,
                found,
            } => write!(
                f,
                "argument `{argument}` has element type {found}, expected {expected}"
            ),
            Error::UnsupportedElementType { argument, found } => {
                write!(f, "argument `{argument}` has unsupported element type {found}")
            }
            Error::IncompatibleContext { argument } => write!(
                f,
                "argument `{argument}` was allocated in a context incompatible with the queue"
            ),
            Error::AliasedArguments { first, second } => {
                write!(f, "arguments `{first}` and `{second}` refer to the same buffer")
            }
            Error::IndexOverflow { extent, index_type } => {
                write!(f, "extent {extent} does not fit in index type {index_type}")
            }
            Error::InvalidParameter { name, message } => {
                write!(f, "invalid parameter '{name}': {message}")
            }
            Error::DeviceFault(fault) => write!(f, "{fault}"),
            Error::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<DeviceFault> for Error {
    fn from(fault: DeviceFault) -> Self {
        Error::DeviceFault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_argument() {
        let err = Error::NonContiguous { argument: "x_t" };
        assert!(err.to_string().contains("x_t"));

        let err = Error::ElementTypeMismatch {
            argument: "centroids_t",
            expected: ElementType::F32,
            found: ElementType::F64,
        };
        let s = err.to_string();
        assert!(s.contains("centroids_t"));
        assert!(s.contains("float64"));
        assert!(s.contains("float32"));
    }

    #[test]
    fn test_device_fault_converts() {
        let fault = DeviceFault::new("relocate_empty_clusters", "sample index out of range");
        let err: Error = fault.clone().into();
        assert_eq!(err, Error::DeviceFault(fault));
        assert!(err.to_string().contains("relocate_empty_clusters"));
    }
}
