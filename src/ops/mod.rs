//! Host entry points.
//!
//! Every operation first validates its arguments synchronously, in a fixed
//! order: dimensionality, contiguity, extents, parameter values, context,
//! aliasing, element types, index capacity. Only then is the kernel
//! instantiated for the buffers' `(data, index)` element types and handed
//! to the queue. A rejected call queues nothing.
//!
//! Operations return the [`KernelLaunch`](crate::KernelLaunch) pair; the
//! kernel's own faults arrive through its `compute` event.

mod elementwise;
mod lloyd;
mod relocation;

pub use elementwise::{broadcast_divide, centroid_shift, half_norm_squared};
pub use lloyd::{accumulate_shards, assignment, distance_matrix, reduce_stats, ReductionBuffers, ShardBuffers};
pub use relocation::{
    order_statistic_threshold, relocate_empty_clusters, repair_empty_clusters, select_far_samples,
    RelocationBuffers, SelectionBuffers, SelectionScratch,
};

use crate::device::{DeviceBuffer, Queue};
use crate::element::ElementType;
use crate::error::{Error, Result};

/// Floating-point width resolved for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataType {
    F32,
    F64,
}

/// Index width resolved for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexType {
    I32,
    I64,
}

/// Bind `$T` to the resolved data type and evaluate `$body`.
macro_rules! with_data_type {
    ($dt:expr, $T:ident, $body:expr) => {
        match $dt {
            $crate::ops::DataType::F32 => {
                type $T = f32;
                $body
            }
            $crate::ops::DataType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}

/// Bind `$T` and `$I` to the resolved data and index types and evaluate
/// `$body`. Instantiates exactly the four supported combinations.
macro_rules! with_element_types {
    ($dt:expr, $it:expr, $T:ident, $I:ident, $body:expr) => {
        match ($dt, $it) {
            ($crate::ops::DataType::F32, $crate::ops::IndexType::I32) => {
                type $T = f32;
                type $I = i32;
                $body
            }
            ($crate::ops::DataType::F32, $crate::ops::IndexType::I64) => {
                type $T = f32;
                type $I = i64;
                $body
            }
            ($crate::ops::DataType::F64, $crate::ops::IndexType::I32) => {
                type $T = f64;
                type $I = i32;
                $body
            }
            ($crate::ops::DataType::F64, $crate::ops::IndexType::I64) => {
                type $T = f64;
                type $I = i64;
                $body
            }
        }
    };
}

pub(crate) use with_data_type;
pub(crate) use with_element_types;

/// One buffer argument and the dimensionality it must have.
#[derive(Clone, Copy)]
pub(crate) struct Arg<'a> {
    pub(crate) name: &'static str,
    pub(crate) buffer: &'a DeviceBuffer,
    pub(crate) ndim: usize,
    pub(crate) written: bool,
}

/// An argument the kernel only reads.
pub(crate) fn arg<'a>(name: &'static str, buffer: &'a DeviceBuffer, ndim: usize) -> Arg<'a> {
    Arg {
        name,
        buffer,
        ndim,
        written: false,
    }
}

/// An argument the kernel writes.
pub(crate) fn out<'a>(name: &'static str, buffer: &'a DeviceBuffer, ndim: usize) -> Arg<'a> {
    Arg {
        written: true,
        ..arg(name, buffer, ndim)
    }
}

impl Arg<'_> {
    /// Extent of `axis`; only meaningful after [`check_layout`].
    pub(crate) fn extent(&self, axis: usize) -> usize {
        self.buffer.shape().get(axis).copied().unwrap_or(0)
    }

    /// Require `shape[axis] == expected`.
    pub(crate) fn expect_extent(&self, axis: usize, expected: usize) -> Result<()> {
        if self.extent(axis) == expected {
            return Ok(());
        }
        Err(Error::ShapeMismatch {
            expected: format!("{}.shape[{axis}] == {expected}", self.name),
            actual: format!("{}.shape == {:?}", self.name, self.buffer.shape()),
        })
    }

    /// Require `shape[axis] >= minimum`.
    pub(crate) fn expect_at_least(&self, axis: usize, minimum: usize) -> Result<()> {
        if self.extent(axis) >= minimum {
            return Ok(());
        }
        Err(Error::ShapeMismatch {
            expected: format!("{}.shape[{axis}] >= {minimum}", self.name),
            actual: format!("{}.shape == {:?}", self.name, self.buffer.shape()),
        })
    }
}

/// Dimensionality, then C-contiguity, of every argument.
pub(crate) fn check_layout(args: &[Arg<'_>]) -> Result<()> {
    for a in args {
        if a.buffer.ndim() != a.ndim {
            return Err(Error::DimensionalityMismatch {
                argument: a.name,
                expected: a.ndim,
                found: a.buffer.ndim(),
            });
        }
    }
    match args.iter().find(|a| !a.buffer.is_c_contiguous()) {
        Some(a) => Err(Error::NonContiguous { argument: a.name }),
        None => Ok(()),
    }
}

/// Every argument lives in the queue's context and no written buffer is
/// passed in a second slot. A buffer may be read through several slots.
pub(crate) fn check_placement(queue: &Queue, args: &[Arg<'_>]) -> Result<()> {
    if let Some(a) = args.iter().find(|a| !queue.is_compatible(a.buffer)) {
        return Err(Error::IncompatibleContext { argument: a.name });
    }
    for (i, a) in args.iter().enumerate() {
        if let Some(b) = args[i + 1..]
            .iter()
            .find(|b| (a.written || b.written) && a.buffer.same_buffer(b.buffer))
        {
            return Err(Error::AliasedArguments {
                first: a.name,
                second: b.name,
            });
        }
    }
    Ok(())
}

fn common_type(args: &[Arg<'_>]) -> Result<Option<ElementType>> {
    let Some(first) = args.first() else {
        return Ok(None);
    };
    let expected = first.buffer.element_type();
    for a in &args[1..] {
        let found = a.buffer.element_type();
        if found != expected {
            return Err(Error::ElementTypeMismatch {
                argument: a.name,
                expected,
                found,
            });
        }
    }
    Ok(Some(expected))
}

/// The floating-point type shared by all `args`.
pub(crate) fn data_type(args: &[Arg<'_>]) -> Result<DataType> {
    match common_type(args)? {
        Some(ElementType::F32) => Ok(DataType::F32),
        Some(ElementType::F64) => Ok(DataType::F64),
        Some(found) => Err(Error::UnsupportedElementType {
            argument: args[0].name,
            found,
        }),
        None => Err(Error::Other("operation has no data arguments".to_string())),
    }
}

/// The integer type shared by all `args`.
pub(crate) fn index_type(args: &[Arg<'_>]) -> Result<IndexType> {
    match common_type(args)? {
        Some(ElementType::I32) => Ok(IndexType::I32),
        Some(ElementType::I64) => Ok(IndexType::I64),
        Some(found) => Err(Error::UnsupportedElementType {
            argument: args[0].name,
            found,
        }),
        None => Err(Error::Other("operation has no index arguments".to_string())),
    }
}

/// Largest value stored into an index buffer must fit its type.
pub(crate) fn check_index_capacity(index: IndexType, largest: usize) -> Result<()> {
    let index_type = match index {
        IndexType::I32 => ElementType::I32,
        IndexType::I64 => ElementType::I64,
    };
    match index_type.index_capacity() {
        Some(capacity) if largest <= capacity => Ok(()),
        _ => Err(Error::IndexOverflow {
            extent: largest,
            index_type,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Context;
    use ndarray::array;

    #[test]
    fn test_layout_checks_ndim_before_contiguity() {
        let ctx = Context::new("test");
        let strided = DeviceBuffer::from_array(&ctx, array![[1.0f32, 2.0], [3.0, 4.0]].reversed_axes());
        let flat = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        let err = check_layout(&[arg("a", &strided, 2), arg("b", &flat, 2)]).unwrap_err();
        assert!(matches!(err, Error::DimensionalityMismatch { argument: "b", .. }));
        let err = check_layout(&[arg("a", &strided, 2), arg("b", &flat, 1)]).unwrap_err();
        assert_eq!(err, Error::NonContiguous { argument: "a" });
    }

    #[test]
    fn test_placement() {
        let ctx = Context::new("test");
        let other = Context::new("other");
        let queue = Queue::new(&ctx).unwrap();
        let a = DeviceBuffer::zeros::<f32>(&ctx, &[2]);
        let b = DeviceBuffer::zeros::<f32>(&other, &[2]);
        assert_eq!(
            check_placement(&queue, &[arg("a", &a, 1), arg("b", &b, 1)]).unwrap_err(),
            Error::IncompatibleContext { argument: "b" }
        );
        let alias = a.clone();
        assert_eq!(
            check_placement(&queue, &[arg("x", &a, 1), out("y", &alias, 1)]).unwrap_err(),
            Error::AliasedArguments { first: "x", second: "y" }
        );
        assert_eq!(
            check_placement(&queue, &[out("x", &a, 1), arg("y", &alias, 1)]).unwrap_err(),
            Error::AliasedArguments { first: "x", second: "y" }
        );
        assert!(check_placement(&queue, &[arg("x", &a, 1), arg("y", &alias, 1)]).is_ok());
    }

    #[test]
    fn test_type_resolution() {
        let ctx = Context::new("test");
        let f = DeviceBuffer::zeros::<f64>(&ctx, &[1]);
        let g = DeviceBuffer::zeros::<f32>(&ctx, &[1]);
        let i = DeviceBuffer::zeros::<i64>(&ctx, &[1]);
        assert_eq!(data_type(&[arg("f", &f, 1)]).unwrap(), DataType::F64);
        assert_eq!(index_type(&[arg("i", &i, 1)]).unwrap(), IndexType::I64);
        assert!(matches!(
            data_type(&[arg("f", &f, 1), arg("g", &g, 1)]),
            Err(Error::ElementTypeMismatch { argument: "g", .. })
        ));
        assert!(matches!(
            data_type(&[arg("i", &i, 1)]),
            Err(Error::UnsupportedElementType { argument: "i", .. })
        ));
        assert!(matches!(
            index_type(&[arg("f", &f, 1)]),
            Err(Error::UnsupportedElementType { .. })
        ));
    }

    #[test]
    fn test_index_capacity() {
        assert!(check_index_capacity(IndexType::I32, i32::MAX as usize).is_ok());
        assert!(matches!(
            check_index_capacity(IndexType::I32, i32::MAX as usize + 1),
            Err(Error::IndexOverflow { index_type: ElementType::I32, .. })
        ));
        assert!(check_index_capacity(IndexType::I64, i32::MAX as usize + 1).is_ok());
    }
}
