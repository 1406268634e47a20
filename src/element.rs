//! Element types of device buffers.
//!
//! Data buffers hold `f32` or `f64`; index and count buffers hold `i32` or
//! `i64`. The two widths are picked independently for every call, and the
//! kernels are generic over both through [`DataElement`] and
//! [`IndexElement`]. Only those four types implement [`Element`], so the
//! supported combinations are exactly the ones instantiated by the
//! dispatchers in [`ops`](crate::ops).

use core::fmt;
use std::iter::Sum;

use ndarray::ArrayD;
use num_traits::{Float, PrimInt};

use crate::device::Storage;

/// Runtime tag of a buffer's element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// Single precision float.
    F32,
    /// Double precision float.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F64 | ElementType::I64 => 8,
        }
    }

    /// Largest extent representable by an index type, `None` for data types.
    pub fn index_capacity(self) -> Option<usize> {
        match self {
            ElementType::I32 => Some(i32::MAX as usize),
            ElementType::I64 => Some(usize::try_from(i64::MAX).unwrap_or(usize::MAX)),
            ElementType::F32 | ElementType::F64 => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F32 => "float32",
            ElementType::F64 => "float64",
            ElementType::I32 => "int32",
            ElementType::I64 => "int64",
        };
        f.write_str(name)
    }
}

/// A type that can live in a [`DeviceBuffer`](crate::DeviceBuffer).
pub trait Element: Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Runtime tag for this type.
    const ELEMENT_TYPE: ElementType;

    /// Borrow the array if `storage` holds this type.
    fn array(storage: &Storage) -> Option<&ArrayD<Self>>;

    /// Mutably borrow the array if `storage` holds this type.
    fn array_mut(storage: &mut Storage) -> Option<&mut ArrayD<Self>>;

    /// Wrap an array into type-erased storage.
    fn into_storage(array: ArrayD<Self>) -> Storage;
}

/// Floating-point element of sample, centroid and statistics buffers.
pub trait DataElement: Element + Float + Sum {
    /// One half, for the half-norm identity.
    const HALF: Self;

    /// Width of [`order_key`](DataElement::order_key) in bits.
    const KEY_BITS: u32;

    /// Integer key whose unsigned order matches the float order.
    ///
    /// Negative values map below positive ones; `-0.0` sorts just below
    /// `+0.0`, positive NaN above `+inf`.
    fn order_key(self) -> u64;

    /// Inverse of [`order_key`](DataElement::order_key).
    fn from_order_key(key: u64) -> Self;
}

/// Integer element of assignment, index-list and counter buffers.
pub trait IndexElement: Element + PrimInt {
    /// Convert a position; extents are checked against the index width
    /// before submission.
    fn from_position(position: usize) -> Self;

    /// Position stored in this element, `None` when negative.
    fn to_position(self) -> Option<usize>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn array(storage: &Storage) -> Option<&ArrayD<Self>> {
                match storage {
                    Storage::$variant(array) => Some(array),
                    _ => None,
                }
            }

            fn array_mut(storage: &mut Storage) -> Option<&mut ArrayD<Self>> {
                match storage {
                    Storage::$variant(array) => Some(array),
                    _ => None,
                }
            }

            fn into_storage(array: ArrayD<Self>) -> Storage {
                Storage::$variant(array)
            }
        }
    };
}

impl_element!(f32, F32);
impl_element!(f64, F64);
impl_element!(i32, I32);
impl_element!(i64, I64);

impl DataElement for f32 {
    const HALF: Self = 0.5;
    const KEY_BITS: u32 = 32;

    fn order_key(self) -> u64 {
        let bits = self.to_bits();
        let key = if bits & 0x8000_0000 != 0 {
            !bits
        } else {
            bits | 0x8000_0000
        };
        u64::from(key)
    }

    fn from_order_key(key: u64) -> Self {
        // Keys produced by `order_key` occupy the low 32 bits.
        let key = (key & 0xffff_ffff) as u32;
        let bits = if key & 0x8000_0000 != 0 {
            key & 0x7fff_ffff
        } else {
            !key
        };
        f32::from_bits(bits)
    }
}

impl DataElement for f64 {
    const HALF: Self = 0.5;
    const KEY_BITS: u32 = 64;

    fn order_key(self) -> u64 {
        let bits = self.to_bits();
        if bits & 0x8000_0000_0000_0000 != 0 {
            !bits
        } else {
            bits | 0x8000_0000_0000_0000
        }
    }

    fn from_order_key(key: u64) -> Self {
        let bits = if key & 0x8000_0000_0000_0000 != 0 {
            key & 0x7fff_ffff_ffff_ffff
        } else {
            !key
        };
        f64::from_bits(bits)
    }
}

impl IndexElement for i32 {
    fn from_position(position: usize) -> Self {
        position as i32
    }

    fn to_position(self) -> Option<usize> {
        usize::try_from(self).ok()
    }
}

impl IndexElement for i64 {
    fn from_position(position: usize) -> Self {
        position as i64
    }

    fn to_position(self) -> Option<usize> {
        usize::try_from(self).ok()
    }
}
