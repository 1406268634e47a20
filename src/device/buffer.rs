//! Typed n-dimensional buffers living in a device context.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ndarray::{Array, ArrayD, ArrayView, ArrayViewMut, Dimension, IxDyn};

use super::{Context, ContextId, DeviceFault};
use crate::element::{Element, ElementType};
use crate::error::{Error, Result};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Type-erased contents of a [`DeviceBuffer`].
#[derive(Debug, Clone)]
pub enum Storage {
    /// Single precision data.
    F32(ArrayD<f32>),
    /// Double precision data.
    F64(ArrayD<f64>),
    /// 32-bit indices.
    I32(ArrayD<i32>),
    /// 64-bit indices.
    I64(ArrayD<i64>),
}

#[derive(Debug)]
struct BufferInner {
    id: u64,
    context: ContextId,
    element_type: ElementType,
    shape: Vec<usize>,
    c_contiguous: bool,
    storage: RwLock<Storage>,
}

/// Shared handle to an array allocated in a [`Context`].
///
/// Shape, layout and element type are fixed at allocation. Clones refer to
/// the same memory. Host readback through [`to_array`](Self::to_array)
/// observes whatever kernels have written so far, so wait on the relevant
/// events first.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    inner: Arc<BufferInner>,
}

impl DeviceBuffer {
    /// Move a host array into `context`.
    ///
    /// The layout is kept as given; arrays that are not in standard (row
    /// major) order are flagged non-contiguous and rejected by every
    /// operation.
    pub fn from_array<T: Element, D: Dimension>(context: &Context, array: Array<T, D>) -> Self {
        let array = array.into_dyn();
        let shape = array.shape().to_vec();
        let c_contiguous = array.is_standard_layout();
        Self {
            inner: Arc::new(BufferInner {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                context: context.id(),
                element_type: T::ELEMENT_TYPE,
                shape,
                c_contiguous,
                storage: RwLock::new(T::into_storage(array)),
            }),
        }
    }

    /// Allocate a C-contiguous buffer of `shape` from row-major `data`.
    pub fn from_shape_vec<T: Element>(
        context: &Context,
        shape: &[usize],
        data: Vec<T>,
    ) -> Result<Self> {
        let expected: usize = shape.iter().product();
        let found = data.len();
        let array = ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|_| {
            Error::ShapeMismatch {
                expected: format!("{expected} elements for shape {shape:?}"),
                actual: format!("{found} elements"),
            }
        })?;
        Ok(Self::from_array(context, array))
    }

    /// Allocate a zero-filled C-contiguous buffer.
    pub fn zeros<T: Element>(context: &Context, shape: &[usize]) -> Self {
        Self::from_array(context, ArrayD::<T>::default(IxDyn(shape)))
    }

    /// Process-unique buffer id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Context the buffer was allocated in.
    pub fn context_id(&self) -> ContextId {
        self.inner.context
    }

    /// Element type tag.
    pub fn element_type(&self) -> ElementType {
        self.inner.element_type
    }

    /// Extents, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.inner.shape.len()
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.inner.shape.iter().product()
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the elements are laid out in C (row major) order.
    pub fn is_c_contiguous(&self) -> bool {
        self.inner.c_contiguous
    }

    /// Whether both handles refer to the same allocation.
    pub fn same_buffer(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read_storage(&self) -> RwLockReadGuard<'_, Storage> {
        // Host readback after a faulted kernel still sees the last writes.
        self.inner
            .storage
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Copy the contents back to the host.
    pub fn to_array<T: Element>(&self) -> Result<ArrayD<T>> {
        let storage = self.read_storage();
        T::array(&storage)
            .cloned()
            .ok_or(Error::ElementTypeMismatch {
                argument: "buffer",
                expected: T::ELEMENT_TYPE,
                found: self.inner.element_type,
            })
    }

    /// Copy the contents back to the host in logical (row major) order.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.to_array::<T>()?.iter().copied().collect())
    }
}

/// How a kernel touches a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
}

/// A buffer as one named argument of a kernel launch.
#[derive(Debug, Clone)]
pub(crate) struct KernelArg {
    pub(crate) name: &'static str,
    pub(crate) buffer: DeviceBuffer,
    pub(crate) access: Access,
}

impl KernelArg {
    pub(crate) fn read(name: &'static str, buffer: &DeviceBuffer) -> Self {
        Self {
            name,
            buffer: buffer.clone(),
            access: Access::Read,
        }
    }

    pub(crate) fn write(name: &'static str, buffer: &DeviceBuffer) -> Self {
        Self {
            name,
            buffer: buffer.clone(),
            access: Access::Write,
        }
    }
}

enum Guard<'a> {
    // Shared between slots that read the same buffer.
    Read(Rc<RwLockReadGuard<'a, Storage>>),
    Write(RwLockWriteGuard<'a, Storage>),
}

/// One locked kernel argument.
pub(crate) struct BoundArg<'a> {
    kernel: &'static str,
    name: &'static str,
    guard: Guard<'a>,
}

impl<'a> BoundArg<'a> {
    fn storage(&self) -> &Storage {
        match &self.guard {
            Guard::Read(g) => &***g,
            Guard::Write(g) => &**g,
        }
    }

    fn type_fault<T: Element>(&self) -> DeviceFault {
        DeviceFault::new(
            self.kernel,
            format!("argument `{}` does not hold {}", self.name, T::ELEMENT_TYPE),
        )
    }

    fn shape_fault(&self, err: ndarray::ShapeError) -> DeviceFault {
        DeviceFault::new(self.kernel, format!("argument `{}`: {err}", self.name))
    }

    /// Read-only view with static dimensionality.
    pub(crate) fn view<T: Element, D: Dimension>(
        &self,
    ) -> std::result::Result<ArrayView<'_, T, D>, DeviceFault> {
        let array = T::array(self.storage()).ok_or_else(|| self.type_fault::<T>())?;
        array
            .view()
            .into_dimensionality::<D>()
            .map_err(|e| self.shape_fault(e))
    }

    /// Mutable view with static dimensionality; the argument must have been
    /// bound for writing.
    pub(crate) fn view_mut<T: Element, D: Dimension>(
        &mut self,
    ) -> std::result::Result<ArrayViewMut<'_, T, D>, DeviceFault> {
        let kernel = self.kernel;
        let name = self.name;
        let storage = match &mut self.guard {
            Guard::Write(g) => &mut **g,
            Guard::Read(_) => {
                return Err(DeviceFault::new(
                    kernel,
                    format!("argument `{name}` is bound read-only"),
                ))
            }
        };
        let array = T::array_mut(storage).ok_or_else(|| {
            DeviceFault::new(kernel, format!("argument `{name}` does not hold {}", T::ELEMENT_TYPE))
        })?;
        array
            .view_mut()
            .into_dimensionality::<D>()
            .map_err(|e| DeviceFault::new(kernel, format!("argument `{name}`: {e}")))
    }
}

/// All arguments of one launch, locked for the duration of the kernel.
pub(crate) struct Bindings<'a> {
    kernel: &'static str,
    slots: Vec<Option<BoundArg<'a>>>,
}

impl<'a> Bindings<'a> {
    /// Lock every argument in ascending buffer-id order.
    ///
    /// A buffer passed in several read-only slots is locked once and shared
    /// between them. Callers reject aliasing that involves a written slot
    /// before submission.
    pub(crate) fn lock(
        kernel: &'static str,
        args: &'a [KernelArg],
    ) -> std::result::Result<Self, DeviceFault> {
        let mut order: Vec<usize> = (0..args.len()).collect();
        order.sort_by_key(|&i| args[i].buffer.id());

        let mut slots: Vec<Option<BoundArg<'a>>> = (0..args.len()).map(|_| None).collect();
        let mut last_read: Option<(u64, Rc<RwLockReadGuard<'a, Storage>>)> = None;
        for i in order {
            let arg = &args[i];
            if arg.access == Access::Read {
                if let Some((id, shared)) = &last_read {
                    if *id == arg.buffer.id() {
                        slots[i] = Some(BoundArg {
                            kernel,
                            name: arg.name,
                            guard: Guard::Read(Rc::clone(shared)),
                        });
                        continue;
                    }
                }
            }
            let poisoned = || {
                DeviceFault::new(
                    kernel,
                    format!("argument `{}` was poisoned by an earlier kernel panic", arg.name),
                )
            };
            let guard = match arg.access {
                Access::Read => {
                    let shared = Rc::new(arg.buffer.inner.storage.read().map_err(|_| poisoned())?);
                    last_read = Some((arg.buffer.id(), Rc::clone(&shared)));
                    Guard::Read(shared)
                }
                Access::Write => {
                    Guard::Write(arg.buffer.inner.storage.write().map_err(|_| poisoned())?)
                }
            };
            slots[i] = Some(BoundArg {
                kernel,
                name: arg.name,
                guard,
            });
        }
        Ok(Self { kernel, slots })
    }

    /// Take the argument submitted at position `slot`.
    pub(crate) fn take(&mut self, slot: usize) -> std::result::Result<BoundArg<'a>, DeviceFault> {
        self.slots
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or_else(|| DeviceFault::new(self.kernel, format!("argument slot {slot} is not bound")))
    }
}
