use crate::layout::{ActLayout, DataType};
use std::borrow::Cow;
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for half::f16 {}
}

/// Output element kinds the epilogues can write.
pub trait Element: sealed::Sealed + Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    const DTYPE: DataType;
    fn from_f32(v: f32) -> Self;
    fn to_f32(self) -> f32;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;
    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        v
    }
    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }
}

impl Element for half::f16 {
    const DTYPE: DataType = DataType::F16;
    #[inline(always)]
    fn from_f32(v: f32) -> Self {
        half::f16::from_f32(v)
    }
    #[inline(always)]
    fn to_f32(self) -> f32 {
        half::f16::to_f32(self)
    }
}

/// Read-only window over an activation buffer.
#[derive(Debug, Clone)]
pub struct TensorView<'a, T: Clone = f32> {
    pub data: Cow<'a, [T]>,
    pub layout: ActLayout,
}

impl<'a, T: Copy> TensorView<'a, T> {
    pub fn new(data: &'a [T], layout: ActLayout) -> Self {
        assert_eq!(data.len(), layout.len(), "Data length mismatch");
        Self {
            data: Cow::Borrowed(data),
            layout,
        }
    }

    /// Lane `lane` of block `cb` at `(y, x)`.
    #[inline]
    pub fn at(&self, n: usize, g: usize, cb: usize, y: usize, x: usize, lane: usize) -> T {
        self.data[self.layout.offset(n, g, cb, y, x) + lane * self.layout.lane_stride()]
    }
}

/// Raw buffer shared by the threads of one parallel phase.
///
/// Threads write disjoint regions through copies of the same handle; the
/// `unsafe` accessors are sound only under that rule.
#[derive(Debug, Clone, Copy)]
pub struct SharedMut<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

unsafe impl<T: Send> Send for SharedMut<'_, T> {}
unsafe impl<T: Send> Sync for SharedMut<'_, T> {}

impl<'a, T: Copy> SharedMut<'a, T> {
    pub fn new(data: &'a mut [T]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// `offset < len` and no other thread accesses `offset` concurrently.
    #[inline(always)]
    pub unsafe fn write(&self, offset: usize, v: T) {
        debug_assert!(offset < self.len);
        *self.ptr.add(offset) = v;
    }

    /// # Safety
    /// Same contract as [`SharedMut::write`].
    #[inline(always)]
    pub unsafe fn read(&self, offset: usize) -> T {
        debug_assert!(offset < self.len);
        *self.ptr.add(offset)
    }

    /// # Safety
    /// `offset + len <= self.len()` and the range is owned by the caller
    /// for the lifetime of the returned slice.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [T] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.add(offset), len)
    }
}

/// [`SharedMut`] plus the layout that addresses it.
#[derive(Debug, Clone, Copy)]
pub struct TensorViewMut<'a, T> {
    pub buf: SharedMut<'a, T>,
    pub layout: ActLayout,
}

impl<'a, T: Copy> TensorViewMut<'a, T> {
    pub fn new(data: &'a mut [T], layout: ActLayout) -> Self {
        assert_eq!(data.len(), layout.len(), "Data length mismatch");
        Self {
            buf: SharedMut::new(data),
            layout,
        }
    }
}
