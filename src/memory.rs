//! Native Memory Regions
//!
//! Owned, zero-initialized, aligned off-heap blocks used to pass structs by
//! value and to receive struct results. A region is released when it is
//! freed or dropped; both consume the owner, so a freed region cannot be
//! touched again.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::error::{DowncallError, DowncallResult};
use crate::layout::LayoutDescriptor;

/// A raw native address with no ownership attached.
///
/// Used for pointer-classified arguments and results. The bridge never
/// dereferences it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub const fn new(addr: usize) -> Self {
        Address(addr)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Plain values that can be read from and written to a region.
pub trait Primitive: sealed::Sealed + Copy {
    const SIZE: usize;
    const ALIGN: usize;
}

macro_rules! impl_primitive {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Primitive for $t {
                const SIZE: usize = std::mem::size_of::<$t>();
                const ALIGN: usize = std::mem::align_of::<$t>();
            }
        )*
    };
}

impl_primitive!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, Address);

/// Smallest alignment a region is allocated with
const MIN_REGION_ALIGN: usize = 8;

/// Owned block of native memory
pub struct NativeRegion {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
    layout: Option<LayoutDescriptor>,
}

impl NativeRegion {
    /// Allocate zeroed storage sized and aligned for `layout`
    pub fn allocate(layout: &LayoutDescriptor) -> DowncallResult<Self> {
        let mut region = Self::allocate_bytes(layout.size() as usize, layout.align() as usize)?;
        region.layout = Some(layout.clone());
        Ok(region)
    }

    /// Allocate `size` zeroed bytes aligned to at least `align`
    pub fn allocate_bytes(size: usize, align: usize) -> DowncallResult<Self> {
        let align = align.max(MIN_REGION_ALIGN);
        let failure = || DowncallError::AllocationFailure { size, align };

        // Zero-sized requests still get a unique allocation.
        let alloc_layout = Layout::from_size_align(size.max(1), align).map_err(|_| failure())?;
        let raw = unsafe { alloc::alloc_zeroed(alloc_layout) };
        let ptr = NonNull::new(raw).ok_or_else(failure)?;

        Ok(Self {
            ptr,
            len: size,
            align,
            layout: None,
        })
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment of the base address
    pub fn alignment(&self) -> usize {
        self.align
    }

    /// Layout this region was allocated for, if any
    pub fn layout(&self) -> Option<&LayoutDescriptor> {
        self.layout.as_ref()
    }

    /// Base address. Valid while the region is alive.
    pub fn address(&self) -> Address {
        Address::from_ptr(self.ptr.as_ptr())
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Read a `T` at `offset`
    pub fn read<T: Primitive>(&self, offset: usize) -> DowncallResult<T> {
        self.check::<T>(offset)?;
        Ok(unsafe { std::ptr::read(self.ptr.as_ptr().add(offset) as *const T) })
    }

    /// Write a `T` at `offset`
    pub fn write<T: Primitive>(&mut self, offset: usize, value: T) -> DowncallResult<()> {
        self.check::<T>(offset)?;
        unsafe { std::ptr::write(self.ptr.as_ptr().add(offset) as *mut T, value) };
        Ok(())
    }

    /// Fill the region with `byte`
    pub fn fill(&mut self, byte: u8) {
        self.as_bytes_mut().fill(byte);
    }

    /// Release the memory now.
    pub fn free(self) {
        drop(self)
    }

    fn check<T: Primitive>(&self, offset: usize) -> DowncallResult<()> {
        let in_bounds = offset
            .checked_add(T::SIZE)
            .map(|end| end <= self.len)
            .unwrap_or(false);
        if !in_bounds {
            return Err(DowncallError::OutOfBounds {
                offset,
                size: T::SIZE,
                length: self.len,
            });
        }
        // The base is aligned to at least MIN_REGION_ALIGN, which covers
        // every primitive, so the offset alone decides.
        if offset % T::ALIGN != 0 {
            return Err(DowncallError::Misaligned {
                offset,
                align: T::ALIGN,
            });
        }
        Ok(())
    }
}

impl Drop for NativeRegion {
    fn drop(&mut self) {
        // Same size/align pair as the allocation, already validated there.
        let layout = unsafe { Layout::from_size_align_unchecked(self.len.max(1), self.align) };
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

impl fmt::Debug for NativeRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegion")
            .field("address", &self.address())
            .field("len", &self.len)
            .field("align", &self.align)
            .finish()
    }
}

// Safety: the region exclusively owns its allocation; mutation requires
// `&mut`, so shared references only ever read.
unsafe impl Send for NativeRegion {}
unsafe impl Sync for NativeRegion {}
