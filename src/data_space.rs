//! Memory spaces and buffer management.
//!
//! Buffers are reference counted handles into one of the [`DataSpace`]s.
//! Every buffer tracks the number of outstanding asynchronous operations that
//! use it. Host views are refused while such work is pending, so a host read
//! of an accelerator written buffer is only possible after the owning
//! [`ExecutionResource`] was synchronized.

use crate::error::Error;
use crate::resource::ExecutionResource;
use crate::variant::ConcurrencyModel;
use exec::Real;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
pub enum DataSpace {
    /// Pageable host memory.
    Host,
    /// Page-locked host memory, accessible from the accelerator.
    PinnedHost,
    /// Unified memory migrated on demand.
    Managed,
    /// Accelerator global memory.
    AcceleratorGlobal,
}

impl DataSpace {
    #[must_use]
    pub fn host_accessible(self) -> bool {
        matches!(self, Self::Host | Self::PinnedHost | Self::Managed)
    }

    #[must_use]
    pub fn device_accessible(self) -> bool {
        matches!(self, Self::PinnedHost | Self::Managed | Self::AcceleratorGlobal)
    }

    #[must_use]
    pub fn accessible_from(self, model: ConcurrencyModel) -> bool {
        match model {
            ConcurrencyModel::Sequential | ConcurrencyModel::HostParallel => {
                self.host_accessible()
            }
            ConcurrencyModel::AcceleratorGrid => self.device_accessible(),
        }
    }
}

/// Buffer element.
pub trait Element: Copy + Default + Send + Sync + 'static {}

impl<T> Element for T where T: Copy + Default + Send + Sync + 'static {}

#[derive(Debug, Default)]
struct Usage {
    current: BTreeMap<DataSpace, u64>,
    peak: BTreeMap<DataSpace, u64>,
    limits: BTreeMap<DataSpace, u64>,
}

impl Usage {
    fn reserve(&mut self, space: DataSpace, bytes: u64) -> Result<(), Error> {
        let in_use = self.current.get(&space).copied().unwrap_or(0);
        let capacity = self.limits.get(&space).copied().unwrap_or(u64::MAX);
        let total = in_use.checked_add(bytes).filter(|total| *total <= capacity);
        let Some(total) = total else {
            return Err(Error::Allocation {
                space,
                requested: bytes,
                in_use,
                capacity,
            });
        };
        self.current.insert(space, total);
        let peak = self.peak.entry(space).or_insert(0);
        *peak = (*peak).max(total);
        Ok(())
    }

    fn release(&mut self, space: DataSpace, bytes: u64) {
        if let Some(in_use) = self.current.get_mut(&space) {
            *in_use = in_use.saturating_sub(bytes);
        }
    }
}

/// Allocates, deallocates and copies buffers across data spaces.
///
/// One manager exists per variant run, its peak usage is that run's memory
/// footprint.
#[derive(Debug, Default)]
pub struct DataSpaceManager {
    usage: Arc<Mutex<Usage>>,
    next_id: AtomicU64,
}

impl DataSpaceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(limits: impl IntoIterator<Item = (DataSpace, u64)>) -> Self {
        let manager = Self::default();
        manager.usage.lock().limits.extend(limits);
        manager
    }

    pub fn set_limit(&self, space: DataSpace, bytes: u64) {
        self.usage.lock().limits.insert(space, bytes);
    }

    /// Allocate `count` default initialized elements in `space`.
    ///
    /// Fails with [`Error::Allocation`] if the space limit is exceeded or the
    /// process cannot provide the memory.
    pub fn allocate<T: Element>(&self, space: DataSpace, count: usize) -> Result<Buffer<T>, Error> {
        let bytes = (count as u64)
            .checked_mul(std::mem::size_of::<T>() as u64)
            .unwrap_or(u64::MAX);
        self.usage.lock().reserve(space, bytes)?;

        let mut cells: Vec<UnsafeCell<T>> = Vec::new();
        if cells.try_reserve_exact(count).is_err() {
            let mut usage = self.usage.lock();
            usage.release(space, bytes);
            let in_use = usage.current.get(&space).copied().unwrap_or(0);
            let capacity = usage.limits.get(&space).copied().unwrap_or(u64::MAX);
            log::warn!("failed to allocate {bytes} bytes in {space}");
            return Err(Error::Allocation {
                space,
                requested: bytes,
                in_use,
                capacity,
            });
        }
        cells.resize_with(count, || UnsafeCell::new(T::default()));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        log::trace!("allocated buffer {id} of {count} elements ({bytes} bytes) in {space}");
        Ok(Buffer {
            inner: Arc::new(Inner {
                id,
                space,
                bytes,
                cells: cells.into_boxed_slice(),
                view: RwLock::new(()),
                pending: AtomicUsize::new(0),
                usage: Arc::clone(&self.usage),
            }),
        })
    }

    /// Allocate a buffer in `space` holding a copy of `values`.
    pub fn allocate_from<T: Element>(&self, space: DataSpace, values: &[T]) -> Result<Buffer<T>, Error> {
        let buffer = self.allocate(space, values.len())?;
        buffer.view_mut().copy_from_slice(values);
        Ok(buffer)
    }

    /// Release a buffer handle.
    ///
    /// The memory is returned once all handles, including those held by
    /// enqueued work, are gone.
    pub fn deallocate<T>(&self, buffer: Buffer<T>) {
        log::trace!(
            "deallocating buffer {} in {} ({} handles)",
            buffer.inner.id,
            buffer.inner.space,
            Arc::strong_count(&buffer.inner)
        );
        drop(buffer);
    }

    /// Copy the first `count` elements of `src` into `dst`.
    ///
    /// Without a resource the copy happens immediately and fails if either
    /// buffer has pending work. With a resource the copy is enqueued behind
    /// all previously enqueued work. Bounds are checked immediately in both
    /// cases.
    pub fn copy<T: Element>(
        &self,
        dst: &Buffer<T>,
        src: &Buffer<T>,
        count: usize,
        resource: Option<&ExecutionResource>,
    ) -> Result<(), Error> {
        let (src_len, dst_len) = (src.len(), dst.len());
        if count > src_len || count > dst_len {
            return Err(Error::CopyOutOfBounds {
                count,
                src_len,
                dst_len,
            });
        }
        if Arc::ptr_eq(&dst.inner, &src.inner) {
            return Ok(());
        }
        match resource {
            None => {
                src.check_idle()?;
                dst.check_idle()?;
                copy_elements(dst, src, count);
                Ok(())
            }
            Some(resource) => {
                let (dst, src) = (dst.clone(), src.clone());
                let guards = (dst.pending_guard(), src.pending_guard());
                resource.enqueue(async move {
                    copy_elements(&dst, &src, count);
                    drop(guards);
                    Ok(())
                })
            }
        }
    }

    /// Bytes currently allocated in `space`.
    #[must_use]
    pub fn in_use(&self, space: DataSpace) -> u64 {
        self.usage.lock().current.get(&space).copied().unwrap_or(0)
    }

    /// Peak bytes allocated per space.
    #[must_use]
    pub fn footprint(&self) -> stats::MemoryFootprint {
        let usage = self.usage.lock();
        let mut footprint = stats::MemoryFootprint::new();
        for (space, bytes) in &usage.peak {
            footprint.record(space.to_string(), *bytes);
        }
        footprint
    }
}

fn copy_elements<T: Element>(dst: &Buffer<T>, src: &Buffer<T>, count: usize) {
    let src = src.view();
    let mut dst = dst.view_mut();
    dst[..count].copy_from_slice(&src[..count]);
}

/// Element with a lock-free atomic representation.
///
/// Element accesses of kernels use relaxed atomic operations on the buffer
/// memory, so concurrent threads never serialize on a lock.
pub trait AtomicElement: Element {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and aligned.
    unsafe fn atomic_load(ptr: *mut Self) -> Self;

    /// # Safety
    ///
    /// `ptr` must be valid for writes and aligned.
    unsafe fn atomic_store(ptr: *mut Self, value: Self);
}

macro_rules! atomic_element {
    ($ty:ty, $atomic:ty, $bits:ty, $to_bits:expr, $from_bits:expr) => {
        const _: () = assert!(
            std::mem::size_of::<$ty>() == std::mem::size_of::<$atomic>()
                && std::mem::align_of::<$ty>() >= std::mem::align_of::<$atomic>()
        );

        impl AtomicElement for $ty {
            #[inline]
            unsafe fn atomic_load(ptr: *mut Self) -> Self {
                let bits = <$atomic>::from_ptr(ptr.cast::<$bits>()).load(Ordering::Relaxed);
                ($from_bits)(bits)
            }

            #[inline]
            unsafe fn atomic_store(ptr: *mut Self, value: Self) {
                <$atomic>::from_ptr(ptr.cast::<$bits>()).store(($to_bits)(value), Ordering::Relaxed);
            }
        }
    };
}

atomic_element!(f64, AtomicU64, u64, f64::to_bits, f64::from_bits);
atomic_element!(u64, AtomicU64, u64, std::convert::identity, std::convert::identity);
atomic_element!(f32, AtomicU32, u32, f32::to_bits, f32::from_bits);
atomic_element!(u32, AtomicU32, u32, std::convert::identity, std::convert::identity);
atomic_element!(usize, AtomicUsize, usize, std::convert::identity, std::convert::identity);

/// Buffer memory.
///
/// Host views and copies hold `view` and are only created while no
/// [`BufferPtr`] is alive or behind all enqueued work. Kernels access the
/// cells through atomic operations without holding `view`.
struct Inner<T> {
    id: u64,
    space: DataSpace,
    bytes: u64,
    cells: Box<[UnsafeCell<T>]>,
    view: RwLock<()>,
    pending: AtomicUsize,
    usage: Arc<Mutex<Usage>>,
}

// cells are only accessed through host views guarded by `view` or through
// atomic element operations
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send + Sync> Sync for Inner<T> {}

impl<T> std::fmt::Debug for Inner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("space", &self.space)
            .field("len", &self.cells.len())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<T> Inner<T> {
    fn elements(&self) -> *mut T {
        UnsafeCell::raw_get(self.cells.as_ptr())
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.usage.lock().release(self.space, self.bytes);
    }
}

/// Handle to a buffer in one data space.
#[derive(Debug)]
pub struct Buffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Buffer<T> {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn space(&self) -> DataSpace {
        self.inner.space
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of outstanding operations using this buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    fn check_idle(&self) -> Result<(), Error> {
        match self.pending() {
            0 => Ok(()),
            pending => Err(Error::PendingWork {
                id: self.inner.id,
                space: self.inner.space,
                pending,
            }),
        }
    }

    fn check_host_view(&self) -> Result<(), Error> {
        if !self.inner.space.host_accessible() {
            return Err(Error::InaccessibleSpace {
                space: self.inner.space,
                model: ConcurrencyModel::Sequential,
            });
        }
        self.check_idle()
    }

    fn view(&self) -> HostView<'_, T> {
        let guard = self.inner.view.read();
        // SAFETY: writers of the cells hold the view lock exclusively or
        // are excluded by the pending counter
        let elements = unsafe { std::slice::from_raw_parts(self.inner.elements(), self.len()) };
        HostView {
            _guard: guard,
            elements,
        }
    }

    fn view_mut(&self) -> HostViewMut<'_, T> {
        let guard = self.inner.view.write();
        // SAFETY: the exclusive view lock excludes all other views
        let elements =
            unsafe { std::slice::from_raw_parts_mut(self.inner.elements(), self.len()) };
        HostViewMut {
            _guard: guard,
            elements,
        }
    }

    /// Read-only host view.
    pub fn host(&self) -> Result<HostView<'_, T>, Error> {
        self.check_host_view()?;
        Ok(self.view())
    }

    /// Mutable host view.
    pub fn host_mut(&self) -> Result<HostViewMut<'_, T>, Error> {
        self.check_host_view()?;
        Ok(self.view_mut())
    }

    /// Element access for code running under `model`.
    ///
    /// The buffer counts as in use until the pointer is dropped.
    pub fn ptr(&self, model: ConcurrencyModel) -> Result<BufferPtr<T>, Error> {
        if !self.inner.space.accessible_from(model) {
            return Err(Error::InaccessibleSpace {
                space: self.inner.space,
                model,
            });
        }
        Ok(BufferPtr {
            guard: self.pending_guard(),
        })
    }

    /// Mark the buffer as used by asynchronous work until the guard drops.
    #[must_use]
    pub fn pending_guard(&self) -> PendingGuard<T> {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        PendingGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct HostView<'a, T> {
    _guard: RwLockReadGuard<'a, ()>,
    elements: &'a [T],
}

impl<'a, T> HostView<'a, T> {
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.elements
    }
}

impl<'a, T> std::ops::Deref for HostView<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.elements
    }
}

pub struct HostViewMut<'a, T> {
    _guard: RwLockWriteGuard<'a, ()>,
    elements: &'a mut [T],
}

impl<'a, T> std::ops::Deref for HostViewMut<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.elements
    }
}

impl<'a, T> std::ops::DerefMut for HostViewMut<'a, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.elements
    }
}

#[derive(Debug)]
pub struct PendingGuard<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        self.inner.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Element access to a buffer from kernel code.
///
/// Accesses are relaxed atomic operations on single elements and never
/// block. Panics on out of bounds accesses like slice indexing.
#[derive(Debug)]
pub struct BufferPtr<T> {
    guard: PendingGuard<T>,
}

impl<T> BufferPtr<T> {
    #[inline]
    fn element(&self, idx: usize) -> *mut T {
        self.guard.inner.cells[idx].get()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.guard.inner.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: AtomicElement> BufferPtr<T> {
    #[must_use]
    #[inline]
    pub fn load(&self, idx: usize) -> T {
        // SAFETY: the element is in bounds and host views are excluded
        // while the pointer is alive
        unsafe { T::atomic_load(self.element(idx)) }
    }

    #[inline]
    pub fn store(&self, idx: usize, value: T) {
        // SAFETY: see `load`
        unsafe { T::atomic_store(self.element(idx), value) }
    }
}

impl BufferPtr<Real> {
    /// Atomically add `value` to the element at `idx`, returning the old value.
    pub fn atomic_add(&self, idx: usize, value: Real) -> Real {
        // SAFETY: see `load`
        let bits = unsafe { AtomicU64::from_ptr(self.element(idx).cast::<u64>()) };
        let mut current = bits.load(Ordering::Relaxed);
        loop {
            let new = (Real::from_bits(current) + value).to_bits();
            match bits.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(previous) => return Real::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}
