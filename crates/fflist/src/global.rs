use core::{
    alloc,
    cell::UnsafeCell,
    mem::MaybeUninit,
    ops,
    ptr::{self, NonNull},
};

use const_default1::ConstDefault;

use crate::{Heap, HeapCorruption, HeapStats, ALIGNMENT};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use self::unix as os;
    } else {
        mod fallback;
        use self::fallback as os;
    }
}

/// [`Heap`] over an `N`-byte static pool as a global allocator.
///
/// The heap is constructed on first use. Every operation is serialized by a
/// lock, which is process-wide on unix targets.
///
/// Layouts whose alignment exceeds [`ALIGNMENT`] are refused.
///
/// `GlobalHeap` must not be moved after its first allocation because the heap
/// refers to its own pool. Place it in a `static`. The lock is not reentrant,
/// so when `GlobalHeap` is the `#[global_allocator]`, the installed logger
/// must not allocate while handling `fflist`'s `trace` records.
pub struct GlobalHeap<const N: usize> {
    pool: UnsafeCell<[MaybeUninit<u8>; N]>,
    inner: UnsafeCell<Option<Heap<'static>>>,
    mutex: os::Mutex,
}

unsafe impl<const N: usize> Send for GlobalHeap<N> {}
unsafe impl<const N: usize> Sync for GlobalHeap<N> {}

impl<const N: usize> ConstDefault for GlobalHeap<N> {
    const DEFAULT: Self = Self::new();
}

impl<const N: usize> Default for GlobalHeap<N> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> GlobalHeap<N> {
    /// The initializer.
    #[inline]
    pub const fn new() -> Self {
        Self {
            pool: UnsafeCell::new([MaybeUninit::uninit(); N]),
            inner: UnsafeCell::new(None),
            mutex: <os::Mutex as ConstDefault>::DEFAULT,
        }
    }

    #[inline]
    fn lock_inner(&self) -> impl ops::DerefMut<Target = Option<Heap<'static>>> + '_ {
        struct LockGuard<'a, const N: usize>(&'a GlobalHeap<N>);

        impl<const N: usize> ops::Deref for LockGuard<'_, N> {
            type Target = Option<Heap<'static>>;

            #[inline]
            fn deref(&self) -> &Self::Target {
                // Safety: Protected by `mutex`
                unsafe { &*self.0.inner.get() }
            }
        }

        impl<const N: usize> ops::DerefMut for LockGuard<'_, N> {
            #[inline]
            fn deref_mut(&mut self) -> &mut Self::Target {
                // Safety: Protected by `mutex`
                unsafe { &mut *self.0.inner.get() }
            }
        }

        impl<const N: usize> Drop for LockGuard<'_, N> {
            #[inline]
            fn drop(&mut self) {
                self.0.mutex.unlock();
            }
        }

        self.mutex.lock();
        LockGuard(self)
    }

    /// Run `f` on the heap under the lock, constructing the heap first if
    /// this is the first use. Returns `None` if the pool is too small to
    /// construct a heap.
    #[inline]
    fn with_heap<R>(&self, f: impl FnOnce(&mut Heap<'static>) -> R) -> Option<R> {
        let mut inner = self.lock_inner();
        if inner.is_none() {
            // Safety: The pool is only ever accessed through the heap, which
            //         is constructed at most once. `self` is not moved while
            //         the heap exists (upheld by the user).
            *inner = unsafe {
                Heap::from_raw_parts(NonNull::new_unchecked(self.pool.get() as *mut u8), N)
            };
        }
        inner.as_mut().map(f)
    }

    /// Count blocks and payload bytes. All zeros if nothing has been
    /// allocated yet.
    pub fn stats(&self) -> HeapStats {
        let inner = self.lock_inner();
        inner.as_ref().map(Heap::stats).unwrap_or_default()
    }

    /// Check the heap for consistency. See [`Heap::validate`].
    pub fn validate(&self) -> Result<(), HeapCorruption> {
        let inner = self.lock_inner();
        inner.as_ref().map_or(Ok(()), Heap::validate)
    }
}

unsafe impl<const N: usize> alloc::GlobalAlloc for GlobalHeap<N> {
    #[inline]
    unsafe fn alloc(&self, layout: alloc::Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        self.with_heap(|heap| heap.allocate(layout.size()))
            .flatten()
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: alloc::Layout) {
        // Safety: `ptr` denotes a previous allocation (upheld by the caller)
        self.with_heap(|heap| heap.deallocate(NonNull::new(ptr)));
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: alloc::Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        // Safety: `ptr` denotes a previous allocation (upheld by the caller).
        //         `new_size` is non-zero, so the old allocation is preserved
        //         on failure.
        self.with_heap(|heap| heap.reallocate(NonNull::new(ptr), new_size))
            .flatten()
            .map(NonNull::as_ptr)
            .unwrap_or(ptr::null_mut())
    }
}
