//! This crate implements an explicit free list dynamic memory allocator with
//! first-fit placement.
//!
//!  - **The memory pool is provided by an application.** The allocator never
//!    grows its pool and never returns memory to an underlying system.
//!    Examples of potential pool sources include: a `static` array, a memory
//!    block allocated by another memory allocator for arena allocation.
//!
//!  - **Free blocks are tracked in an unordered doubly-linked list** whose
//!    links live inside the free blocks themselves. Allocation is a linear
//!    first-fit scan of this list, which favors throughput over utilization.
//!
//!  - **Blocks are split and coalesced eagerly.** An oversized free block is
//!    split when the remainder can stand on its own, and a released block is
//!    merged with its free physical neighbors on both sides.
//!
//!  - **This crate supports `#![no_std]`.** It can be used in bare-metal and
//!    RTOS-based applications.
//!
//! # Examples
//!
//! ## `Heap`: Core API
//!
//! ```rust
//! use fflist::Heap;
//! use std::mem::MaybeUninit;
//!
//! let mut pool = [MaybeUninit::uninit(); 4096];
//! let mut heap = Heap::new(&mut pool).unwrap();
//!
//! unsafe {
//!     let mut ptr1 = heap.allocate(8).unwrap().cast::<u64>();
//!     let mut ptr2 = heap.allocate(8).unwrap().cast::<u64>();
//!     *ptr1.as_mut() = 42;
//!     *ptr2.as_mut() = 56;
//!     assert_eq!(*ptr1.as_ref(), 42);
//!     assert_eq!(*ptr2.as_ref(), 56);
//!     heap.deallocate(Some(ptr1.cast()));
//!     heap.deallocate(Some(ptr2.cast()));
//! }
//!
//! assert!(heap.validate().is_ok());
//! ```
//!
//! ## `GlobalHeap`: Global Allocator
//!
//! ```rust
//! use std::alloc::{GlobalAlloc, Layout};
//!
//! static A: fflist::GlobalHeap<65536> = fflist::GlobalHeap::new();
//!
//! unsafe {
//!     let layout = Layout::new::<[u32; 4]>();
//!     let ptr = A.alloc(layout);
//!     assert!(!ptr.is_null());
//!     A.dealloc(ptr, layout);
//! }
//! ```
//!
//! # Details
//!
//! ## Block Layout
//!
//! Every block starts with a [`HEADER_SIZE`]-byte header holding the payload
//! size, the allocated flag (packed into the low bit of the size), and a
//! pointer to the physically preceding block. The payload of a free block
//! stores the previous and next links of the free list, which is why every
//! payload is at least [`MIN_PAYLOAD_SIZE`] bytes long.
//!
//! ## Thread Safety
//!
//! [`Heap`] is single-threaded and non-reentrant; every operation takes
//! `&mut self`. [`GlobalHeap`] wraps one behind a lock.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod global;
mod heap;
mod utils;
pub use self::{
    global::GlobalHeap,
    heap::{
        BlockInfo, Blocks, DumpMode, FreeBlocks, Heap, HeapCorruption, HeapStats, ALIGNMENT,
        HEADER_SIZE, MAX_REQUEST_SIZE, MIN_BLOCK_SIZE, MIN_PAYLOAD_SIZE,
    },
};

#[cfg(any(test, feature = "std"))]
extern crate std;
