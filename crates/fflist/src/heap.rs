//! The allocator core
use core::{
    marker::PhantomData,
    mem::MaybeUninit,
    ptr::{self, NonNull},
};

use crate::utils::{align_down, checked_align_up, nonnull_slice_len, nonnull_slice_start};

mod block;
mod check;
mod free_list;

use self::{
    block::{block_of, payload_of, phys_end_of, BlockHdr, FreeBlockHdr},
    free_list::FreeList,
};
pub use self::{
    block::{ALIGNMENT, HEADER_SIZE, MAX_REQUEST_SIZE, MIN_BLOCK_SIZE, MIN_PAYLOAD_SIZE},
    check::{BlockInfo, Blocks, DumpMode, FreeBlocks, HeapCorruption, HeapStats},
};

#[doc = svgbobdoc::transform!(
/// An explicit free list allocator managing one contiguous memory segment.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   Physical order (by address)
///
///   segment start                                                     segment end
///   ,-------+-----------,-------+-----------------,-------+------------,
///   | hdr   | payload   | hdr   | prev | next |   | hdr   | prev | next|
///   | 24 U  |  (user)   | 40 F  |  o   |  o   |   | 16 F  |  o   |  o  |
///   '-------+-----------'-------+--|---+--|---+---'-------+--|---+--|--'
///                                  |      |          ^       |      |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶|╶╶╶╶╶╶|╶╶╶╶╶╶╶
///   Free list order (by links)     v      '----------'       |      v
///                                 None                       |     None
///                  head ----------------------------------------> (16 F)
/// ```
/// </center>
///
/// # Properties
///
/// Every payload is aligned to [`ALIGNMENT`] bytes and at least
/// [`MIN_PAYLOAD_SIZE`] bytes long. Requests larger than
/// [`MAX_REQUEST_SIZE`] bytes are refused.
///
/// No two free blocks are ever physically adjacent: a released block is merged
/// with its free neighbors on both sides.
)]
#[derive(Debug)]
pub struct Heap<'pool> {
    /// The first block of the segment.
    start: NonNull<BlockHdr>,
    /// One past the last byte of the segment.
    end: *mut u8,
    free_list: FreeList,
    _phantom: PhantomData<&'pool mut ()>,
}

// Safety: All memory block headers directly or indirectly referenced by a
//         particular instance of `Heap` are logically owned by that `Heap` and
//         have no interior mutability, so these are safe.
unsafe impl Send for Heap<'_> {}

unsafe impl Sync for Heap<'_> {}

impl<'pool> Heap<'pool> {
    /// Construct a heap spanning the specified memory block.
    ///
    /// Returns `None` if the memory block is too small to hold a single block
    /// of [`MIN_BLOCK_SIZE`] bytes after its ends are aligned to
    /// [`ALIGNMENT`]-byte boundaries.
    ///
    /// # Examples
    ///
    /// ```
    /// use fflist::Heap;
    /// use std::mem::MaybeUninit;
    /// let mut pool = [MaybeUninit::uninit(); 1024];
    /// let heap = Heap::new(&mut pool).unwrap();
    /// assert_eq!(heap.stats().free_blocks, 1);
    /// ```
    ///
    /// The memory block must outlive the heap:
    ///
    /// ```rust,compile_fail
    /// use fflist::Heap;
    /// use std::mem::MaybeUninit;
    /// let heap;
    /// {
    ///     let mut pool = [MaybeUninit::uninit(); 1024];
    ///     heap = Heap::new(&mut pool).unwrap();
    /// }
    /// drop(heap);
    /// ```
    #[inline]
    pub fn new(pool: &'pool mut [MaybeUninit<u8>]) -> Option<Self> {
        // Safety: `pool` is a mutable reference, which guarantees the absence
        // of aliasing references. Being `'pool` means it will outlive `self`.
        unsafe {
            Self::from_ptr(NonNull::new_unchecked(
                pool as *mut [MaybeUninit<u8>] as *mut [u8],
            ))
        }
    }

    /// Construct a heap spanning the memory block specified by a slice
    /// pointer.
    ///
    /// # Safety
    ///
    /// See [`Self::from_raw_parts`].
    #[inline]
    pub unsafe fn from_ptr(pool: NonNull<[u8]>) -> Option<Self> {
        Self::from_raw_parts(nonnull_slice_start(pool), nonnull_slice_len(pool))
    }

    /// Construct a heap spanning `len` bytes starting at `start`.
    ///
    /// Returns `None` (and writes nothing) if the memory block is too small.
    ///
    /// # Safety
    ///
    /// The memory block will be considered owned by the returned heap. It must
    /// be valid for reads and writes and must outlive the heap.
    pub unsafe fn from_raw_parts(start: NonNull<u8>, len: usize) -> Option<Self> {
        // Round up the starting address and round down the ending address
        let unaligned_start = start.as_ptr() as usize;
        let aligned_start = checked_align_up(unaligned_start, ALIGNMENT)?;
        let aligned_end = align_down(unaligned_start.checked_add(len)?, ALIGNMENT);

        let size = aligned_end
            .checked_sub(aligned_start)
            .filter(|&x| x >= MIN_BLOCK_SIZE)?;

        let block: NonNull<FreeBlockHdr> =
            NonNull::new_unchecked(start.as_ptr().add(aligned_start - unaligned_start)).cast();
        let end = start.as_ptr().add(aligned_end - unaligned_start);

        // The whole segment becomes one free block
        ptr::write(
            ptr::addr_of_mut!((*block.as_ptr()).common),
            BlockHdr {
                size: size - HEADER_SIZE,
                prev_phys_block: None,
            },
        );

        let mut free_list = FreeList::EMPTY;
        free_list.push_front(block);

        log::trace!(
            "heap: segment {:p}..{:p} ({} bytes)",
            block,
            end,
            size
        );

        Some(Self {
            start: block.cast(),
            end,
            free_list,
            _phantom: PhantomData,
        })
    }

    /// Round up a request to the payload size actually reserved for it.
    /// Returns `None` for requests that are refused outright.
    #[inline]
    fn payload_size_for_request(size: usize) -> Option<usize> {
        if size == 0 || size > MAX_REQUEST_SIZE {
            return None;
        }

        // `MAX_REQUEST_SIZE` is far from `usize::MAX`, so this can't overflow
        let size = checked_align_up(size, ALIGNMENT)?;
        Some(size.max(MIN_PAYLOAD_SIZE))
    }

    /// Get the block physically following `block`, `None` if `block` is the
    /// last block of the segment.
    ///
    /// # Safety
    ///
    /// `block` must be a block of `self`.
    #[inline]
    unsafe fn next_phys_block(&self, block: NonNull<BlockHdr>) -> Option<NonNull<BlockHdr>> {
        let next = phys_end_of(block);
        if next < self.end {
            Some(NonNull::new_unchecked(next).cast())
        } else {
            None
        }
    }

    /// Shrink `block`'s payload from `payload_space` to `payload` bytes and
    /// turn the excess into a new free block, which is returned.
    ///
    /// # Safety
    ///
    ///  - `block` must be a block of `self` with a payload of `payload_space`
    ///    bytes.
    ///  - `payload_space - payload` must be at least [`MIN_BLOCK_SIZE`].
    ///
    unsafe fn partition(
        &mut self,
        mut block: NonNull<BlockHdr>,
        payload_space: usize,
        payload: usize,
    ) -> NonNull<FreeBlockHdr> {
        debug_assert_eq!(block.as_ref().payload_size(), payload_space);
        debug_assert!(payload_space - payload >= MIN_BLOCK_SIZE);
        debug_assert_eq!(payload % ALIGNMENT, 0);

        let new_free_block: NonNull<FreeBlockHdr> =
            NonNull::new_unchecked(payload_of(block).as_ptr().add(payload)).cast();
        ptr::write(
            ptr::addr_of_mut!((*new_free_block.as_ptr()).common),
            BlockHdr {
                size: payload_space - payload - HEADER_SIZE,
                prev_phys_block: Some(block),
            },
        );
        block.as_mut().set_payload_size(payload);

        // Update `next_phys_block.prev_phys_block` to point to the new
        // free block
        if let Some(mut next_phys_block) = self.next_phys_block(new_free_block.cast()) {
            next_phys_block.as_mut().prev_phys_block = Some(new_free_block.cast());
        }

        log::trace!(
            " split {:p}: {} + {} bytes",
            block,
            payload,
            payload_space - payload - HEADER_SIZE
        );

        self.free_list.push_front(new_free_block);
        new_free_block
    }

    /// Search the free list for the first block with a payload of at least
    /// `payload` bytes, split off any usable excess, and take the block out
    /// of the free list.
    fn find_fit(&mut self, payload: usize) -> Option<NonNull<BlockHdr>> {
        let mut cursor = self.free_list.head();

        while let Some(block) = cursor {
            // Safety: Every free list node is a free block of `self`
            unsafe {
                let payload_space = block.as_ref().common.payload_size();
                if payload_space >= payload {
                    if payload_space - payload >= MIN_BLOCK_SIZE {
                        self.partition(block.cast(), payload_space, payload);
                    }
                    self.free_list.unlink(block);
                    return Some(block.cast());
                }

                cursor = block.as_ref().next_free;
            }
        }

        None
    }

    /// Absorb every free block physically following `block` into `block`.
    ///
    /// # Safety
    ///
    /// `block` must be a block of `self`.
    unsafe fn coalesce_right(&mut self, mut block: NonNull<BlockHdr>) {
        while let Some(next_phys_block) = self.next_phys_block(block) {
            let next_phys_block_hdr = next_phys_block.as_ref();
            if next_phys_block_hdr.is_used() {
                break;
            }

            let size =
                block.as_ref().payload_size() + HEADER_SIZE + next_phys_block_hdr.payload_size();
            self.free_list.unlink(next_phys_block.cast());
            block.as_mut().set_payload_size(size);

            log::trace!(" merge {:p} into {:p}", next_phys_block, block);
        }

        if let Some(mut next_phys_block) = self.next_phys_block(block) {
            next_phys_block.as_mut().prev_phys_block = Some(block);
        }
    }

    /// The number of bytes `block` could grow by through
    /// [`Self::coalesce_right`]. Does not modify anything.
    ///
    /// # Safety
    ///
    /// `block` must be a block of `self`.
    unsafe fn free_space_right_of(&self, block: NonNull<BlockHdr>) -> usize {
        let mut space = 0;
        let mut cursor = self.next_phys_block(block);
        while let Some(next_phys_block) = cursor {
            if next_phys_block.as_ref().is_used() {
                break;
            }
            space += HEADER_SIZE + next_phys_block.as_ref().payload_size();
            cursor = self.next_phys_block(next_phys_block);
        }
        space
    }

    /// Attempt to allocate a block of memory.
    ///
    /// Returns the starting address of the allocated memory block on success;
    /// `None` if `size` is zero, larger than [`MAX_REQUEST_SIZE`], or no free
    /// block is large enough.
    ///
    /// The returned memory block is aligned to [`ALIGNMENT`] bytes.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in linear time (`O(number of free blocks)`).
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let payload = Self::payload_size_for_request(size);
        let block = payload.and_then(|payload| self.find_fit(payload));

        // Safety: `block` was just taken from the free list
        let ptr = block.map(|block| unsafe { payload_of(block) });
        log::trace!("allocate({}) → {:?}", size, ptr);
        ptr
    }

    /// Deallocate a previously allocated memory block. Does nothing if `ptr`
    /// is `None`.
    ///
    /// The memory block is merged with any free blocks physically adjacent to
    /// it.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated via `self` and
    /// not deallocated since.
    pub unsafe fn deallocate(&mut self, ptr: Option<NonNull<u8>>) {
        let ptr = if let Some(ptr) = ptr {
            ptr
        } else {
            return;
        };
        log::trace!("deallocate({:p})", ptr);

        let block = block_of(ptr);
        debug_assert!(block.as_ref().is_used());

        // Merge with the next blocks if they're free
        self.coalesce_right(block);

        // Merge with the previous block if it's a free block. It's already
        // in the free list, so it only needs to grow.
        if let Some(mut prev_phys_block) = block.as_ref().prev_phys_block {
            if !prev_phys_block.as_ref().is_used() {
                let size = prev_phys_block.as_ref().payload_size()
                    + HEADER_SIZE
                    + block.as_ref().payload_size();
                prev_phys_block.as_mut().set_payload_size(size);

                if let Some(mut next_phys_block) = self.next_phys_block(prev_phys_block) {
                    next_phys_block.as_mut().prev_phys_block = Some(prev_phys_block);
                }

                log::trace!(" merge {:p} into {:p}", block, prev_phys_block);
                return;
            }
        }

        self.free_list.push_front(block.cast());
    }

    /// Shrink or grow a previously allocated memory block.
    ///
    /// Returns the new starting address of the memory block on success;
    /// `None` otherwise.
    ///
    ///  - If `ptr` is `None`, this is equivalent to [`Self::allocate`].
    ///  - If `new_size` is zero, the memory block is deallocated and `None` is
    ///    returned.
    ///  - Otherwise, the block is resized in place if possible (shedding or
    ///    absorbing space at its end), and moved to a newly allocated block if
    ///    not. In the latter case, the contents are copied and the old block
    ///    is deallocated.
    ///
    /// On failure, the original memory block and the rest of the heap are left
    /// untouched.
    ///
    /// # Time Complexity
    ///
    /// Unlike [`Self::deallocate`], this method will complete in linear time
    /// (`O(number of free blocks + old_size)`).
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or denote a memory block previously allocated via
    /// `self` and not deallocated since.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let ptr = if let Some(ptr) = ptr {
            ptr
        } else {
            return self.allocate(new_size);
        };

        if new_size == 0 {
            self.deallocate(Some(ptr));
            return None;
        }

        let payload = Self::payload_size_for_request(new_size)?;
        let block = block_of(ptr);
        let old_payload = block.as_ref().payload_size();
        let min_split = payload + MIN_BLOCK_SIZE;

        log::trace!("reallocate({:p}, {}) from {}", ptr, new_size, old_payload);

        if old_payload >= payload {
            if old_payload >= min_split {
                // Shed the excess. The new free block might be followed by
                // another free block.
                let new_free_block = self.partition(block, old_payload, payload);
                self.coalesce_right(new_free_block.cast());
            } else {
                // The excess is too small to stand on its own
            }
            return Some(ptr);
        }

        // Grow into the next free blocks if they're large enough
        if old_payload + self.free_space_right_of(block) >= payload {
            self.coalesce_right(block);

            let grown_payload = block.as_ref().payload_size();
            debug_assert!(grown_payload >= payload);
            if grown_payload >= min_split {
                self.partition(block, grown_payload, payload);
            }
            return Some(ptr);
        }

        // Move the contents to a new memory block
        let new_ptr = self.allocate(new_size)?;
        ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_payload);
        self.deallocate(Some(ptr));

        log::trace!(" moved {:p} → {:p}", ptr, new_ptr);
        Some(new_ptr)
    }

    /// Get the payload size of a previously allocated memory block, which is
    /// at least as large as the requested size.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated via `self` and
    /// not deallocated since.
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        block_of(ptr).as_ref().payload_size()
    }
}
