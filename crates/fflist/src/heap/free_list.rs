//! The explicit free list: an unordered doubly-linked list threaded through
//! the payloads of all free blocks.
use core::{mem, ptr::NonNull};

use super::block::FreeBlockHdr;

#[derive(Debug)]
pub(super) struct FreeList {
    head: Option<NonNull<FreeBlockHdr>>,
}

impl FreeList {
    pub const EMPTY: Self = Self { head: None };

    #[inline]
    pub fn head(&self) -> Option<NonNull<FreeBlockHdr>> {
        self.head
    }

    /// Insert the specified block at the front of the list and mark it free.
    ///
    /// Updates `FreeBlockHdr::{prev_free, next_free}`.
    ///
    /// # Safety
    ///
    ///  - `block`'s header must be initialized and its payload must be at
    ///    least [`MIN_PAYLOAD_SIZE`](super::MIN_PAYLOAD_SIZE) bytes long.
    ///  - The list must not currently contain `block`.
    ///
    pub unsafe fn push_front(&mut self, mut block: NonNull<FreeBlockHdr>) {
        let next_free = mem::replace(&mut self.head, Some(block));
        if let Some(mut next_free) = next_free {
            next_free.as_mut().prev_free = Some(block);
        }

        let block = block.as_mut();
        block.prev_free = None;
        block.next_free = next_free;
        block.common.set_used(false);
    }

    /// Remove the specified block from the list and mark it used.
    ///
    /// # Safety
    ///
    /// The list must currently contain `block`.
    pub unsafe fn unlink(&mut self, mut block: NonNull<FreeBlockHdr>) {
        let prev_free = block.as_ref().prev_free;
        let next_free = block.as_ref().next_free;

        match (prev_free, next_free) {
            (None, None) => {
                // The only free block
                debug_assert_eq!(self.head, Some(block));
                self.head = None;
            }
            (None, Some(mut next_free)) => {
                // The first free block
                debug_assert_eq!(self.head, Some(block));
                next_free.as_mut().prev_free = None;
                self.head = Some(next_free);
            }
            (Some(mut prev_free), None) => {
                // The last free block
                prev_free.as_mut().next_free = None;
            }
            (Some(mut prev_free), Some(mut next_free)) => {
                prev_free.as_mut().next_free = Some(next_free);
                next_free.as_mut().prev_free = Some(prev_free);
            }
        }

        block.as_mut().common.set_used(true);
    }
}
