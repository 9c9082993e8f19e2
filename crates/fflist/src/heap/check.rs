//! Heap walkers, statistics, and the heap consistency checker.
use core::{fmt, ptr::NonNull};

use super::{
    block::{payload_of, phys_end_of, BlockHdr, FreeBlockHdr, SIZE_USED},
    Heap, ALIGNMENT, HEADER_SIZE, MIN_BLOCK_SIZE, MIN_PAYLOAD_SIZE,
};

/// A snapshot of one block's header, produced by [`Heap::blocks`] and
/// [`Heap::free_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// The start of the block's payload.
    pub payload: NonNull<u8>,
    pub payload_size: usize,
    pub allocated: bool,
}

impl BlockInfo {
    #[inline]
    unsafe fn from_hdr(block: NonNull<BlockHdr>) -> Self {
        let hdr = block.as_ref();
        Self {
            payload: payload_of(block),
            payload_size: hdr.payload_size(),
            allocated: hdr.is_used(),
        }
    }
}

/// Iterator over the blocks of a [`Heap`] in physical (address) order.
#[derive(Debug, Clone)]
pub struct Blocks<'a, 'pool> {
    heap: &'a Heap<'pool>,
    cursor: Option<NonNull<BlockHdr>>,
}

impl Iterator for Blocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor?;
        // Safety: `cursor` is always a block of `heap`
        unsafe {
            self.cursor = self.heap.next_phys_block(block);
            Some(BlockInfo::from_hdr(block))
        }
    }
}

/// Iterator over the blocks of a [`Heap`] in free list order.
#[derive(Debug, Clone)]
pub struct FreeBlocks<'a, 'pool> {
    _heap: &'a Heap<'pool>,
    cursor: Option<NonNull<FreeBlockHdr>>,
}

impl Iterator for FreeBlocks<'_, '_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor?;
        // Safety: `cursor` is always a free list node of `heap`
        unsafe {
            self.cursor = block.as_ref().next_free;
            Some(BlockInfo::from_hdr(block.cast()))
        }
    }
}

/// Block counts and payload byte totals of a [`Heap`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub used_blocks: usize,
    pub used_bytes: usize,
}

/// What [`Heap::dump`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// Every block in physical order.
    Blocks,
    /// Every free list node in list order.
    FreeList,
    Both,
}

/// An inconsistency found by [`Heap::validate`]. Addresses are block header
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapCorruption {
    /// The physical walk did not land exactly on the end of the segment.
    Coverage { end: usize, expected: usize },
    /// A payload size is misaligned, below [`MIN_PAYLOAD_SIZE`], or larger
    /// than the segment.
    PayloadSize { block: usize, size: usize },
    /// A block's physical predecessor tag doesn't match the actual
    /// predecessor.
    BoundaryTag { block: usize },
    /// A free block appears in the free list `count` times instead of once.
    FreeBlockListed { block: usize, count: usize },
    /// An allocated block appears in the free list.
    UsedBlockListed { block: usize },
    /// Two free blocks are physically adjacent.
    AdjacentFreeBlocks { block: usize },
    /// A free list node lies outside the segment or is misaligned.
    StrayListNode { node: usize },
    /// A free list node's previous link doesn't point back to its predecessor.
    BackLink { node: usize },
    /// The free list holds more nodes than the segment can hold blocks.
    ListCycle,
    /// The free list length disagrees with the number of free blocks.
    ListLength { listed: usize, free: usize },
}

impl fmt::Display for HeapCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Coverage { end, expected } => write!(
                f,
                "blocks end at 0x{:x} instead of the segment end 0x{:x}",
                end, expected
            ),
            Self::PayloadSize { block, size } => {
                write!(f, "block 0x{:x} has an invalid payload size {}", block, size)
            }
            Self::BoundaryTag { block } => {
                write!(f, "block 0x{:x} has a wrong predecessor tag", block)
            }
            Self::FreeBlockListed { block, count } => write!(
                f,
                "free block 0x{:x} is in the free list {} times",
                block, count
            ),
            Self::UsedBlockListed { block } => {
                write!(f, "allocated block 0x{:x} is in the free list", block)
            }
            Self::AdjacentFreeBlocks { block } => {
                write!(f, "free block 0x{:x} follows another free block", block)
            }
            Self::StrayListNode { node } => {
                write!(f, "free list node 0x{:x} is not a block of the segment", node)
            }
            Self::BackLink { node } => {
                write!(f, "free list node 0x{:x} has a broken previous link", node)
            }
            Self::ListCycle => write!(f, "the free list contains a cycle"),
            Self::ListLength { listed, free } => write!(
                f,
                "the free list has {} nodes but there are {} free blocks",
                listed, free
            ),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
impl std::error::Error for HeapCorruption {}

impl<'pool> Heap<'pool> {
    /// Iterate over all blocks in physical order.
    #[inline]
    pub fn blocks(&self) -> Blocks<'_, 'pool> {
        Blocks {
            heap: self,
            cursor: Some(self.start),
        }
    }

    /// Iterate over all free blocks in free list order.
    #[inline]
    pub fn free_blocks(&self) -> FreeBlocks<'_, 'pool> {
        FreeBlocks {
            _heap: self,
            cursor: self.free_list.head(),
        }
    }

    /// Count blocks and payload bytes.
    pub fn stats(&self) -> HeapStats {
        self.blocks()
            .fold(HeapStats::default(), |mut stats, block| {
                if block.allocated {
                    stats.used_blocks += 1;
                    stats.used_bytes += block.payload_size;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.payload_size;
                }
                stats
            })
    }

    /// The size of the segment in bytes, after alignment.
    #[inline]
    pub fn segment_size(&self) -> usize {
        self.end as usize - self.start.as_ptr() as usize
    }

    /// Check the heap for consistency.
    ///
    /// This walks the segment in physical order and the free list in list
    /// order, and takes quadratic time in the number of blocks. It's meant for
    /// testing and debugging and isn't used by any allocation operation.
    pub fn validate(&self) -> Result<(), HeapCorruption> {
        let start = self.start.as_ptr() as usize;
        let end = self.end as usize;
        let segment_size = end - start;
        let max_blocks = segment_size / MIN_BLOCK_SIZE;

        // Walk the free list first so that the physical walk below can
        // search it safely
        let mut listed = 0;
        let mut expected_prev_free = None;
        let mut cursor = self.free_list.head();
        while let Some(node) = cursor {
            let addr = node.as_ptr() as usize;
            if addr < start || addr + MIN_BLOCK_SIZE > end || addr % ALIGNMENT != 0 {
                return Err(HeapCorruption::StrayListNode { node: addr });
            }

            listed += 1;
            if listed > max_blocks {
                return Err(HeapCorruption::ListCycle);
            }

            // Safety: `node` lies within the segment
            let node_hdr = unsafe { node.as_ref() };
            if node_hdr.prev_free != expected_prev_free {
                return Err(HeapCorruption::BackLink { node: addr });
            }
            expected_prev_free = Some(node);
            cursor = node_hdr.next_free;
        }

        let mut num_free = 0;
        let mut prev_phys_block: Option<NonNull<BlockHdr>> = None;
        let mut cursor = self.start;
        loop {
            let addr = cursor.as_ptr() as usize;
            if addr == end {
                break;
            } else if end - addr < HEADER_SIZE {
                return Err(HeapCorruption::Coverage { end: addr, expected: end });
            }

            // Safety: The header lies within the segment
            let hdr = unsafe { cursor.as_ref() };
            let size = hdr.payload_size();
            if (hdr.size & (ALIGNMENT - 1) & !SIZE_USED) != 0
                || size < MIN_PAYLOAD_SIZE
                || size > segment_size
            {
                return Err(HeapCorruption::PayloadSize {
                    block: addr,
                    size: hdr.size & !SIZE_USED,
                });
            }

            if hdr.prev_phys_block != prev_phys_block {
                return Err(HeapCorruption::BoundaryTag { block: addr });
            }

            let count = self
                .free_blocks()
                .filter(|block| block.payload.as_ptr() as usize - HEADER_SIZE == addr)
                .count();
            if hdr.is_used() {
                if count != 0 {
                    return Err(HeapCorruption::UsedBlockListed { block: addr });
                }
            } else {
                if count != 1 {
                    return Err(HeapCorruption::FreeBlockListed { block: addr, count });
                }
                // Safety: `prev_phys_block` was checked in the previous
                //         iteration
                if let Some(prev_phys_block) = prev_phys_block {
                    if unsafe { !prev_phys_block.as_ref().is_used() } {
                        return Err(HeapCorruption::AdjacentFreeBlocks { block: addr });
                    }
                }
                num_free += 1;
            }

            if end - addr < HEADER_SIZE + size {
                return Err(HeapCorruption::Coverage {
                    end: addr + HEADER_SIZE + size,
                    expected: end,
                });
            }

            prev_phys_block = Some(cursor);
            // Safety: The block ends within the segment
            cursor = unsafe { NonNull::new_unchecked(phys_end_of(cursor)).cast() };
        }

        if listed != num_free {
            return Err(HeapCorruption::ListLength {
                listed,
                free: num_free,
            });
        }

        Ok(())
    }

    /// Log the heap's blocks and/or free list at the `debug` level.
    pub fn dump(&self, mode: DumpMode) {
        if matches!(mode, DumpMode::Blocks | DumpMode::Both) {
            log::debug!(
                "heap {:p}..{:p}: block by block",
                self.start,
                self.end
            );
            for block in self.blocks() {
                log::debug!(
                    "  block {:p}: payload {} bytes, {}",
                    block.payload,
                    block.payload_size,
                    if block.allocated { "allocated" } else { "free" }
                );
            }
        }

        if matches!(mode, DumpMode::FreeList | DumpMode::Both) {
            log::debug!("heap {:p}..{:p}: free list", self.start, self.end);
            let mut cursor = self.free_list.head();
            while let Some(node) = cursor {
                // Safety: `node` is a free list node of `self`
                let node_hdr = unsafe { node.as_ref() };
                log::debug!(
                    "  free {:p}: payload {} bytes, prev {:?}, next {:?}",
                    node,
                    node_hdr.common.payload_size(),
                    node_hdr.prev_free,
                    node_hdr.next_free
                );
                cursor = node_hdr.next_free;
            }
        }
    }
}
