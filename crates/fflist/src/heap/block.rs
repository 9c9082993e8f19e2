//! Block header and free-block link codecs.
use core::{mem, ptr::NonNull};
use static_assertions::const_assert;

/// The alignment of every payload and of every payload size.
pub const ALIGNMENT: usize = 8;

/// The size of a block header, which precedes every payload.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHdr>();

/// The minimum payload size. A free block stores two free list links in its
/// payload, so no payload can be smaller than this.
pub const MIN_PAYLOAD_SIZE: usize =
    (mem::size_of::<FreeBlockHdr>() - HEADER_SIZE + ALIGNMENT - 1) & !(ALIGNMENT - 1);

/// The minimum footprint of a block, including its header.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + MIN_PAYLOAD_SIZE;

/// The largest request [`Heap::allocate`](super::Heap::allocate) accepts.
pub const MAX_REQUEST_SIZE: usize = 1 << 30;

/// The header of a memory block.
#[repr(C)]
#[derive(Debug)]
pub(super) struct BlockHdr {
    /// The size of the payload, excluding the header.
    ///
    ///  - `bit[0]` ([`SIZE_USED`]) indicates whether the block is a used memory
    ///    block or not.
    ///
    ///  - `bit[ALIGNMENT.log2()..]` ([`SIZE_SIZE_MASK`]) represents the size.
    ///
    pub size: usize,
    /// The block physically preceding this one, `None` for the first block of
    /// the segment.
    pub prev_phys_block: Option<NonNull<BlockHdr>>,
}

/// The bit of [`BlockHdr::size`] indicating whether the block is a used memory
/// block or not.
pub(super) const SIZE_USED: usize = 1;
/// The bits of [`BlockHdr::size`] indicating the payload size.
pub(super) const SIZE_SIZE_MASK: usize = !(ALIGNMENT - 1);

/// The header of a free memory block. The links occupy the first
/// [`MIN_PAYLOAD_SIZE`] bytes of the payload.
#[repr(C)]
#[derive(Debug)]
pub(super) struct FreeBlockHdr {
    pub common: BlockHdr,
    pub prev_free: Option<NonNull<FreeBlockHdr>>,
    pub next_free: Option<NonNull<FreeBlockHdr>>,
}

const_assert!(ALIGNMENT.is_power_of_two());
const_assert!(SIZE_USED < ALIGNMENT);
const_assert!(HEADER_SIZE % ALIGNMENT == 0);
const_assert!(mem::align_of::<FreeBlockHdr>() <= ALIGNMENT);
const_assert!(MIN_PAYLOAD_SIZE >= 2 * mem::size_of::<usize>());
const_assert!(mem::size_of::<FreeBlockHdr>() <= MIN_BLOCK_SIZE);
const_assert!(MAX_REQUEST_SIZE % ALIGNMENT == 0);

impl BlockHdr {
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.size & SIZE_SIZE_MASK
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        (self.size & SIZE_USED) != 0
    }

    /// Replace the payload size, keeping the allocated flag.
    #[inline]
    pub fn set_payload_size(&mut self, payload_size: usize) {
        debug_assert_eq!(payload_size % ALIGNMENT, 0);
        self.size = payload_size | (self.size & SIZE_USED);
    }

    #[inline]
    pub fn set_used(&mut self, used: bool) {
        self.size = (self.size & SIZE_SIZE_MASK) | used as usize;
    }
}

/// Get the payload of the block at `block`.
///
/// # Safety
///
/// `block` must be the start of a block.
#[inline]
pub(super) unsafe fn payload_of(block: NonNull<BlockHdr>) -> NonNull<u8> {
    NonNull::new_unchecked(block.cast::<u8>().as_ptr().add(HEADER_SIZE))
}

/// Get the block whose payload starts at `payload`.
///
/// # Safety
///
/// `payload` must be the payload of a block.
#[inline]
pub(super) unsafe fn block_of(payload: NonNull<u8>) -> NonNull<BlockHdr> {
    NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE)).cast()
}

/// Get the address where the block physically following `block` would start.
///
/// # Safety
///
/// `block`'s header must be initialized and its payload must lie within the
/// same memory region as `block`.
#[inline]
pub(super) unsafe fn phys_end_of(block: NonNull<BlockHdr>) -> *mut u8 {
    block
        .cast::<u8>()
        .as_ptr()
        .add(HEADER_SIZE + block.as_ref().payload_size())
}
