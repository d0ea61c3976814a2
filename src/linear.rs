//! A linear (bump) arena over a [`BufferProvider`]. A cursor marks the
//! first unused byte and only ever moves forward on allocation; the single
//! concession to reuse is that the *last* allocated block can be given
//! back, which rewinds the cursor:
//!
//! ```text
//!          ______________________________________________________
//! Buffer: |                                                      |
//!         |______________________________________________________|
//!         ^
//!       cursor
//!
//! allocate(X), allocate(Y):
//!          ______________________________________________________
//! Buffer: |XXXXXXXXXXXXXXX|YYYYYY|                               |
//!         |_______________|______|_______________________________|
//!                                ^
//!                              cursor
//!
//! deallocate(Y): it is the last allocation, rewind the cursor.
//!          ______________________________________________________
//! Buffer: |XXXXXXXXXXXXXXX|                                      |
//!         |_______________|______________________________________|
//!                         ^
//!                       cursor
//! ```
//!
//! Deallocating X at that point does nothing: the range is leaked until
//! [`DeallocateAll`] or drop. That makes the arena a great fit for
//! phase-oriented workloads where everything dies together, and a
//! serviceable inner allocator for the freelist, which turns the leak into
//! recycling.

use std::ptr::NonNull;

use crate::{
    allocator::{Allocator, DeallocateAll, Owns, Relocatable},
    block::{round_to_alignment, Block},
    buffer::{BufferProvider, DynamicSize, HeapBuffer, StackBuffer, StaticSize},
    mallocator::Mallocator,
    realloc::{handle_common_reallocation_cases, reallocate_and_copy_within},
};

/// The arena. The cursor is kept as a byte offset from the buffer base, so
/// no pointer arithmetic happens before the buffer is live; a lazy buffer
/// is only materialized by the first allocation that fits.
pub struct LinearAllocator<P: BufferProvider, const ALIGN: usize = 8> {
    provider: P,
    cursor: usize,
}

/// Arena over inline storage. Self-contained, but must not be moved while
/// blocks are outstanding.
pub type StackLinearAllocator<const SIZE: usize, const ALIGN: usize = 8> =
    LinearAllocator<StackBuffer<SIZE, ALIGN>, ALIGN>;

/// Arena over a buffer obtained from allocator `A`, eagerly at
/// construction or lazily on first use.
pub type HeapLinearAllocator<
    A = Mallocator,
    const SIZE: usize = 0,
    const ALIGN: usize = 8,
    const LAZY: bool = false,
> = LinearAllocator<HeapBuffer<A, StaticSize<SIZE>, LAZY>, ALIGN>;

/// Arena over a heap buffer whose size is chosen at run time.
pub type DynamicLinearAllocator<A = Mallocator, const ALIGN: usize = 8, const LAZY: bool = false> =
    LinearAllocator<HeapBuffer<A, DynamicSize, LAZY>, ALIGN>;

impl<P: BufferProvider, const ALIGN: usize> LinearAllocator<P, ALIGN> {
    const VALID: () = assert!(ALIGN.is_power_of_two(), "alignment must be a power of two");

    pub fn new() -> Self
    where
        P: Default,
    {
        Self::with_provider(P::default())
    }

    pub fn with_provider(provider: P) -> Self {
        let () = Self::VALID;
        Self { provider, cursor: 0 }
    }

    /// Bytes handed out so far, counting leaked ranges.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Offset of `ptr` from the buffer base, or [`None`] when the pointer
    /// does not fall within the buffer (or the buffer is not live).
    fn block_offset(&self, ptr: NonNull<u8>) -> Option<usize> {
        let base = self.provider.base()?;
        let offset = (ptr.as_ptr() as usize).checked_sub(base.as_ptr() as usize)?;
        (offset <= self.provider.size()).then_some(offset)
    }

    /// Only the block ending exactly at the cursor can be taken back.
    fn is_last_allocated(&self, block: &Block) -> bool {
        match block.ptr.and_then(|ptr| self.block_offset(ptr)) {
            Some(offset) => offset + block.size == self.cursor,
            None => false,
        }
    }
}

impl<A: Allocator, const ALIGN: usize, const LAZY: bool>
    LinearAllocator<HeapBuffer<A, DynamicSize, LAZY>, ALIGN>
{
    /// Picks the buffer size of a dynamically sized arena. Only meaningful
    /// before the buffer goes live.
    pub fn set_buffer_size(&mut self, size: usize) {
        self.provider.set_size(size);
    }
}

impl<P: BufferProvider, const ALIGN: usize> Allocator for LinearAllocator<P, ALIGN> {
    const ALIGNMENT: usize = ALIGN;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = true;

    fn allocate(&mut self, size: usize) -> Block {
        let aligned = round_to_alignment(size, ALIGN);
        if aligned > self.provider.size() - self.cursor {
            // Out of memory.
            return Block::null();
        }

        let Some(base) = self.provider.init() else {
            return Block::null();
        };

        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(self.cursor)) };
        self.cursor += aligned;
        Block::new(Some(ptr), aligned)
    }

    fn deallocate(&mut self, block: &mut Block) {
        if self.is_last_allocated(block) {
            // Rewind the cursor. Anything else is silently leaked until
            // `deallocate_all`.
            self.cursor -= block.size;
        }
        *block = Block::null();
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        let aligned_new = round_to_alignment(new_size, ALIGN);

        if self.is_last_allocated(block) {
            // The block ends at the cursor, so both shrinking and growing
            // are just a cursor move.
            if self.cursor - block.size + aligned_new <= self.provider.size() {
                self.cursor = self.cursor - block.size + aligned_new;
                block.size = aligned_new;
                return true;
            }
            // Growing past the end of the buffer; a fresh block would need
            // even more room than the cursor has left.
            return false;
        }

        if block.size >= aligned_new {
            // Shrink of a non-last block. The recorded size is deliberately
            // kept: if later deallocations expose this block as the tail,
            // the full original extent is recognized and recycled.
            return true;
        }

        reallocate_and_copy_within(self, block, new_size)
    }
}

impl<P: BufferProvider, const ALIGN: usize> Owns for LinearAllocator<P, ALIGN> {
    fn owns(&self, block: &Block) -> bool {
        match block.ptr.and_then(|ptr| self.block_offset(ptr)) {
            Some(offset) => offset < self.provider.size(),
            None => false,
        }
    }
}

impl<P: BufferProvider, const ALIGN: usize> DeallocateAll for LinearAllocator<P, ALIGN> {
    fn deallocate_all(&mut self) {
        self.cursor = 0;
    }
}

impl<P: BufferProvider + Default, const ALIGN: usize> Default for LinearAllocator<P, ALIGN> {
    fn default() -> Self {
        Self::new()
    }
}

// Moving the arena moves only the cursor and the provider; whether blocks
// survive is decided by where the provider keeps the bytes.
unsafe impl<P, const ALIGN: usize> Relocatable for LinearAllocator<P, ALIGN> where
    P: BufferProvider + Relocatable
{
}
