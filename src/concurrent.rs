//! The thread-safe rendition of the linear arena. Same bump-and-rewind
//! algorithm as [`crate::linear`], with the cursor held in an atomic and
//! every mutation going through a compare-and-swap loop. There are no
//! locks and no blocking: a thread that loses a race re-reads the cursor
//! and either retries or discovers that its fast path no longer applies
//! (its block stopped being the last allocation), in which case
//! deallocation degrades to the usual silent no-op and growth to
//! allocate-copy-free.
//!
//! The buffer is always materialized eagerly; a lazy init would race.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    allocator::{Allocator, DeallocateAll, Owns, Relocatable},
    block::{round_to_alignment, Block},
    buffer::{BufferProvider, HeapBuffer, StackBuffer, StaticSize},
    mallocator::Mallocator,
    realloc::copy_block,
};

pub struct ConcurrentLinearAllocator<P: BufferProvider, const ALIGN: usize = 8> {
    provider: P,
    cursor: AtomicUsize,
}

/// Concurrent arena over inline storage.
pub type ConcurrentStackLinearAllocator<const SIZE: usize, const ALIGN: usize = 8> =
    ConcurrentLinearAllocator<StackBuffer<SIZE, ALIGN>, ALIGN>;

/// Concurrent arena over a buffer obtained from allocator `A`.
pub type ConcurrentHeapLinearAllocator<A = Mallocator, const SIZE: usize = 0, const ALIGN: usize = 8> =
    ConcurrentLinearAllocator<HeapBuffer<A, StaticSize<SIZE>>, ALIGN>;

// The only shared state is the atomic cursor; the buffer bytes handed out
// are owned by exactly one caller at a time, same as for any allocator.
unsafe impl<P: BufferProvider, const ALIGN: usize> Sync for ConcurrentLinearAllocator<P, ALIGN> {}

impl<P: BufferProvider, const ALIGN: usize> ConcurrentLinearAllocator<P, ALIGN> {
    const VALID: () = assert!(ALIGN.is_power_of_two(), "alignment must be a power of two");

    pub fn new() -> Self
    where
        P: Default,
    {
        Self::with_provider(P::default())
    }

    pub fn with_provider(mut provider: P) -> Self {
        let () = Self::VALID;
        provider.init();
        Self {
            provider,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Returns a block of at least `size` bytes, or the null block when
    /// the arena is exhausted. An `allocate` that returns `(p, n)` has
    /// atomically published `cursor = p + n`.
    pub fn allocate(&self, size: usize) -> Block {
        let aligned = round_to_alignment(size, ALIGN);
        let Some(base) = self.provider.base() else {
            return Block::null();
        };

        let mut offset = self.cursor.load(Ordering::Acquire);
        while aligned <= self.provider.size() - offset {
            match self.cursor.compare_exchange(
                offset,
                offset + aligned,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
                    return Block::new(Some(ptr), aligned);
                }
                Err(current) => offset = current,
            }
        }

        // Out of memory.
        Block::null()
    }

    /// Rewinds the cursor if `block` is still the last allocation when the
    /// swap lands; otherwise the range is leaked, exactly like the
    /// single-threaded arena.
    pub fn deallocate(&self, block: &mut Block) {
        if let Some(start) = block.ptr.and_then(|ptr| self.block_offset(ptr)) {
            let mut offset = self.cursor.load(Ordering::Acquire);
            while start + block.size == offset {
                match self
                    .cursor
                    .compare_exchange(offset, start, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => break,
                    // Someone else allocated in the meantime; re-check
                    // whether we are still the last block.
                    Err(current) => offset = current,
                }
            }
        }
        *block = Block::null();
    }

    /// Same contract as [`Allocator::reallocate`], callable through a
    /// shared reference.
    pub fn reallocate(&self, block: &mut Block, new_size: usize) -> bool {
        // The shared fast paths, spelled out here because they must
        // dispatch through `&self`.
        if block.size == round_to_alignment(new_size, ALIGN) {
            return true;
        }
        if new_size == 0 {
            self.deallocate(block);
            return true;
        }
        let Some(ptr) = block.ptr else {
            *block = self.allocate(new_size);
            return true;
        };

        let aligned_new = round_to_alignment(new_size, ALIGN);

        if let Some(start) = self.block_offset(ptr) {
            let mut offset = self.cursor.load(Ordering::Acquire);
            while start + block.size == offset {
                if aligned_new > self.provider.size() - start {
                    // Out of memory.
                    return false;
                }
                match self.cursor.compare_exchange(
                    offset,
                    start + aligned_new,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        block.size = aligned_new;
                        return true;
                    }
                    Err(current) => offset = current,
                }
            }
        }

        if block.size >= aligned_new {
            // Shrink of a non-last block; the recorded size is kept so the
            // full extent is recognized if the block becomes the tail.
            return true;
        }

        let new_block = self.allocate(new_size);
        if new_block.is_null() {
            return false;
        }
        copy_block(&new_block, block);
        self.deallocate(block);
        *block = new_block;
        true
    }

    pub fn owns(&self, block: &Block) -> bool {
        match block.ptr.and_then(|ptr| self.block_offset(ptr)) {
            Some(offset) => offset < self.provider.size(),
            None => false,
        }
    }

    /// Invalidates every outstanding block. Callers must have stopped
    /// using them; this is a plain store, not a negotiation.
    pub fn deallocate_all(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    fn block_offset(&self, ptr: NonNull<u8>) -> Option<usize> {
        let base = self.provider.base()?;
        let offset = (ptr.as_ptr() as usize).checked_sub(base.as_ptr() as usize)?;
        (offset <= self.provider.size()).then_some(offset)
    }
}

impl<P: BufferProvider, const ALIGN: usize> Allocator for ConcurrentLinearAllocator<P, ALIGN> {
    const ALIGNMENT: usize = ALIGN;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = true;

    fn allocate(&mut self, size: usize) -> Block {
        // Inherent methods take precedence, so these calls resolve to the
        // shared-reference implementations above.
        ConcurrentLinearAllocator::allocate(self, size)
    }

    fn deallocate(&mut self, block: &mut Block) {
        ConcurrentLinearAllocator::deallocate(self, block)
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        ConcurrentLinearAllocator::reallocate(self, block, new_size)
    }
}

impl<P: BufferProvider, const ALIGN: usize> Owns for ConcurrentLinearAllocator<P, ALIGN> {
    fn owns(&self, block: &Block) -> bool {
        ConcurrentLinearAllocator::owns(self, block)
    }
}

impl<P: BufferProvider, const ALIGN: usize> DeallocateAll for ConcurrentLinearAllocator<P, ALIGN> {
    fn deallocate_all(&mut self) {
        ConcurrentLinearAllocator::deallocate_all(self)
    }
}

impl<P: BufferProvider + Default, const ALIGN: usize> Default
    for ConcurrentLinearAllocator<P, ALIGN>
{
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<P, const ALIGN: usize> Relocatable for ConcurrentLinearAllocator<P, ALIGN> where
    P: BufferProvider + Relocatable
{
}
