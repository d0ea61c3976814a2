//! The system heap leaves. Everything here talks to `libc` directly; these
//! are the allocators of last resort a composition bottoms out in.

use std::ptr::{self, NonNull};

use crate::{
    allocator::{Allocator, Relocatable},
    block::{round_to_alignment, Block, MIN_ALIGNMENT},
    realloc::{handle_common_reallocation_cases, reallocate_and_copy_within},
};

/// `malloc`/`free`/`realloc` behind the block interface. Sizes are rounded
/// up to the alignment before they reach the system so that returned
/// blocks keep the size invariant. Cannot answer ownership queries and
/// cannot free sub-ranges.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mallocator;

impl Allocator for Mallocator {
    const ALIGNMENT: usize = MIN_ALIGNMENT;

    fn allocate(&mut self, size: usize) -> Block {
        if size == 0 {
            return Block::null();
        }

        let aligned = round_to_alignment(size, Self::ALIGNMENT);
        let ptr = unsafe { libc::malloc(aligned) };
        Block::from_raw(ptr.cast::<u8>(), aligned)
    }

    fn deallocate(&mut self, block: &mut Block) {
        if let Some(ptr) = block.ptr {
            unsafe { libc::free(ptr.as_ptr().cast()) };
        }
        *block = Block::null();
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        let Some(old) = block.ptr else {
            return false;
        };

        let aligned = round_to_alignment(new_size, Self::ALIGNMENT);
        let ptr = unsafe { libc::realloc(old.as_ptr().cast(), aligned) };
        match NonNull::new(ptr.cast::<u8>()) {
            Some(ptr) => {
                *block = Block::new(Some(ptr), aligned);
                true
            }
            // The system keeps the old allocation valid on failure, so the
            // block stays as it was.
            None => false,
        }
    }
}

unsafe impl Relocatable for Mallocator {}

/// The system heap with a caller-chosen alignment, via `posix_memalign`.
/// POSIX has no aligned `realloc`, so resizing beyond the fast paths is
/// always allocate, copy, free.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlignedMallocator<const ALIGN: usize>;

impl<const ALIGN: usize> AlignedMallocator<ALIGN> {
    const VALID: () = assert!(
        ALIGN.is_power_of_two() && ALIGN >= MIN_ALIGNMENT,
        "alignment must be a power of two of at least pointer size"
    );

    pub fn new() -> Self {
        let () = Self::VALID;
        Self
    }
}

impl<const ALIGN: usize> Allocator for AlignedMallocator<ALIGN> {
    const ALIGNMENT: usize = ALIGN;

    fn allocate(&mut self, size: usize) -> Block {
        let () = Self::VALID;

        if size == 0 {
            return Block::null();
        }

        let aligned = round_to_alignment(size, ALIGN);
        let mut ptr: *mut libc::c_void = ptr::null_mut();
        if unsafe { libc::posix_memalign(&mut ptr, ALIGN, aligned) } != 0 {
            return Block::null();
        }
        Block::from_raw(ptr.cast::<u8>(), aligned)
    }

    fn deallocate(&mut self, block: &mut Block) {
        if let Some(ptr) = block.ptr {
            unsafe { libc::free(ptr.as_ptr().cast()) };
        }
        *block = Block::null();
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        reallocate_and_copy_within(self, block, new_size)
    }
}

unsafe impl<const ALIGN: usize> Relocatable for AlignedMallocator<ALIGN> {}
