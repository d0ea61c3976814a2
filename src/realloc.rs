//! Shared reallocation plumbing. Every allocator funnels `reallocate`
//! through [`handle_common_reallocation_cases`] before any type-specific
//! logic, and falls back to one of the allocate-copy-free helpers when in
//! place resizing is impossible.

use std::{cmp, ptr};

use crate::{allocator::Allocator, block::round_to_alignment, Block};

/// The fast paths common to every `reallocate` implementation, applied in
/// this order:
///
/// 1. The block already spans exactly the aligned new size: success, no
///    work to do.
/// 2. `new_size` is zero: equivalent to deallocating the block.
/// 3. The block is null: equivalent to allocating a fresh one. This path
///    reports success even when that allocation fails; the caller observes
///    the outcome through the block itself.
///
/// Returns `true` when one of the cases applied and the operation is
/// complete, `false` when the caller still has work to do.
pub(crate) fn handle_common_reallocation_cases<A: Allocator>(
    allocator: &mut A,
    block: &mut Block,
    new_size: usize,
) -> bool {
    if block.size == round_to_alignment(new_size, A::ALIGNMENT) {
        return true;
    }

    if new_size == 0 {
        allocator.deallocate(block);
        return true;
    }

    if block.is_null() {
        *block = allocator.allocate(new_size);
        return true;
    }

    false
}

/// Copies `min(dst.size, src.size)` bytes between two non-overlapping
/// blocks. Null blocks are ignored.
pub(crate) fn copy_block(dst: &Block, src: &Block) {
    let (Some(to), Some(from)) = (dst.ptr, src.ptr) else {
        return;
    };

    unsafe {
        ptr::copy_nonoverlapping(from.as_ptr(), to.as_ptr(), cmp::min(dst.size, src.size));
    }
}

/// Moves the contents of `block` into a fresh block obtained from `to`,
/// then releases the old block through `from`. On failure nothing changes
/// and nothing leaks.
pub(crate) fn reallocate_and_copy<F, T>(
    from: &mut F,
    to: &mut T,
    block: &mut Block,
    new_size: usize,
) -> bool
where
    F: Allocator,
    T: Allocator,
{
    let new_block = to.allocate(new_size);
    if new_block.is_null() {
        return false;
    }

    copy_block(&new_block, block);
    from.deallocate(block);
    *block = new_block;
    true
}

/// [`reallocate_and_copy`] with a single allocator on both ends, for the
/// common case where the move does not cross a compositor boundary.
pub(crate) fn reallocate_and_copy_within<A: Allocator>(
    allocator: &mut A,
    block: &mut Block,
    new_size: usize,
) -> bool {
    let new_block = allocator.allocate(new_size);
    if new_block.is_null() {
        return false;
    }

    copy_block(&new_block, block);
    allocator.deallocate(block);
    *block = new_block;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mallocator::Mallocator;

    #[test]
    fn same_aligned_size_is_a_noop() {
        let mut mallocator = Mallocator;
        let mut block = mallocator.allocate(100);
        let before = block;

        // 100 rounds to 104, so any new size in (96, 104] is already
        // covered by the block.
        assert!(handle_common_reallocation_cases(&mut mallocator, &mut block, 104));
        assert!(handle_common_reallocation_cases(&mut mallocator, &mut block, 97));
        assert_eq!(block, before);

        mallocator.deallocate(&mut block);
    }

    #[test]
    fn zero_size_deallocates() {
        let mut mallocator = Mallocator;
        let mut block = mallocator.allocate(64);
        assert!(!block.is_null());

        assert!(handle_common_reallocation_cases(&mut mallocator, &mut block, 0));
        assert!(block.is_null());
    }

    #[test]
    fn null_block_allocates() {
        let mut mallocator = Mallocator;
        let mut block = Block::null();

        assert!(handle_common_reallocation_cases(&mut mallocator, &mut block, 32));
        assert!(!block.is_null());
        assert_eq!(block.size, 32);

        mallocator.deallocate(&mut block);
    }

    #[test]
    fn copy_preserves_contents() {
        let mut mallocator = Mallocator;
        let mut block = mallocator.allocate(32);
        unsafe {
            ptr::write_bytes(block.as_ptr(), 42, block.size);
        }

        assert!(reallocate_and_copy_within(&mut mallocator, &mut block, 256));
        assert!(block.size >= 256);
        for offset in 0..32 {
            assert_eq!(unsafe { *block.as_ptr().add(offset) }, 42);
        }

        mallocator.deallocate(&mut block);
    }
}
