//! Building blocks for composing custom memory allocators.
//!
//! Instead of one monolithic allocator, this crate ships a handful of
//! primitive leaves (system heap, aligned system heap, no memory at all)
//! and a set of *compositors* that wrap inner allocators and add one
//! behavior each: bucketing by size, recycling through a freelist,
//! falling back to a second allocator, growing a cascade of arenas,
//! attaching headers, stamping debug patterns. Every piece satisfies the
//! same [`Allocator`] contract built around [`Block`], a plain
//! pointer-and-size pair, so pieces nest arbitrarily and the whole
//! composition monomorphizes into a single concrete type.
//!
//! ```
//! use brickalloc::{Allocator, FallbackAllocator, Mallocator, StackLinearAllocator};
//!
//! // A 4 KiB scratch arena with a heap escape hatch.
//! let mut allocator = FallbackAllocator::<StackLinearAllocator<4096>, Mallocator>::new();
//!
//! let mut block = allocator.allocate(256);
//! assert!(!block.is_null());
//! assert!(block.size >= 256);
//! allocator.deallocate(&mut block);
//! ```
//!
//! Failure is a value here, never a panic: exhausted allocators return
//! the null block and refused reallocations return `false`, which is what
//! lets the fallback chain escalate and the cascade grow.

use std::ptr::NonNull;

mod affix;
mod allocator;
mod block;
mod bucketizer;
mod buffer;
mod cascading;
mod concurrent;
mod fallback;
mod freelist;
mod linear;
mod mallocator;
mod null;
mod range;
mod realloc;
mod segregator;
mod stamp;
pub mod units;

/// Non-null pointer to `T`, or no pointer at all. Most of the crate deals
/// in possibly-absent raw pointers and this keeps the `None` case in the
/// compiler's field of view.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use affix::{AffixAllocator, NoAffix};
pub use allocator::{Allocator, DeallocateAll, Owns, Relocatable};
pub use block::{is_aligned, round_to_alignment, Block, MIN_ALIGNMENT};
pub use bucketizer::Bucketizer;
pub use buffer::{
    BufferProvider, DynamicSize, HeapBuffer, SizeSource, StackBuffer, StaticSize,
    MAX_STACK_ALIGNMENT,
};
pub use cascading::CascadingAllocator;
pub use concurrent::{
    ConcurrentHeapLinearAllocator, ConcurrentLinearAllocator, ConcurrentStackLinearAllocator,
};
pub use fallback::FallbackAllocator;
pub use freelist::Freelist;
pub use linear::{
    DynamicLinearAllocator, HeapLinearAllocator, LinearAllocator, StackLinearAllocator,
};
pub use mallocator::{AlignedMallocator, Mallocator};
pub use null::NullAllocator;
pub use range::{
    DynamicRange, LinearRaider, Pow2Raider, Raider, RangedAllocator, SizeRange, StaticRange,
};
pub use segregator::Segregator;
pub use stamp::Stamp;

#[cfg(test)]
mod tests {
    use super::*;

    /// The laws every allocator must obey, checked over a batch of sizes:
    /// returned blocks are big enough, aligned in base and size, owned by
    /// their producer, reallocating to the current size is a no-op and
    /// double deallocation through the nulled block is harmless.
    fn check_allocator_laws<A: Allocator + Owns>(allocator: &mut A, sizes: &[usize]) {
        for &size in sizes {
            let mut block = allocator.allocate(size);

            if !block.is_null() {
                assert!(block.size >= size);
                assert!(is_aligned(block.size, A::ALIGNMENT));
                assert!(is_aligned(block.as_ptr() as usize, A::ALIGNMENT));
                assert!(allocator.owns(&block));

                let before = block;
                let size = block.size;
                assert!(allocator.reallocate(&mut block, size));
                assert_eq!(block, before);
            }

            allocator.deallocate(&mut block);
            assert!(block.is_null());
            allocator.deallocate(&mut block);
        }
    }

    const SIZES: &[usize] = &[1, 7, 8, 24, 60, 100, 256];

    #[test]
    fn laws_hold_for_leaves_and_arenas() {
        check_allocator_laws(&mut NullAllocator, SIZES);
        check_allocator_laws(&mut StackLinearAllocator::<4096>::new(), SIZES);
        check_allocator_laws(
            &mut HeapLinearAllocator::<Mallocator, 4096>::new(),
            SIZES,
        );
        check_allocator_laws(
            &mut ConcurrentStackLinearAllocator::<4096>::new(),
            SIZES,
        );
    }

    #[test]
    fn laws_hold_for_compositors() {
        check_allocator_laws(
            &mut Freelist::<StackLinearAllocator<4096>, StaticRange<16, 64>, 8, 4>::new(),
            SIZES,
        );
        check_allocator_laws(
            &mut FallbackAllocator::<StackLinearAllocator<256>, StackLinearAllocator<4096>>::new(),
            SIZES,
        );
        check_allocator_laws(
            &mut Segregator::<64, StackLinearAllocator<2048>, StackLinearAllocator<2048>>::new(),
            SIZES,
        );
        check_allocator_laws(
            &mut CascadingAllocator::<HeapLinearAllocator<Mallocator, 512>>::new(),
            SIZES,
        );
        check_allocator_laws(
            &mut AffixAllocator::<StackLinearAllocator<4096>, u64>::new(),
            SIZES,
        );
        check_allocator_laws(
            &mut Stamp::<StackLinearAllocator<4096>>::new(),
            SIZES,
        );
        check_allocator_laws(
            &mut Bucketizer::<
                Freelist<StackLinearAllocator<1024>, DynamicRange, 8, 2>,
                LinearRaider<0, 64, 16>,
                4,
            >::new(),
            SIZES,
        );
    }

    #[test]
    fn reallocate_to_zero_equals_deallocate() {
        let mut arena = StackLinearAllocator::<128>::new();

        let mut via_realloc = arena.allocate(32);
        assert!(arena.reallocate(&mut via_realloc, 0));
        assert!(via_realloc.is_null());
        assert_eq!(arena.used(), 0);

        let mut via_dealloc = arena.allocate(32);
        arena.deallocate(&mut via_dealloc);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn a_small_object_allocator_end_to_end() {
        // Power-of-two freelist buckets for everything up to 256 bytes,
        // the heap for the rest: the classic small object allocator.
        let mut allocator = Segregator::<
            256,
            Bucketizer<Freelist<Mallocator, DynamicRange, 16, 4>, Pow2Raider<8, 256>, 5>,
            Mallocator,
        >::new();

        let mut blocks: Vec<Block> = [9, 16, 100, 200, 256, 1000, 4000]
            .iter()
            .map(|&size| allocator.allocate(size))
            .collect();

        for (index, &size) in [9, 16, 100, 200, 256, 1000, 4000].iter().enumerate() {
            assert!(!blocks[index].is_null());
            assert!(blocks[index].size >= size);
            unsafe {
                std::ptr::write_bytes(blocks[index].as_ptr(), index as u8, blocks[index].size);
            }
        }

        for (index, block) in blocks.iter().enumerate() {
            unsafe {
                assert_eq!(*block.as_ptr(), index as u8);
                assert_eq!(*block.as_ptr().add(block.size - 1), index as u8);
            }
        }

        for block in blocks.iter_mut() {
            allocator.deallocate(block);
        }
    }

    #[test]
    fn a_stamped_affixed_arena_end_to_end() {
        // A scratch arena whose blocks carry a size tag and are painted on
        // both ends of their life.
        let mut allocator =
            Stamp::<AffixAllocator<StackLinearAllocator<1024>, u64>>::new();

        let mut block = allocator.allocate(48);
        assert_eq!(block.size, 48);
        unsafe {
            assert_eq!(*block.as_ptr(), 0xAA);
        }

        let ptr = block.as_ptr();
        allocator.deallocate(&mut block);
        unsafe {
            assert_eq!(*ptr, 0xFF);
        }
    }
}
