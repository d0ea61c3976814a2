//! A recycling compositor. Requests whose aligned size falls inside the
//! configured range are served with blocks of the range *maximum*, and
//! deallocated blocks of exactly that size are kept on a singly linked
//! list instead of going back to the inner allocator.
//!
//! The list node lives *inside* the freed memory, overlapping the bytes
//! the caller used to own:
//!
//! ```text
//!  head --+
//!         |
//!         v
//! +----------------+      +----------------+      +----------------+
//! | next ----------|----> | next ----------|----> | next: None     |
//! +- - - - - - - - +      +- - - - - - - - +      +- - - - - - - - +
//! | rest of the    |      | rest of the    |      | rest of the    |
//! | freed block    |      | freed block    |      | freed block    |
//! +----------------+      +----------------+      +----------------+
//! ```
//!
//! The memory is either user data or a list node, never both: the node is
//! written when the block is pushed and becomes dead the moment the block
//! is popped and handed back out. This is why the range maximum must be at
//! least pointer sized, and why the inner allocator's alignment (at least
//! pointer alignment everywhere in this crate) is enough to store the
//! node.

use std::{mem, ptr::NonNull};

use crate::{
    allocator::{Allocator, Owns, Relocatable},
    block::{round_to_alignment, Block},
    range::{DynamicRange, RangedAllocator, SizeRange},
    realloc::{handle_common_reallocation_cases, reallocate_and_copy_within},
    Pointer,
};

/// A node of the in-place list. A single pointer, nothing else.
struct FreeNode {
    next: Pointer<FreeNode>,
}

/// The freelist over inner allocator `A` and range `R`. Holds at most
/// `MAX_NODES` recycled blocks; when the list is empty it is repopulated
/// with up to `BATCH` blocks at once.
pub struct Freelist<A, R, const MAX_NODES: usize, const BATCH: usize>
where
    A: Allocator,
    R: SizeRange,
{
    allocator: A,
    range: R,
    head: Pointer<FreeNode>,
    count: usize,
}

impl<A, R, const MAX_NODES: usize, const BATCH: usize> Freelist<A, R, MAX_NODES, BATCH>
where
    A: Allocator,
    R: SizeRange,
{
    const VALID: () = {
        assert!(MAX_NODES > 0, "pointless freelist");
        assert!(BATCH <= MAX_NODES, "cannot batch more blocks than the list can hold");
    };

    pub fn new() -> Self
    where
        A: Default,
        R: Default,
    {
        Self::with_parts(A::default(), R::default())
    }

    pub fn with_parts(allocator: A, range: R) -> Self {
        let () = Self::VALID;
        if range.min() <= range.max() {
            assert!(
                range.max() >= mem::size_of::<FreeNode>(),
                "range maximum must hold a free list node"
            );
        }
        Self {
            allocator,
            range,
            head: None,
            count: 0,
        }
    }

    /// Recycled blocks currently on the list.
    pub fn cached(&self) -> usize {
        self.count
    }

    fn is_full(&self) -> bool {
        self.count == MAX_NODES
    }

    fn push_node(&mut self, ptr: NonNull<u8>) {
        let node = ptr.cast::<FreeNode>();
        unsafe {
            node.as_ptr().write(FreeNode { next: self.head });
        }
        self.head = Some(node);
        self.count += 1;
    }

    fn pop_node(&mut self) -> Pointer<u8> {
        let node = self.head?;
        // Read the link before the node memory is handed back out.
        self.head = unsafe { (*node.as_ptr()).next };
        self.count -= 1;
        Some(node.cast())
    }

    /// Refills an empty list with up to `BATCH` blocks of the range
    /// maximum. When the inner allocator can free sub-ranges, one chunk of
    /// `BATCH * max` bytes is carved into adjacent blocks; each of them
    /// can later be returned to the inner allocator on its own. Otherwise
    /// the blocks are allocated one by one, stopping at the first failure.
    fn populate(&mut self) {
        let block_size = self.range.max();
        let num_blocks = BATCH.min(MAX_NODES - self.count);

        if A::SUPPORTS_TRUNCATED_DEALLOCATION {
            let chunk = self.allocator.allocate(num_blocks * block_size);
            if let Some(base) = chunk.ptr {
                for index in 0..num_blocks {
                    let ptr =
                        unsafe { NonNull::new_unchecked(base.as_ptr().add(index * block_size)) };
                    self.push_node(ptr);
                }
                return;
            }
            // Batch failed, fall through to one-by-one.
        }

        for _ in 0..num_blocks {
            match self.allocator.allocate(block_size).ptr {
                Some(ptr) => self.push_node(ptr),
                None => break,
            }
        }
    }
}

impl<A, R, const MAX_NODES: usize, const BATCH: usize> Allocator
    for Freelist<A, R, MAX_NODES, BATCH>
where
    A: Allocator,
    R: SizeRange,
{
    const ALIGNMENT: usize = A::ALIGNMENT;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&mut self, size: usize) -> Block {
        let aligned = round_to_alignment(size, A::ALIGNMENT);

        if self.range.contains(aligned) {
            if self.head.is_none() {
                self.populate();
            }
            if let Some(ptr) = self.pop_node() {
                return Block::new(Some(ptr), self.range.max());
            }
            // Could not populate; the inner allocator gets to refuse too.
        }

        self.allocator.allocate(aligned)
    }

    fn deallocate(&mut self, block: &mut Block) {
        if !self.is_full() && block.size == self.range.max() {
            if let Some(ptr) = block.ptr.take() {
                self.push_node(ptr);
                block.size = 0;
                return;
            }
        }

        self.allocator.deallocate(block);
    }

    /// In-range resizes succeed without touching the block: a recycled
    /// block already spans the range maximum. Note that this also reports
    /// success for a block that was *forwarded* to the inner allocator
    /// because its size was below the range minimum; such a block does not
    /// actually grow.
    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        let aligned_new = round_to_alignment(new_size, A::ALIGNMENT);
        if self.range.contains(aligned_new) {
            return true;
        }

        reallocate_and_copy_within(self, block, new_size)
    }
}

impl<A, R, const MAX_NODES: usize, const BATCH: usize> Drop for Freelist<A, R, MAX_NODES, BATCH>
where
    A: Allocator,
    R: SizeRange,
{
    fn drop(&mut self) {
        // Drain the list back into the inner allocator.
        while let Some(ptr) = self.pop_node() {
            let mut block = Block::new(Some(ptr), self.range.max());
            self.allocator.deallocate(&mut block);
        }
    }
}

impl<A, const MAX_NODES: usize, const BATCH: usize> RangedAllocator
    for Freelist<A, DynamicRange, MAX_NODES, BATCH>
where
    A: Allocator,
{
    fn set_limits(&mut self, min: usize, max: usize) {
        assert!(
            max >= mem::size_of::<FreeNode>(),
            "range maximum must hold a free list node"
        );
        self.range.set(min, max);
    }
}

impl<A, R, const MAX_NODES: usize, const BATCH: usize> Owns for Freelist<A, R, MAX_NODES, BATCH>
where
    A: Allocator + Owns,
    R: SizeRange,
{
    fn owns(&self, block: &Block) -> bool {
        // Everything the list hands out came from the inner allocator.
        self.allocator.owns(block)
    }
}

impl<A, R, const MAX_NODES: usize, const BATCH: usize> Default for Freelist<A, R, MAX_NODES, BATCH>
where
    A: Allocator + Default,
    R: SizeRange + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

// The list head points into memory owned by the inner allocator, never
// into the freelist value itself.
unsafe impl<A, R, const MAX_NODES: usize, const BATCH: usize> Relocatable
    for Freelist<A, R, MAX_NODES, BATCH>
where
    A: Allocator + Relocatable,
    R: SizeRange,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        allocator::DeallocateAll,
        linear::StackLinearAllocator,
        mallocator::Mallocator,
        range::StaticRange,
    };

    #[test]
    fn batch_carving_over_an_arena() {
        // The arena frees sub-ranges, so an empty list is refilled by
        // carving one chunk of BATCH * max bytes.
        let mut list =
            Freelist::<StackLinearAllocator<512>, StaticRange<32, 64>, 8, 4>::new();

        let a = list.allocate(32);
        assert_eq!(a.size, 64);
        assert_eq!(list.cached(), 3);
        // One 256 byte chunk came out of the arena, nothing else.
        assert_eq!(list.allocator.used(), 256);

        // Three more in-range allocations drain the list without touching
        // the arena.
        let blocks: Vec<Block> = (0..3).map(|_| list.allocate(48)).collect();
        assert!(blocks.iter().all(|block| block.size == 64));
        assert_eq!(list.cached(), 0);
        assert_eq!(list.allocator.used(), 256);

        // The next one triggers a second batch.
        let b = list.allocate(48);
        assert!(!b.is_null());
        assert_eq!(list.cached(), 3);
        assert_eq!(list.allocator.used(), 512);
    }

    #[test]
    fn carved_blocks_are_adjacent() {
        let mut list =
            Freelist::<StackLinearAllocator<512>, StaticRange<32, 64>, 8, 4>::new();

        let first = list.allocate(32);
        let second = list.allocate(32);
        // Blocks are pushed in carving order and popped from the head, so
        // consecutive pops walk backwards through the chunk.
        assert_eq!(
            first.as_ptr() as usize - second.as_ptr() as usize,
            64
        );
    }

    #[test]
    fn recycles_exact_size_blocks() {
        let mut list = Freelist::<Mallocator, StaticRange<32, 64>, 8, 4>::new();

        let mut block = list.allocate(48);
        assert_eq!(block.size, 64);
        let recycled_ptr = block.as_ptr();

        list.deallocate(&mut block);
        assert!(block.is_null());
        assert_eq!(list.cached(), 4);

        // The head of the list is the block we just gave back.
        let again = list.allocate(40);
        assert_eq!(again.as_ptr(), recycled_ptr);
        assert_eq!(again.size, 64);
    }

    #[test]
    fn out_of_range_requests_pass_through() {
        let mut list = Freelist::<Mallocator, StaticRange<32, 64>, 8, 4>::new();

        let mut small = list.allocate(8);
        assert_eq!(small.size, 8);
        let mut large = list.allocate(100);
        assert_eq!(large.size, 104);
        assert_eq!(list.cached(), 0);

        // Neither matches the range maximum, so both bypass the list on
        // the way back too.
        list.deallocate(&mut small);
        list.deallocate(&mut large);
        assert_eq!(list.cached(), 0);
    }

    #[test]
    fn a_full_list_releases_for_real() {
        let mut list = Freelist::<Mallocator, StaticRange<32, 64>, 2, 2>::new();

        let mut blocks: Vec<Block> = (0..3).map(|_| list.allocate(64)).collect();
        for block in blocks.iter_mut() {
            list.deallocate(block);
        }
        // Only two fit on the list; the third went back to the heap.
        assert_eq!(list.cached(), 2);
    }

    #[test]
    fn in_range_reallocate_leaves_the_block_alone() {
        let mut list = Freelist::<Mallocator, StaticRange<32, 64>, 8, 4>::new();

        let mut block = list.allocate(48);
        let before = block;

        assert!(list.reallocate(&mut block, 56));
        assert_eq!(block, before);

        // Growing out of range moves the contents to a fresh inner block.
        unsafe {
            std::ptr::write_bytes(block.as_ptr(), 69, block.size);
        }
        assert!(list.reallocate(&mut block, 256));
        assert_eq!(block.size, 256);
        unsafe {
            assert_eq!(*block.as_ptr(), 69);
            assert_eq!(*block.as_ptr().add(63), 69);
        }

        list.deallocate(&mut block);
    }

    #[test]
    fn drop_returns_cached_blocks_to_the_inner_allocator() {
        let mut arena = StackLinearAllocator::<512>::new();

        {
            type BorrowedList<'a> =
                Freelist<&'a mut StackLinearAllocator<512>, StaticRange<32, 64>, 8, 4>;
            let mut list = BorrowedList::with_parts(&mut arena, StaticRange::new());
            let _ = list.allocate(32);
            assert_eq!(list.cached(), 3);
        }

        // The drained nodes were deallocated in LIFO carving order, which
        // the arena can only partially rewind; what matters is that every
        // node went back through `deallocate` without faulting and the
        // arena can be reset afterwards.
        arena.deallocate_all();
        assert_eq!(arena.used(), 0);
    }
}
