//! Two-way size dispatch: requests up to the threshold go to the small
//! allocator, everything else to the large one. Reallocation handles all
//! four quadrants, moving the contents whenever the new size crosses the
//! threshold.

use crate::{
    allocator::{Allocator, DeallocateAll, Owns, Relocatable},
    block::{max_usize, Block},
    realloc::{handle_common_reallocation_cases, reallocate_and_copy},
};

pub struct Segregator<const THRESHOLD: usize, S, L> {
    small: S,
    large: L,
}

impl<const THRESHOLD: usize, S, L> Segregator<THRESHOLD, S, L> {
    pub fn new() -> Self
    where
        S: Default,
        L: Default,
    {
        Self::with_parts(S::default(), L::default())
    }

    pub fn with_parts(small: S, large: L) -> Self {
        Self { small, large }
    }

    pub fn small(&self) -> &S {
        &self.small
    }

    pub fn large(&self) -> &L {
        &self.large
    }
}

impl<const THRESHOLD: usize, S, L> Allocator for Segregator<THRESHOLD, S, L>
where
    S: Allocator,
    L: Allocator,
{
    const ALIGNMENT: usize = max_usize(S::ALIGNMENT, L::ALIGNMENT);

    fn allocate(&mut self, size: usize) -> Block {
        if size <= THRESHOLD {
            self.small.allocate(size)
        } else {
            self.large.allocate(size)
        }
    }

    fn deallocate(&mut self, block: &mut Block) {
        if block.size <= THRESHOLD {
            self.small.deallocate(block)
        } else {
            self.large.deallocate(block)
        }
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        if block.size <= THRESHOLD {
            if new_size <= THRESHOLD {
                return self.small.reallocate(block, new_size);
            }
            // Growing across the threshold moves the block to the large
            // side.
            return reallocate_and_copy(&mut self.small, &mut self.large, block, new_size);
        }

        if new_size <= THRESHOLD {
            return reallocate_and_copy(&mut self.large, &mut self.small, block, new_size);
        }

        self.large.reallocate(block, new_size)
    }
}

impl<const THRESHOLD: usize, S, L> Owns for Segregator<THRESHOLD, S, L>
where
    S: Owns,
    L: Owns,
{
    fn owns(&self, block: &Block) -> bool {
        if block.size <= THRESHOLD {
            self.small.owns(block)
        } else {
            self.large.owns(block)
        }
    }
}

impl<const THRESHOLD: usize, S, L> DeallocateAll for Segregator<THRESHOLD, S, L>
where
    S: DeallocateAll,
    L: DeallocateAll,
{
    fn deallocate_all(&mut self) {
        self.small.deallocate_all();
        self.large.deallocate_all();
    }
}

impl<const THRESHOLD: usize, S: Default, L: Default> Default for Segregator<THRESHOLD, S, L> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const THRESHOLD: usize, S, L> Relocatable for Segregator<THRESHOLD, S, L>
where
    S: Relocatable,
    L: Relocatable,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{linear::StackLinearAllocator, mallocator::Mallocator};

    type SmallInArena = Segregator<128, StackLinearAllocator<1024>, Mallocator>;

    #[test]
    fn dispatches_by_size() {
        let mut segregator = SmallInArena::new();

        let small = segregator.allocate(100);
        assert!(!small.is_null());
        assert!(segregator.small().owns(&small));

        let mut large = segregator.allocate(1000);
        assert!(!large.is_null());
        assert!(!segregator.small().owns(&large));

        segregator.deallocate(&mut large);
    }

    #[test]
    fn growing_across_the_threshold_moves_out_of_the_arena() {
        let mut segregator = SmallInArena::new();

        let mut block = segregator.allocate(100);
        assert!(segregator.small().owns(&block));
        unsafe {
            std::ptr::write_bytes(block.as_ptr(), 69, block.size);
        }

        assert!(segregator.reallocate(&mut block, 200));
        assert!(block.size >= 200);
        assert!(!segregator.small().owns(&block));
        unsafe {
            for offset in 0..100 {
                assert_eq!(*block.as_ptr().add(offset), 69);
            }
        }

        // And shrinking below the threshold moves it back in.
        assert!(segregator.reallocate(&mut block, 64));
        assert!(segregator.small().owns(&block));

        segregator.deallocate(&mut block);
    }

    #[test]
    fn same_side_reallocations_stay_put() {
        let mut segregator = SmallInArena::new();

        let mut small = segregator.allocate(32);
        assert!(segregator.reallocate(&mut small, 64));
        assert!(segregator.small().owns(&small));

        let mut large = segregator.allocate(512);
        assert!(segregator.reallocate(&mut large, 4096));
        assert!(!segregator.small().owns(&large));

        segregator.deallocate(&mut large);
    }
}
