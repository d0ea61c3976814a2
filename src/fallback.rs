//! Try the primary allocator first and escalate to the secondary when it
//! refuses. The primary must be able to answer ownership so that
//! deallocation and reallocation can route blocks back to whichever side
//! produced them.

use crate::{
    allocator::{Allocator, DeallocateAll, Owns, Relocatable},
    block::{max_usize, Block},
    realloc::{handle_common_reallocation_cases, reallocate_and_copy},
};

pub struct FallbackAllocator<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackAllocator<P, S> {
    pub fn new() -> Self
    where
        P: Default,
        S: Default,
    {
        Self::with_parts(P::default(), S::default())
    }

    pub fn with_parts(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn secondary(&self) -> &S {
        &self.secondary
    }
}

impl<P, S> Allocator for FallbackAllocator<P, S>
where
    P: Allocator + Owns,
    S: Allocator,
{
    const ALIGNMENT: usize = max_usize(P::ALIGNMENT, S::ALIGNMENT);

    fn allocate(&mut self, size: usize) -> Block {
        let block = self.primary.allocate(size);
        if block.is_null() {
            return self.secondary.allocate(size);
        }
        block
    }

    fn deallocate(&mut self, block: &mut Block) {
        if self.primary.owns(block) {
            self.primary.deallocate(block)
        } else {
            self.secondary.deallocate(block)
        }
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        if self.primary.owns(block) {
            if self.primary.reallocate(block, new_size) {
                return true;
            }
            // The primary is out of room; migrate the block up the chain.
            return reallocate_and_copy(&mut self.primary, &mut self.secondary, block, new_size);
        }

        self.secondary.reallocate(block, new_size)
    }
}

impl<P, S> Owns for FallbackAllocator<P, S>
where
    P: Owns,
    S: Owns,
{
    fn owns(&self, block: &Block) -> bool {
        self.primary.owns(block) || self.secondary.owns(block)
    }
}

impl<P, S> DeallocateAll for FallbackAllocator<P, S>
where
    P: DeallocateAll,
    S: DeallocateAll,
{
    fn deallocate_all(&mut self) {
        self.primary.deallocate_all();
        self.secondary.deallocate_all();
    }
}

impl<P: Default, S: Default> Default for FallbackAllocator<P, S> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<P, S> Relocatable for FallbackAllocator<P, S>
where
    P: Relocatable,
    S: Relocatable,
{
}
