//! Debug compositor that writes a recognizable byte pattern over every
//! block as it is handed out and again as it is given back. Reads of
//! `0xAA...` point at uninitialized memory, reads of `0xFF...` at a use
//! after free.

use std::ptr;

use crate::{
    allocator::{Allocator, DeallocateAll, Owns, Relocatable},
    block::Block,
};

pub struct Stamp<A, const ALLOCATION_PATTERN: u8 = 0xAA, const DEALLOCATION_PATTERN: u8 = 0xFF> {
    allocator: A,
}

impl<A, const ALLOCATION_PATTERN: u8, const DEALLOCATION_PATTERN: u8>
    Stamp<A, ALLOCATION_PATTERN, DEALLOCATION_PATTERN>
{
    pub fn new() -> Self
    where
        A: Default,
    {
        Self::with_allocator(A::default())
    }

    pub fn with_allocator(allocator: A) -> Self {
        Self { allocator }
    }
}

impl<A, const ALLOCATION_PATTERN: u8, const DEALLOCATION_PATTERN: u8> Allocator
    for Stamp<A, ALLOCATION_PATTERN, DEALLOCATION_PATTERN>
where
    A: Allocator,
{
    const ALIGNMENT: usize = A::ALIGNMENT;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&mut self, size: usize) -> Block {
        let block = self.allocator.allocate(size);
        if let Some(ptr) = block.ptr {
            unsafe {
                ptr::write_bytes(ptr.as_ptr(), ALLOCATION_PATTERN, block.size);
            }
        }
        block
    }

    fn deallocate(&mut self, block: &mut Block) {
        // Stamp before forwarding, while the bytes are still ours.
        if let Some(ptr) = block.ptr {
            unsafe {
                ptr::write_bytes(ptr.as_ptr(), DEALLOCATION_PATTERN, block.size);
            }
        }
        self.allocator.deallocate(block);
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        self.allocator.reallocate(block, new_size)
    }
}

impl<A, const ALLOCATION_PATTERN: u8, const DEALLOCATION_PATTERN: u8> Owns
    for Stamp<A, ALLOCATION_PATTERN, DEALLOCATION_PATTERN>
where
    A: Owns,
{
    fn owns(&self, block: &Block) -> bool {
        self.allocator.owns(block)
    }
}

impl<A, const ALLOCATION_PATTERN: u8, const DEALLOCATION_PATTERN: u8> DeallocateAll
    for Stamp<A, ALLOCATION_PATTERN, DEALLOCATION_PATTERN>
where
    A: DeallocateAll,
{
    fn deallocate_all(&mut self) {
        self.allocator.deallocate_all();
    }
}

impl<A, const ALLOCATION_PATTERN: u8, const DEALLOCATION_PATTERN: u8> Default
    for Stamp<A, ALLOCATION_PATTERN, DEALLOCATION_PATTERN>
where
    A: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<A, const ALLOCATION_PATTERN: u8, const DEALLOCATION_PATTERN: u8> Relocatable
    for Stamp<A, ALLOCATION_PATTERN, DEALLOCATION_PATTERN>
where
    A: Relocatable,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::StackLinearAllocator;

    #[test]
    fn stamps_on_allocate_and_deallocate() {
        let mut stamp = Stamp::<StackLinearAllocator<128>>::new();

        let mut block = stamp.allocate(16);
        let ptr = block.as_ptr();
        unsafe {
            for offset in 0..16 {
                assert_eq!(*ptr.add(offset), 0xAA);
            }
        }

        stamp.deallocate(&mut block);
        // The arena rewound its cursor but the bytes are still in its
        // buffer, freshly painted with the deallocation pattern.
        unsafe {
            for offset in 0..16 {
                assert_eq!(*ptr.add(offset), 0xFF);
            }
        }
    }

    #[test]
    fn custom_patterns() {
        let mut stamp = Stamp::<StackLinearAllocator<128>, 0x11, 0x22>::new();

        let mut block = stamp.allocate(8);
        let ptr = block.as_ptr();
        unsafe {
            assert_eq!(*ptr, 0x11);
        }
        stamp.deallocate(&mut block);
        unsafe {
            assert_eq!(*ptr, 0x22);
        }
    }
}
