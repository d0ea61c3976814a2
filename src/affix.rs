//! Attaches a fixed header and/or footer to every allocation. The inner
//! allocator sees one enlarged block; the caller sees only the middle:
//!
//! ```text
//! inner block
//! +--------------+---------------------------+--------------+
//! |   prefix     |      caller's bytes       |   suffix     |
//! | (aligned)    |                           | (aligned)    |
//! +--------------+---------------------------+--------------+
//!                ^
//!                |
//!                +-- the block the caller holds starts here
//! ```
//!
//! Typical prefixes are size tags, owner ids or canaries; the accessors
//! return typed pointers into the margins of any block this compositor
//! handed out.

use std::{marker::PhantomData, mem, ptr::NonNull};

use crate::{
    allocator::{Allocator, Owns, Relocatable},
    block::{round_to_alignment, Block},
    realloc::{handle_common_reallocation_cases, reallocate_and_copy_within},
};

/// Zero-sized placeholder for "no affix on this side". Only one side may
/// use it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAffix;

pub struct AffixAllocator<A, Prefix, Suffix = NoAffix> {
    allocator: A,
    _affixes: PhantomData<(Prefix, Suffix)>,
}

impl<A, Prefix, Suffix> AffixAllocator<A, Prefix, Suffix>
where
    A: Allocator,
{
    /// Bytes reserved before the caller's block. The affix size is
    /// rounded up to the inner alignment so the caller's base stays
    /// aligned; a zero-sized prefix type reserves nothing.
    pub const PREFIX_SIZE: usize = round_to_alignment(mem::size_of::<Prefix>(), A::ALIGNMENT);
    /// Bytes reserved after the caller's block.
    pub const SUFFIX_SIZE: usize = round_to_alignment(mem::size_of::<Suffix>(), A::ALIGNMENT);

    const VALID: () = assert!(
        mem::size_of::<Prefix>() > 0 || mem::size_of::<Suffix>() > 0,
        "pointless affix allocator"
    );

    pub fn new() -> Self
    where
        A: Default,
    {
        Self::with_allocator(A::default())
    }

    pub fn with_allocator(allocator: A) -> Self {
        let () = Self::VALID;
        Self {
            allocator,
            _affixes: PhantomData,
        }
    }

    /// Typed pointer to the prefix of a block this compositor returned,
    /// or [`None`] for the null block.
    pub fn prefix(&self, block: &Block) -> Option<NonNull<Prefix>> {
        let ptr = block.ptr?;
        Some(unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(Self::PREFIX_SIZE)).cast() })
    }

    /// Typed pointer to the suffix. Note that the suffix sits right after
    /// the caller's bytes, so it is only suitably aligned for `Suffix`
    /// when block sizes are multiples of the inner alignment, which every
    /// allocator in this crate guarantees.
    pub fn suffix(&self, block: &Block) -> Option<NonNull<Suffix>> {
        let ptr = block.ptr?;
        Some(unsafe { NonNull::new_unchecked(ptr.as_ptr().add(block.size)).cast() })
    }

    fn stripped(affixed: Block) -> Block {
        let Some(ptr) = affixed.ptr else {
            return Block::null();
        };
        let base = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(Self::PREFIX_SIZE)) };
        Block::new(Some(base), affixed.size - Self::PREFIX_SIZE - Self::SUFFIX_SIZE)
    }

    fn affixed(stripped: &Block) -> Block {
        let Some(ptr) = stripped.ptr else {
            return Block::null();
        };
        let base = unsafe { NonNull::new_unchecked(ptr.as_ptr().sub(Self::PREFIX_SIZE)) };
        Block::new(
            Some(base),
            Self::PREFIX_SIZE + stripped.size + Self::SUFFIX_SIZE,
        )
    }
}

impl<A, Prefix, Suffix> Allocator for AffixAllocator<A, Prefix, Suffix>
where
    A: Allocator,
{
    const ALIGNMENT: usize = A::ALIGNMENT;

    fn allocate(&mut self, size: usize) -> Block {
        let affixed = self
            .allocator
            .allocate(Self::PREFIX_SIZE + size + Self::SUFFIX_SIZE);
        Self::stripped(affixed)
    }

    fn deallocate(&mut self, block: &mut Block) {
        if block.is_null() {
            return;
        }
        let mut affixed = Self::affixed(block);
        self.allocator.deallocate(&mut affixed);
        *block = Block::null();
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        // Resizing in place would have to slide the suffix anyway, so the
        // affixed block always moves.
        reallocate_and_copy_within(self, block, new_size)
    }
}

impl<A, Prefix, Suffix> Owns for AffixAllocator<A, Prefix, Suffix>
where
    A: Allocator + Owns,
{
    fn owns(&self, block: &Block) -> bool {
        if block.is_null() {
            return false;
        }
        self.allocator.owns(&Self::affixed(block))
    }
}

impl<A, Prefix, Suffix> Default for AffixAllocator<A, Prefix, Suffix>
where
    A: Allocator + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<A, Prefix, Suffix> Relocatable for AffixAllocator<A, Prefix, Suffix> where
    A: Allocator + Relocatable
{
}
