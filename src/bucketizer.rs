//! Routes each request to one of `N` inner allocators by size class. The
//! classes are carved out of a [`Raider`]'s range at construction:
//! bucket 0 starts at the global minimum, every later bucket starts one
//! past its predecessor's maximum, so the classes tile the range without
//! overlapping:
//!
//! ```text
//! LinearRaider<0, 64, 16>
//!
//! buckets[0]   buckets[1]   buckets[2]   buckets[3]
//! [0 ... 16]   [17 ... 32]  [33 ... 48]  [49 ... 64]
//! ```
//!
//! The buckets are typically freelists over a [`DynamicRange`], which is
//! exactly what [`RangedAllocator`] exists for.
//!
//! [`DynamicRange`]: crate::range::DynamicRange

use std::array;

use crate::{
    allocator::{Allocator, Owns, Relocatable},
    block::Block,
    range::{Raider, RangedAllocator},
    realloc::{handle_common_reallocation_cases, reallocate_and_copy},
};

pub struct Bucketizer<A, R, const N: usize> {
    raider: R,
    buckets: [A; N],
}

impl<A, R, const N: usize> Bucketizer<A, R, N>
where
    A: Allocator + RangedAllocator + Default,
    R: Raider + Default,
{
    /// Builds the bucket array and hands each bucket its sub-range.
    ///
    /// # Panics
    ///
    /// Panics when `N` does not match the raider's step count.
    pub fn new() -> Self {
        let raider = R::default();
        assert_eq!(raider.num_steps(), N, "bucket count must match the raider's step count");

        let mut buckets: [A; N] = array::from_fn(|_| A::default());
        let mut lower = raider.min();
        for (index, bucket) in buckets.iter_mut().enumerate() {
            let step = raider.step_size(index);
            let min = if index == 0 { lower } else { lower + 1 };
            bucket.set_limits(min, lower + step);
            lower += step;
        }

        Self { raider, buckets }
    }
}

impl<A, R, const N: usize> Bucketizer<A, R, N>
where
    R: Raider,
{
    fn bucket_index(&self, size: usize) -> Option<usize> {
        if !self.raider.contains(size) {
            return None;
        }
        self.raider.step_index(size)
    }

    /// Disjoint mutable access to two buckets, for cross-bucket moves.
    fn bucket_pair(&mut self, from: usize, to: usize) -> (&mut A, &mut A) {
        debug_assert_ne!(from, to);
        if from < to {
            let (head, tail) = self.buckets.split_at_mut(to);
            (&mut head[from], &mut tail[0])
        } else {
            let (head, tail) = self.buckets.split_at_mut(from);
            (&mut tail[0], &mut head[to])
        }
    }
}

impl<A, R, const N: usize> Allocator for Bucketizer<A, R, N>
where
    A: Allocator,
    R: Raider,
{
    const ALIGNMENT: usize = A::ALIGNMENT;

    fn allocate(&mut self, size: usize) -> Block {
        match self.bucket_index(size) {
            Some(index) => self.buckets[index].allocate(size),
            None => Block::null(),
        }
    }

    fn deallocate(&mut self, block: &mut Block) {
        // Out-of-range blocks are not ours; ignore them.
        if let Some(index) = self.bucket_index(block.size) {
            self.buckets[index].deallocate(block);
        }
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        let Some(new_index) = self.bucket_index(new_size) else {
            return false;
        };
        let Some(old_index) = self.bucket_index(block.size) else {
            return false;
        };

        if old_index == new_index {
            return self.buckets[new_index].reallocate(block, new_size);
        }

        let (from, to) = self.bucket_pair(old_index, new_index);
        reallocate_and_copy(from, to, block, new_size)
    }
}

impl<A, R, const N: usize> Owns for Bucketizer<A, R, N>
where
    A: Allocator + Owns,
    R: Raider,
{
    fn owns(&self, block: &Block) -> bool {
        match self.bucket_index(block.size) {
            Some(index) => self.buckets[index].owns(block),
            None => false,
        }
    }
}

impl<A, R, const N: usize> Default for Bucketizer<A, R, N>
where
    A: Allocator + RangedAllocator + Default,
    R: Raider + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<A, R, const N: usize> Relocatable for Bucketizer<A, R, N> where
    A: Allocator + Relocatable
{
}
