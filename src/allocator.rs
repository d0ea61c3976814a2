use crate::block::Block;

/// The contract every allocator in this crate satisfies, primitive leaves
/// and compositors alike. Compositors take their inner allocators as plain
/// generic fields, so a whole composition monomorphizes into one concrete
/// type with no indirection:
///
/// ```text
///  user request
///       |
///       v
/// +-------------+     +-------------+     +------------+
/// | Segregator  | --> |  Freelist   | --> | Mallocator |
/// | (dispatch)  |     | (recycle)   |     | (leaf)     |
/// +-------------+     +-------------+     +------------+
/// ```
///
/// Failure is signaled through values, never through panics: a failed
/// `allocate` returns the [null block](Block::null) and a failed
/// `reallocate` returns `false` with the block untouched.
pub trait Allocator {
    /// Alignment of every block this allocator returns, a power of two.
    /// Both the base address and the size of a non-null block are multiples
    /// of it. Compositors advertise the maximum of their inner alignments.
    const ALIGNMENT: usize;

    /// True iff this allocator accepts a deallocate whose block is a strict
    /// sub-range of a previously returned block. Linear arenas can, since
    /// deallocation at most rewinds a cursor. The system heap cannot. The
    /// freelist inspects this to decide whether it may carve one big chunk
    /// into many nodes.
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = false;

    /// Returns a block of at least `size` bytes, or the null block on
    /// failure. A request for zero bytes may yield either a null block or a
    /// zero-length one; callers must not rely on which.
    fn allocate(&mut self, size: usize) -> Block;

    /// Releases `block`. Deallocating the null block is a no-op.
    /// Implementations may reset the caller's block to null.
    fn deallocate(&mut self, block: &mut Block);

    /// Resizes `block` to hold at least `new_size` bytes, in place when
    /// possible, otherwise by moving the contents to a fresh block and
    /// releasing the old one. Returns `false` and leaves `block` unchanged
    /// when neither works.
    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool;
}

/// Answers "did this allocator produce this block?".
///
/// Implemented by every allocator that can actually tell, and required
/// wherever a compositor routes by ownership: the fallback chain picks
/// primary or secondary with it and the cascade finds the sub-allocator a
/// block came from. The system heap has no way to answer and deliberately
/// does not implement this, which keeps it out of such positions at compile
/// time. Only the null allocator owns the null block.
pub trait Owns {
    fn owns(&self, block: &Block) -> bool;
}

/// Bulk release of everything an arena has handed out.
///
/// After the call every previously returned block is invalid, so callers
/// must drop their pointers first.
pub trait DeallocateAll {
    fn deallocate_all(&mut self);
}

/// Marker for allocators whose outstanding blocks stay valid when the
/// allocator value itself is moved.
///
/// Heap-backed allocators qualify, since moving them moves only bookkeeping
/// and the blocks live elsewhere. An arena over a stack buffer does not:
/// its storage is inline, and a move carries the bytes away from every
/// pointer already handed out. The cascading allocator requires this bound
/// because it moves each sub-allocator into memory obtained from that same
/// sub-allocator.
///
/// # Safety
///
/// Implementors promise that no returned block points into the allocator
/// value itself.
pub unsafe trait Relocatable {}

// A mutable borrow of an allocator is itself an allocator, so a
// composition can also borrow an inner allocator instead of owning it.
impl<A: Allocator> Allocator for &mut A {
    const ALIGNMENT: usize = A::ALIGNMENT;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&mut self, size: usize) -> Block {
        (**self).allocate(size)
    }

    fn deallocate(&mut self, block: &mut Block) {
        (**self).deallocate(block)
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        (**self).reallocate(block, new_size)
    }
}

impl<A: Owns> Owns for &mut A {
    fn owns(&self, block: &Block) -> bool {
        (**self).owns(block)
    }
}

impl<A: DeallocateAll> DeallocateAll for &mut A {
    fn deallocate_all(&mut self) {
        (**self).deallocate_all()
    }
}

// Moving the borrow moves a pointer, never the allocator it points at.
unsafe impl<A: Allocator> Relocatable for &mut A {}
