//! Buffer providers: the sources of the one contiguous byte region a
//! linear arena bumps through. Two flavors exist behind one trait. The
//! stack provider keeps its storage inline, so the arena is entirely
//! self-contained but must never be moved while blocks are outstanding.
//! The heap provider borrows its storage from an inner allocator, either
//! eagerly at construction or lazily on first use, and may be moved
//! freely.

use std::{cell::UnsafeCell, mem::MaybeUninit, ptr::NonNull};

use crate::{
    allocator::{Allocator, Relocatable},
    block::Block,
    Pointer,
};

/// Largest sub-allocation alignment a [`StackBuffer`] can guarantee; its
/// inline storage is aligned this much. Arenas that need more must use a
/// heap buffer over [`crate::AlignedMallocator`].
pub const MAX_STACK_ALIGNMENT: usize = 16;

/// A buffer size known either at compile time or at run time, behind one
/// interface. The static flavor is a zero-sized type; the dynamic flavor
/// carries the value and can be set after construction.
pub trait SizeSource {
    fn value(&self) -> usize;

    /// False while a dynamic size has not been provided yet.
    fn is_set(&self) -> bool {
        true
    }
}

/// Compile-time buffer size. Carries no data.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticSize<const N: usize>;

impl<const N: usize> SizeSource for StaticSize<N> {
    #[inline]
    fn value(&self) -> usize {
        N
    }
}

/// Run-time buffer size. Zero means not set yet.
#[derive(Clone, Copy, Debug, Default)]
pub struct DynamicSize(usize);

impl DynamicSize {
    pub fn new(size: usize) -> Self {
        Self(size)
    }

    pub fn set(&mut self, size: usize) {
        self.0 = size;
    }
}

impl SizeSource for DynamicSize {
    #[inline]
    fn value(&self) -> usize {
        self.0
    }

    #[inline]
    fn is_set(&self) -> bool {
        self.0 != 0
    }
}

/// A source of one contiguous byte region of known size.
pub trait BufferProvider {
    /// Capacity of the region in bytes.
    fn size(&self) -> usize;

    /// Base address of the region, or [`None`] while a lazy buffer has not
    /// been materialized yet.
    fn base(&self) -> Pointer<u8>;

    /// Materializes the region if it is not live yet and returns its base.
    /// [`None`] means the backing allocation failed.
    fn init(&mut self) -> Pointer<u8>;
}

/// Inline storage for [`StackBuffer`]. The fixed alignment is what bounds
/// [`MAX_STACK_ALIGNMENT`]: `repr(align)` cannot depend on a const
/// parameter, so every stack buffer is aligned to the maximum.
#[repr(align(16))]
struct AlignedStorage<const SIZE: usize>(MaybeUninit<[u8; SIZE]>);

/// A buffer living inside the provider itself. Always live, no init mode
/// to choose. The arena using it hands out pointers into `self`, which is
/// why this type must stay put; it deliberately does not implement
/// [`Relocatable`].
pub struct StackBuffer<const SIZE: usize, const ALIGN: usize = 8> {
    // UnsafeCell because the bytes are mutated through pointers derived
    // from a shared borrow while the arena is also borrowed.
    storage: UnsafeCell<AlignedStorage<SIZE>>,
}

impl<const SIZE: usize, const ALIGN: usize> StackBuffer<SIZE, ALIGN> {
    const VALID: () = assert!(
        ALIGN.is_power_of_two() && ALIGN <= MAX_STACK_ALIGNMENT,
        "stack buffer alignment must be a power of two no larger than the storage alignment"
    );

    pub fn new() -> Self {
        let () = Self::VALID;
        Self {
            storage: UnsafeCell::new(AlignedStorage(MaybeUninit::uninit())),
        }
    }
}

impl<const SIZE: usize, const ALIGN: usize> BufferProvider for StackBuffer<SIZE, ALIGN> {
    #[inline]
    fn size(&self) -> usize {
        SIZE
    }

    #[inline]
    fn base(&self) -> Pointer<u8> {
        NonNull::new(self.storage.get().cast::<u8>())
    }

    #[inline]
    fn init(&mut self) -> Pointer<u8> {
        self.base()
    }
}

impl<const SIZE: usize, const ALIGN: usize> Default for StackBuffer<SIZE, ALIGN> {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer whose storage comes from an inner allocator. `LAZY` picks the
/// init mode: `false` allocates in the constructor, `true` defers to the
/// first [`BufferProvider::init`] call. Moving the provider transfers
/// buffer ownership; the buffer is returned to the inner allocator on
/// drop.
pub struct HeapBuffer<A: Allocator, S: SizeSource, const LAZY: bool = false> {
    allocator: A,
    buffer: Pointer<u8>,
    len: S,
}

impl<A, S, const LAZY: bool> HeapBuffer<A, S, LAZY>
where
    A: Allocator,
    S: SizeSource + Default,
{
    pub fn new() -> Self
    where
        A: Default,
    {
        Self::with_allocator(A::default())
    }

    pub fn with_allocator(allocator: A) -> Self {
        let mut provider = Self {
            allocator,
            buffer: None,
            len: S::default(),
        };
        if !LAZY {
            provider.acquire();
        }
        provider
    }
}

impl<A: Allocator, const LAZY: bool> HeapBuffer<A, DynamicSize, LAZY> {
    /// Builds a provider with a size chosen at run time.
    pub fn with_size(size: usize) -> Self
    where
        A: Default,
    {
        let mut provider = Self {
            allocator: A::default(),
            buffer: None,
            len: DynamicSize::new(size),
        };
        if !LAZY {
            provider.acquire();
        }
        provider
    }

    /// Sets the buffer size. Ignored once the buffer is live, since the
    /// region cannot be resized under the blocks carved from it.
    pub fn set_size(&mut self, size: usize) {
        if self.buffer.is_some() {
            return;
        }
        self.len.set(size);
        if !LAZY {
            self.acquire();
        }
    }
}

impl<A: Allocator, S: SizeSource, const LAZY: bool> HeapBuffer<A, S, LAZY> {
    /// Allocates the backing region if it is missing and the size is
    /// known.
    fn acquire(&mut self) -> Pointer<u8> {
        if self.buffer.is_none() && self.len.is_set() {
            self.buffer = self.allocator.allocate(self.len.value()).ptr;
        }
        self.buffer
    }
}

impl<A: Allocator, S: SizeSource, const LAZY: bool> BufferProvider for HeapBuffer<A, S, LAZY> {
    #[inline]
    fn size(&self) -> usize {
        self.len.value()
    }

    #[inline]
    fn base(&self) -> Pointer<u8> {
        self.buffer
    }

    fn init(&mut self) -> Pointer<u8> {
        self.acquire()
    }
}

impl<A: Allocator, S: SizeSource, const LAZY: bool> Drop for HeapBuffer<A, S, LAZY> {
    fn drop(&mut self) {
        if let Some(ptr) = self.buffer.take() {
            let mut block = Block::new(Some(ptr), self.len.value());
            self.allocator.deallocate(&mut block);
        }
    }
}

impl<A, S, const LAZY: bool> Default for HeapBuffer<A, S, LAZY>
where
    A: Allocator + Default,
    S: SizeSource + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

// The buffer lives behind a pointer, so moving the provider moves nothing
// a block points into.
unsafe impl<A: Allocator, S: SizeSource, const LAZY: bool> Relocatable for HeapBuffer<A, S, LAZY> {}
