//! A compositor that grows by stamping out fresh copies of one allocator
//! type. It keeps a singly linked list of sub-allocators and asks each in
//! turn; when all refuse, a new one is constructed and *prepended*. The
//! trick is that each list node lives in memory allocated from the very
//! sub-allocator it carries:
//!
//! ```text
//!  head --+
//!         |
//!         v
//! +-- node ----------------+      +-- node ----------------+
//! | allocator  (A)         |      | allocator  (A)         |
//! | next  -----------------|----> | next: None             |
//! +------------------------+      +------------------------+
//!   ^                               ^
//!   |                               |
//!   +-- this node's bytes came      +-- same here
//!       from its own `allocator`
//! ```
//!
//! Self-hosting keeps the compositor allocation-free on its own, but it
//! means tearing a node down is a dance: the node is first moved out onto
//! the stack, and only then is its former storage deallocated through the
//! allocator that now lives on the stack. The same dance runs in reverse
//! in `deallocate_all`, which must re-home the surviving head node inside
//! its freshly emptied arena.
//!
//! `A` must be [`Relocatable`] precisely because nodes are moved into and
//! out of their own storage; an allocator with inline storage would die in
//! the move.

use std::mem;

use crate::{
    allocator::{Allocator, DeallocateAll, Owns, Relocatable},
    block::Block,
    realloc::{copy_block, handle_common_reallocation_cases},
    Pointer,
};

struct Node<A> {
    allocator: A,
    next: Pointer<Node<A>>,
}

pub struct CascadingAllocator<A>
where
    A: Allocator + Owns + Default + Relocatable,
{
    head: Pointer<Node<A>>,
    /// Every node block a given composition produces has the same size;
    /// the first one records it so later teardowns can rebuild the block.
    node_block_size: usize,
}

impl<A> CascadingAllocator<A>
where
    A: Allocator + Owns + Default + Relocatable,
{
    const VALID: () = assert!(
        A::ALIGNMENT >= mem::align_of::<Node<A>>(),
        "sub-allocator blocks cannot hold a node"
    );

    pub fn new() -> Self {
        let () = Self::VALID;
        Self {
            head: None,
            node_block_size: 0,
        }
    }

    /// Number of sub-allocators currently on the list.
    pub fn num_nodes(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while let Some(node) = current {
            count += 1;
            current = unsafe { node.as_ref() }.next;
        }
        count
    }

    fn allocate_no_grow(&mut self, size: usize) -> Block {
        let mut current = self.head;
        while let Some(node) = current {
            let node = unsafe { &mut *node.as_ptr() };
            let block = node.allocator.allocate(size);
            if !block.is_null() {
                return block;
            }
            current = node.next;
        }
        Block::null()
    }

    /// Builds a fresh sub-allocator on the stack, takes a block from it
    /// and moves it into that block, node and all.
    fn create_node(&mut self) -> Pointer<Node<A>> {
        let mut allocator = A::default();
        let node_block = allocator.allocate(mem::size_of::<Node<A>>());
        let ptr = node_block.ptr?;

        debug_assert!(
            self.node_block_size == 0 || self.node_block_size == node_block.size,
            "node blocks must all have the same size"
        );
        self.node_block_size = node_block.size;

        let node = ptr.cast::<Node<A>>();
        unsafe {
            node.as_ptr().write(Node { allocator, next: None });
        }
        Some(node)
    }

    fn prepend_node(&mut self) -> Pointer<Node<A>> {
        let node = self.create_node()?;
        unsafe {
            (*node.as_ptr()).next = self.head;
        }
        self.head = Some(node);
        Some(node)
    }

    fn find_owning_node(&self, block: &Block) -> Pointer<Node<A>> {
        let mut current = self.head;
        while let Some(node) = current {
            let node_ref = unsafe { node.as_ref() };
            if node_ref.allocator.owns(block) {
                return Some(node);
            }
            current = node_ref.next;
        }
        None
    }

    /// Tears down `node` and everything after it, in reverse order so
    /// that each node's storage is released while its sub-allocator is
    /// still alive on the stack.
    ///
    /// # Safety
    ///
    /// `node` and its whole tail must be valid and must not be reachable
    /// from anywhere else afterwards.
    unsafe fn erase_nodes(node: Pointer<Node<A>>, node_block_size: usize) {
        let Some(node) = node else {
            return;
        };

        Self::erase_nodes((*node.as_ptr()).next, node_block_size);

        // Move the node out of the storage it is about to release.
        let mut stack_node = node.as_ptr().read();
        let mut block = Block::new(Some(node.cast()), node_block_size);
        stack_node.allocator.deallocate(&mut block);
        // Dropping `stack_node` tears down the sub-allocator itself.
    }
}

impl<A> Allocator for CascadingAllocator<A>
where
    A: Allocator + Owns + Default + Relocatable,
{
    const ALIGNMENT: usize = A::ALIGNMENT;
    const SUPPORTS_TRUNCATED_DEALLOCATION: bool = A::SUPPORTS_TRUNCATED_DEALLOCATION;

    fn allocate(&mut self, size: usize) -> Block {
        let block = self.allocate_no_grow(size);
        if !block.is_null() {
            return block;
        }

        // Every node refused; grow the cascade by one and ask it. If even
        // a fresh sub-allocator cannot serve the size, the request is
        // simply too large for this composition.
        match self.prepend_node() {
            Some(node) => unsafe { (*node.as_ptr()).allocator.allocate(size) },
            None => Block::null(),
        }
    }

    fn deallocate(&mut self, block: &mut Block) {
        // A block no node recognizes is silently ignored.
        if let Some(node) = self.find_owning_node(block) {
            unsafe {
                (*node.as_ptr()).allocator.deallocate(block);
            }
        }
    }

    fn reallocate(&mut self, block: &mut Block, new_size: usize) -> bool {
        if handle_common_reallocation_cases(self, block, new_size) {
            return true;
        }

        let Some(node) = self.find_owning_node(block) else {
            return false;
        };

        if unsafe { (*node.as_ptr()).allocator.reallocate(block, new_size) } {
            return true;
        }

        // In-place failed; source a new block from the cascade as a whole,
        // which may grow a fresh node. The owning node pointer stays valid
        // because growth only ever prepends.
        let new_block = self.allocate(new_size);
        if new_block.is_null() {
            return false;
        }
        copy_block(&new_block, block);
        unsafe {
            (*node.as_ptr()).allocator.deallocate(block);
        }
        *block = new_block;
        true
    }
}

impl<A> Owns for CascadingAllocator<A>
where
    A: Allocator + Owns + Default + Relocatable,
{
    fn owns(&self, block: &Block) -> bool {
        self.find_owning_node(block).is_some()
    }
}

impl<A> DeallocateAll for CascadingAllocator<A>
where
    A: Allocator + Owns + Default + Relocatable + DeallocateAll,
{
    /// Collapses the cascade back to a single node with an empty
    /// sub-allocator. The tail is torn down node by node; the head is
    /// moved onto the stack, emptied (which wipes its own former storage
    /// along with everything else), and then re-homed in a block taken
    /// from the now empty sub-allocator.
    fn deallocate_all(&mut self) {
        let Some(head) = self.head.take() else {
            return;
        };

        unsafe {
            Self::erase_nodes((*head.as_ptr()).next.take(), self.node_block_size);

            let mut node = head.as_ptr().read();
            node.allocator.deallocate_all();

            let node_block = node.allocator.allocate(mem::size_of::<Node<A>>());
            if let Some(ptr) = node_block.ptr {
                let new_head = ptr.cast::<Node<A>>();
                new_head.as_ptr().write(node);
                self.head = Some(new_head);
            }
            // If the freshly emptied sub-allocator cannot even hold a
            // node, dropping it here leaves the cascade empty but sound.
        }
    }
}

impl<A> Drop for CascadingAllocator<A>
where
    A: Allocator + Owns + Default + Relocatable,
{
    fn drop(&mut self) {
        unsafe {
            Self::erase_nodes(self.head.take(), self.node_block_size);
        }
    }
}

impl<A> Default for CascadingAllocator<A>
where
    A: Allocator + Owns + Default + Relocatable,
{
    fn default() -> Self {
        Self::new()
    }
}

// Nodes live in sub-allocator memory, never in the cascade value.
unsafe impl<A> Relocatable for CascadingAllocator<A> where
    A: Allocator + Owns + Default + Relocatable
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{linear::HeapLinearAllocator, mallocator::Mallocator};

    type KibArena = HeapLinearAllocator<Mallocator, 1024>;
    type Cascade = CascadingAllocator<KibArena>;

    #[test]
    fn grows_one_node_per_exhausted_arena() {
        let mut cascade = Cascade::new();
        assert_eq!(cascade.num_nodes(), 0);

        // Each 1 KiB arena can host its own node plus one 900 byte block,
        // so three allocations force two extra nodes after the first.
        let blocks: Vec<Block> = (0..3).map(|_| cascade.allocate(900)).collect();
        assert!(blocks.iter().all(|block| !block.is_null()));
        assert_eq!(cascade.num_nodes(), 3);

        for block in &blocks {
            assert!(cascade.owns(block));
        }
    }

    #[test]
    fn reuses_nodes_with_room() {
        let mut cascade = Cascade::new();

        let a = cascade.allocate(400);
        let b = cascade.allocate(400);
        assert!(!a.is_null() && !b.is_null());
        // Both fit next to the node in the first arena.
        assert_eq!(cascade.num_nodes(), 1);
    }

    #[test]
    fn deallocate_routes_to_the_owning_node() {
        let mut cascade = Cascade::new();

        let _pin = cascade.allocate(900);
        let mut block = cascade.allocate(900);
        assert_eq!(cascade.num_nodes(), 2);

        // The block is the last allocation of its arena, so the arena can
        // take it back and serve the same bytes again.
        let ptr = block.as_ptr();
        cascade.deallocate(&mut block);
        let again = cascade.allocate(800);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(cascade.num_nodes(), 2);
    }

    #[test]
    fn reallocate_can_cross_nodes() {
        let mut cascade = Cascade::new();

        let _pin = cascade.allocate(600);
        let mut block = cascade.allocate(300);
        unsafe {
            std::ptr::write_bytes(block.as_ptr(), 69, block.size);
        }

        // Growing to 900 cannot happen in place (the arena is nearly
        // full), so the cascade grows a node and moves the contents.
        assert!(cascade.reallocate(&mut block, 900));
        assert_eq!(cascade.num_nodes(), 2);
        assert!(block.size >= 900);
        unsafe {
            for offset in 0..300 {
                assert_eq!(*block.as_ptr().add(offset), 69);
            }
        }
    }

    #[test]
    fn deallocate_all_collapses_to_one_empty_node() {
        let mut cascade = Cascade::new();

        let blocks: Vec<Block> = (0..3).map(|_| cascade.allocate(900)).collect();
        assert!(blocks.iter().all(|block| !block.is_null()));
        assert_eq!(cascade.num_nodes(), 3);

        cascade.deallocate_all();
        assert_eq!(cascade.num_nodes(), 1);

        // The surviving arena holds nothing but its own node again: a 900
        // byte allocation fits without growing the cascade.
        let block = cascade.allocate(900);
        assert!(!block.is_null());
        assert_eq!(cascade.num_nodes(), 1);
    }

    #[test]
    fn an_impossible_size_fails_without_leaking_nodes() {
        let mut cascade = Cascade::new();

        // Too big even for a fresh arena. The grown node stays on the
        // list and serves later requests.
        assert!(cascade.allocate(4096).is_null());
        assert_eq!(cascade.num_nodes(), 1);

        let block = cascade.allocate(500);
        assert!(!block.is_null());
        assert_eq!(cascade.num_nodes(), 1);
    }
}
