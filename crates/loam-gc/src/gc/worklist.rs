//! The mark worklist: a chained stack of fixed-size blocks in scratch.
//!
//! Marking is iterative, never recursive, so arbitrarily deep or cyclic
//! object graphs cost bounded native stack. Blocks are bump-allocated
//! from the scratch region; because nothing else allocates scratch while
//! the worklist is live, a block popped empty is released by rewinding
//! the scratch cursor to its own address.

use std::mem;
use std::ptr;

use crate::heap::Heap;
use crate::layout::Record;
use crate::runtime::Runtime;

/// Entries per worklist block.
pub(crate) const MARK_STACK_SIZE: usize = 512;

#[repr(C)]
struct MarkBlock {
    location: usize,
    next: *mut MarkBlock,
    entries: [*mut Record; MARK_STACK_SIZE],
}

/// Strictly LIFO worklist over scratch-allocated blocks.
pub(crate) struct MarkStack {
    top: *mut MarkBlock,
}

impl MarkStack {
    /// Allocates the initial block from scratch.
    pub(crate) fn new<R: Runtime>(heap: &mut Heap<R>) -> Self {
        let block = heap.alloc_scratch(mem::size_of::<MarkBlock>()).cast::<MarkBlock>();
        unsafe {
            (*block).location = 0;
            (*block).next = ptr::null_mut();
        }
        Self { top: block }
    }

    /// Pushes an object, chaining in a fresh block when the top one is
    /// full.
    pub(crate) fn push<R: Runtime>(&mut self, heap: &mut Heap<R>, object: *mut Record) {
        unsafe {
            if (*self.top).location >= MARK_STACK_SIZE {
                let block = heap.alloc_scratch(mem::size_of::<MarkBlock>()).cast::<MarkBlock>();
                (*block).location = 0;
                (*block).next = self.top;
                self.top = block;
            }
            let location = (*self.top).location;
            (*self.top).entries[location] = object;
            (*self.top).location = location + 1;
        }
    }

    /// Pops the most recently pushed object, releasing emptied overflow
    /// blocks back to scratch. Returns `None` when the worklist drains.
    pub(crate) fn pop<R: Runtime>(&mut self, heap: &mut Heap<R>) -> Option<*mut Record> {
        unsafe {
            if (*self.top).location == 0 {
                let next = (*self.top).next;
                if next.is_null() {
                    return None;
                }
                // The emptied block is the top of scratch; rewinding to
                // its address releases it.
                heap.rewind_scratch(self.top.cast::<u8>());
                self.top = next;
            }
            (*self.top).location -= 1;
            Some((*self.top).entries[(*self.top).location])
        }
    }
}
