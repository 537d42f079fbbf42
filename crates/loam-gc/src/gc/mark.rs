//! The mark phase: precise graph traversal from the compiler's roots.

use std::mem;
use std::ptr;

use crate::gc::worklist::MarkStack;
use crate::heap::{Heap, SWEEP_PIECE_SIZE};
use crate::layout::{find_class, GcRef, Record, StackFrame, MARK_BIT};
use crate::runtime::Runtime;

/// Per-piece cell value meaning "no live object seen in this piece".
pub(crate) const EMPTY_PIECE: u16 = 0xFFFF;

/// The sweep-piece index built during marking: for each 16 KiB piece of
/// heap, the smallest intra-piece offset at which a live object was seen.
pub(crate) struct SweepPieces {
    pub(crate) data: *mut u16,
    pub(crate) count: usize,
}

impl<R: Runtime> Heap<R> {
    /// Marks every record reachable from the global root table and the
    /// shadow stack, building the sweep-piece index as a side effect.
    /// Allocates only from scratch; the worklist memory is released
    /// before returning, the piece index stays for the sweep.
    ///
    /// # Safety
    ///
    /// The runtime's root and frame metadata must be consistent with the
    /// heap contents.
    pub(crate) unsafe fn mark(&mut self) -> SweepPieces {
        #[cfg(feature = "tracing")]
        let _span = crate::gc::tracing::internal::trace_phase(crate::gc::tracing::internal::GcPhase::Mark);

        let piece_count = (self.heap_size() / SWEEP_PIECE_SIZE / 4 + 1) * 4;
        let pieces = self
            .alloc_scratch(piece_count * mem::size_of::<u16>())
            .cast::<u16>();
        unsafe {
            ptr::write_bytes(pieces, 0xFF, piece_count * mem::size_of::<u16>());
        }
        let pieces_end = self.extra;

        let mut stack = MarkStack::new(self);

        let roots = self.runtime.stack_roots();
        let root_count = unsafe { (*roots).size } as usize;
        for i in 0..root_count {
            unsafe {
                let slot = *(*roots).data.add(i);
                self.mark_object(*slot, pieces, &mut stack);
            }
        }

        let mut frame = self.runtime.stack_top();
        while !frame.is_null() {
            unsafe {
                let references = StackFrame::references(frame);
                for i in 0..(*frame).size as usize {
                    self.mark_object(*references.add(i), pieces, &mut stack);
                }
                frame = (*frame).next;
            }
        }

        // The piece index stays; everything above it (the worklist) goes.
        self.rewind_scratch(pieces_end);

        SweepPieces {
            data: pieces,
            count: piece_count,
        }
    }

    /// Marks one root and drains everything reachable from it.
    unsafe fn mark_object(&mut self, object: *mut Record, pieces: *mut u16, stack: &mut MarkStack) {
        if object.is_null() {
            return;
        }
        stack.push(self, object);

        while let Some(object) = stack.pop(self) {
            let tag = unsafe { (*object).tag };
            if tag & MARK_BIT != 0 {
                continue;
            }

            #[cfg(feature = "heap-assert")]
            unsafe {
                self.assert_markable(object, tag);
            }

            unsafe {
                (*object).tag = tag | MARK_BIT;
            }

            let offset = object as usize - self.pool as usize;
            let piece = offset / SWEEP_PIECE_SIZE;
            let piece_offset = (offset % SWEEP_PIECE_SIZE) as u16;
            unsafe {
                if *pieces.add(piece) > piece_offset {
                    *pieces.add(piece) = piece_offset;
                }
            }

            // Walk the class chain so inherited reference fields are
            // visited too. Array elements have no field entries and are
            // not traversed here.
            let address = object.cast::<u8>();
            let mut class = find_class(tag);
            while !class.is_null() {
                unsafe {
                    let fields = &(*class).fields;
                    for i in 0..fields.count as usize {
                        let field_offset = *fields.offsets.add(i) as usize;
                        let field = *address.add(field_offset).cast::<GcRef>();
                        if !field.is_null() && (*field).tag & MARK_BIT == 0 {
                            stack.push(self, field);
                        }
                    }
                    class = fields.parent;
                }
            }
        }
    }

    #[cfg(feature = "heap-assert")]
    unsafe fn assert_markable(&self, object: *mut Record, tag: u32) {
        use crate::heap::fatal;
        use crate::layout::{TAG_FREE, TAG_FREE_WORD};

        let address = object as usize;
        if address < self.pool as usize || address >= self.limit as usize {
            fatal(format_args!(
                "heap corruption: marked reference {object:p} lies outside the heap"
            ));
        }
        if tag != TAG_FREE && tag != TAG_FREE_WORD && tag != self.array_tag {
            unsafe {
                let class = find_class(tag);
                if !(*class).is_valid() {
                    fatal(format_args!(
                        "heap corruption: marked reference {object:p} (tag {tag:#x}) is not an object"
                    ));
                }
            }
        }
    }
}
