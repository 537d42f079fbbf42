//! The bump allocator over the current free chunk.
//!
//! The cursor pair `(current_object, current_limit)` points into one free
//! chunk; an allocation advances the cursor. A bump is accepted when it
//! leaves either room for a record header or nothing at all, so the
//! remainder of a chunk is always a representable free record. When the
//! current chunk cannot satisfy a request, its remainder is closed out as
//! a free record and the next entry of the free-chunk index is loaded;
//! when the index runs dry, a collection sized to the request runs inline
//! and the allocation is retried once.

use std::mem;
use std::ptr;

use crate::heap::{chunk_size, fatal, make_empty, Heap};
use crate::layout::{align8, find_class, Array, Class, GcRef, Record};
use crate::runtime::Runtime;

impl<R: Runtime> Heap<R> {
    /// Allocates a zero-filled object whose layout is given by the class
    /// the tag decodes to, with `tag` written into the header.
    ///
    /// May run a full collection inline. Aborts the process when even a
    /// collection cannot satisfy the request.
    ///
    /// # Safety
    ///
    /// `tag` must decode to a valid class of this heap's code image, and
    /// every live reference must be visible through the runtime's roots
    /// or shadow stack.
    pub unsafe fn alloc(&mut self, tag: u32) -> *mut Record {
        let class = find_class(tag);
        let size = unsafe { (*class).instance_size() };
        let chunk = unsafe { self.claim(size) };
        unsafe {
            ptr::write_bytes(chunk.cast::<u8>(), 0, size);
            (*chunk).tag = tag;
        }
        chunk
    }

    /// Allocates a reference array with elements of the class `element_tag`
    /// decodes to. `depth` above 0 makes the elements sub-arrays.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc), with `element_tag` decoding to a valid
    /// class.
    pub unsafe fn object_array_alloc(
        &mut self,
        element_tag: u32,
        depth: u8,
        count: u32,
    ) -> *mut Array {
        unsafe { self.array_alloc(find_class(element_tag), depth, count, mem::size_of::<GcRef>()) }
    }

    /// Allocates a `boolean[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn boolean_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.boolean, 0, count, 1) }
    }

    /// Allocates a `byte[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn byte_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.byte, 0, count, 1) }
    }

    /// Allocates a `short[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn short_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.short, 0, count, 2) }
    }

    /// Allocates a `char[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn char_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.char, 0, count, 2) }
    }

    /// Allocates an `int[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn int_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.int, 0, count, 4) }
    }

    /// Allocates a `long[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn long_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.long, 0, count, 8) }
    }

    /// Allocates a `float[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn float_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.float, 0, count, 4) }
    }

    /// Allocates a `double[]` of `count` elements.
    ///
    /// # Safety
    ///
    /// As [`alloc`](Self::alloc).
    pub unsafe fn double_array_alloc(&mut self, count: u32) -> *mut Array {
        unsafe { self.array_alloc(self.array_classes.double, 0, count, 8) }
    }

    /// Allocates an array of identical shape to `source` and copies the
    /// source bytes into it.
    ///
    /// The copy runs immediately after the bump with no intervening
    /// safepoint, so the clone briefly carries the source's element data
    /// (including any references) before the caller installs it; the
    /// clone is not zero-initialized.
    ///
    /// # Safety
    ///
    /// `source` must point at a live array record and be reachable from a
    /// root or shadow-stack slot, since the allocation may collect.
    pub unsafe fn clone_array(&mut self, source: *const Array) -> *mut Array {
        let size = unsafe { self.array_size(source) };
        let chunk = unsafe { self.claim(size) };
        unsafe {
            ptr::copy_nonoverlapping(source.cast::<u8>(), chunk.cast::<u8>(), size);
        }
        chunk.cast::<Array>()
    }

    unsafe fn array_alloc(
        &mut self,
        element_type: *const Class,
        depth: u8,
        count: u32,
        elem_size: usize,
    ) -> *mut Array {
        let size = align8(mem::size_of::<Array>() + elem_size * (count as usize + 1));
        let chunk = unsafe { self.claim(size) };
        unsafe {
            ptr::write_bytes(chunk.cast::<u8>(), 0, size);
            let array = chunk.cast::<Array>();
            (*array).record.tag = self.array_tag;
            (*array).record.size = count;
            (*array).element_type = element_type;
            *Array::depth_ptr(array) = depth;
            array
        }
    }

    /// Claims `size` bytes at the bump cursor and advances it. The fast
    /// path only accepts a bump that leaves header room; the exact-fit
    /// case is handled by the refill loop.
    unsafe fn claim(&mut self, size: usize) -> *mut Record {
        let chunk = if self.current_object.is_null() {
            unsafe { self.get_available_chunk(size) }
        } else {
            // The probe may land past the chunk, so it must not carry
            // provenance-checked arithmetic.
            let next = self.current_object.cast::<u8>().wrapping_add(size);
            if next.wrapping_add(mem::size_of::<Record>()) <= self.current_limit {
                self.current_object
            } else {
                unsafe { self.get_available_chunk(size) }
            }
        };
        self.current_object = unsafe { chunk.cast::<u8>().add(size) }.cast::<Record>();
        chunk
    }

    /// Walks the free-chunk index until a chunk can hold `size` bytes plus
    /// a terminating header (or exactly `size`). Exhausted chunks have
    /// their remainder closed out as free records for the next sweep.
    unsafe fn find_available_chunk(&mut self, size: usize) -> Option<*mut Record> {
        loop {
            if self.current_object.is_null() {
                return None;
            }
            let next = self.current_object.cast::<u8>().wrapping_add(size);
            if next.wrapping_add(mem::size_of::<Record>()) <= self.current_limit
                || next == self.current_limit
            {
                return Some(self.current_object);
            }

            let leftover = self.current_limit as usize - self.current_object as usize;
            unsafe {
                make_empty(self.current_object, leftover);
            }
            self.free_chunk_count -= 1;
            self.free_chunks = unsafe { self.free_chunks.add(1) };
            if self.free_chunk_count > 0 {
                let chunk = unsafe { *self.free_chunks };
                self.current_object = chunk;
                self.current_limit = unsafe { chunk.cast::<u8>().add(chunk_size(chunk)) };
            } else {
                self.current_object = ptr::null_mut();
                self.current_limit = ptr::null_mut();
                return None;
            }
        }
    }

    unsafe fn get_available_chunk(&mut self, size: usize) -> *mut Record {
        if let Some(chunk) = unsafe { self.find_available_chunk(size) } {
            return chunk;
        }
        unsafe {
            self.collect_garbage(size + mem::size_of::<Record>());
        }
        match unsafe { self.find_available_chunk(size) } {
            Some(chunk) => chunk,
            None => fatal(format_args!(
                "Out of memory: no chunk of {size} bytes after a full collection"
            )),
        }
    }
}
