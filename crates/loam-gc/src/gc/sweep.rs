//! The sweep phase: one linear pass over the heap, plus the growth
//! decision it feeds.
//!
//! The walk visits records in heap order, clears mark bits on survivors,
//! coalesces every maximal run of dead and free records into a single
//! free record, and appends each run to a fresh free-chunk index in
//! scratch. Pieces the mark phase saw no live object in are leapt over
//! wholesale via the sweep-piece index. Afterwards the growth controller
//! decides whether the cycle freed enough, the index is sorted by chunk
//! size, and the smallest chunk becomes the new bump window.

use std::mem;
use std::ptr;
use std::slice;

use crate::gc::mark::{SweepPieces, EMPTY_PIECE};
use crate::heap::{chunk_size, make_empty, Heap, SWEEP_PIECE_SIZE};
use crate::layout::{GcRef, Record, MARK_BIT, TAG_FREE, TAG_FREE_WORD};
use crate::runtime::Runtime;

/// What a sweep observed and did, for the cycle metrics.
pub(crate) struct SweepOutcome {
    pub(crate) reclaimed: usize,
    pub(crate) max_free_chunk: usize,
    pub(crate) grown: usize,
}

impl<R: Runtime> Heap<R> {
    /// Sweeps the heap and installs a fresh bump window. `size_to_allocate`
    /// is the request that triggered the cycle (0 for a forced cycle) and
    /// drives the growth decision.
    ///
    /// # Safety
    ///
    /// Must run directly after [`mark`](Self::mark) with its piece index;
    /// every reachable record carries the mark bit.
    pub(crate) unsafe fn sweep(
        &mut self,
        size_to_allocate: usize,
        pieces: &SweepPieces,
    ) -> SweepOutcome {
        #[cfg(feature = "tracing")]
        let _span = crate::gc::tracing::internal::trace_phase(crate::gc::tracing::internal::GcPhase::Sweep);

        // The index grows at the scratch cursor, entry by entry.
        self.free_chunks = self.extra.cast::<GcRef>();
        self.free_chunk_count = 0;

        let heap_size = self.heap_size();
        let mut object = self.pool.cast::<Record>();
        let mut last_free: *mut Record = ptr::null_mut();
        let mut reclaimed = 0usize;
        let mut max_free_chunk = 0usize;
        let mut piece_end = unsafe { self.pool.add(SWEEP_PIECE_SIZE) };

        'walk: while object.cast::<u8>() < self.limit {
            let mut tag = unsafe { (*object).tag };
            let free = if tag == TAG_FREE || tag == TAG_FREE_WORD {
                true
            } else {
                let marked = tag & MARK_BIT != 0;
                if marked {
                    tag &= !MARK_BIT;
                    unsafe {
                        (*object).tag = tag;
                    }
                }
                !marked
            };

            if free {
                if last_free.is_null() {
                    last_free = object;
                }

                if object.cast::<u8>() >= piece_end {
                    let mut piece = (object as usize - self.pool as usize) / SWEEP_PIECE_SIZE;
                    if unsafe { *pieces.data.add(piece) } == EMPTY_PIECE {
                        // Leap over every piece the mark phase saw no
                        // live object in, resuming at the first live
                        // offset of the next populated piece.
                        loop {
                            piece += 1;
                            if piece == pieces.count {
                                object = self.limit.cast::<Record>();
                                break 'walk;
                            }
                            if unsafe { *pieces.data.add(piece) } != EMPTY_PIECE {
                                break;
                            }
                        }
                        let resume = unsafe {
                            *pieces.data.add(piece) as usize + piece * SWEEP_PIECE_SIZE
                        };
                        object = unsafe { self.pool.add(resume) }.cast::<Record>();
                        piece_end = unsafe { self.pool.add((piece + 1) * SWEEP_PIECE_SIZE) };
                        continue 'walk;
                    }
                    piece_end = unsafe { self.pool.add((piece + 1) * SWEEP_PIECE_SIZE) };
                }
            } else if !last_free.is_null() {
                let run = object as usize - last_free as usize;
                unsafe {
                    make_empty(last_free, run);
                    self.push_free_chunk(last_free);
                }
                reclaimed += run;
                if max_free_chunk < run {
                    max_free_chunk = run;
                }
                last_free = ptr::null_mut();
            }

            let size = unsafe { self.record_size(tag, object) };
            #[cfg(feature = "heap-assert")]
            unsafe {
                self.assert_sweepable(object, tag, size);
            }
            object = unsafe { object.cast::<u8>().add(size) }.cast::<Record>();
        }

        // Close a trailing free run. `last_free` deliberately stays set:
        // the growth step below absorbs fresh pages into this run.
        if !last_free.is_null() {
            let run = object as usize - last_free as usize;
            unsafe {
                make_empty(last_free, run);
                self.push_free_chunk(last_free);
            }
            reclaimed += run;
            if max_free_chunk < run {
                max_free_chunk = run;
            }
        }

        let mut grown = 0usize;
        let starved = (reclaimed as i64) - (size_to_allocate as i64) < (heap_size as i64) / 2;
        if starved || max_free_chunk < size_to_allocate {
            grown = self.grow_heap(size_to_allocate);
            if grown > 0 {
                // Growing moved the scratch region, and the index with it.
                self.free_chunks = self.free_chunks.cast::<u8>().wrapping_add(grown).cast::<GcRef>();
                if last_free.is_null() {
                    let fresh = self.limit.wrapping_sub(grown).cast::<Record>();
                    unsafe {
                        make_empty(fresh, grown);
                        self.push_free_chunk(fresh);
                    }
                } else if unsafe { (*last_free).tag } == TAG_FREE_WORD {
                    // A one-word trailing run can only arise from 4-aligned
                    // class sizes; absorbing the fresh pages turns it into
                    // a sized record.
                    unsafe {
                        (*last_free).tag = TAG_FREE;
                        (*last_free).size = (mem::size_of::<u32>() + grown) as u32;
                    }
                } else {
                    unsafe {
                        (*last_free).size += grown as u32;
                    }
                }
            }
        }

        unsafe {
            let chunks = slice::from_raw_parts_mut(self.free_chunks, self.free_chunk_count);
            chunks.sort_unstable_by_key(|&chunk| unsafe { chunk_size(chunk) });
        }

        if self.free_chunk_count > 0 {
            let first = unsafe { *self.free_chunks };
            self.current_object = first;
            self.current_limit = unsafe { first.cast::<u8>().add(chunk_size(first)) };
        } else {
            self.current_object = ptr::null_mut();
            self.current_limit = ptr::null_mut();
        }

        // The piece index and the index storage are released together;
        // the free-chunk entries live on in released scratch until the
        // next cycle rebuilds them.
        self.release_scratch();

        SweepOutcome {
            reclaimed,
            max_free_chunk,
            grown,
        }
    }

    /// Appends one entry to the free-chunk index being built in scratch.
    unsafe fn push_free_chunk(&mut self, chunk: *mut Record) {
        let _ = self.alloc_scratch(mem::size_of::<GcRef>());
        unsafe {
            *self.free_chunks.add(self.free_chunk_count) = chunk;
        }
        self.free_chunk_count += 1;
    }

    #[cfg(feature = "heap-assert")]
    unsafe fn assert_sweepable(&self, object: *mut Record, tag: u32, size: usize) {
        use crate::heap::fatal;

        let end = object as usize + size;
        if end > self.limit as usize {
            fatal(format_args!(
                "heap corruption: record {object:p} (tag {tag:#x}, {size} bytes) extends past the heap limit"
            ));
        }
        // Sizing the successor early catches a corrupt neighbor before
        // the walk strays.
        if end < self.limit as usize {
            let next = end as *const Record;
            unsafe {
                let _ = self.record_size((*next).tag & !MARK_BIT, next);
            }
        }
    }
}
