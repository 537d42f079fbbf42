//! Heap layout, scratch region, and the growth policy.
//!
//! The heap is one contiguous byte range `[pool, limit)` tiled end-to-end
//! by records. Immediately after it lives the *scratch* region
//! `[limit, mmap_limit)`, a bump-allocated area for collector metadata
//! (free-chunk index, sweep-piece index, mark worklist) that is released
//! by rewinding its cursor. Growing the heap maps fresh pages at
//! `mmap_limit` and slides the live scratch bytes forward so both regions
//! stay contiguous and adjacent.

use std::backtrace::Backtrace;
use std::fmt;
use std::mem;
use std::process;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use sys_mmap::{Mmap, MmapOptions};

use crate::layout::{
    align8, class_to_tag, find_class, Array, GcRef, Record, MARK_BIT, TAG_FREE, TAG_FREE_WORD,
};
use crate::metrics::GcMetrics;
use crate::runtime::{ArrayClasses, Runtime};

/// Default initial heap size.
pub const INITIAL_HEAP_SIZE: usize = 256 * 1024;

/// Default bound on total heap growth.
pub const HEAP_LIMIT: usize = 1024 * 1024 * 1024;

/// Size of one sweep piece, the indexing unit of the mark-time index that
/// lets the sweep leap over regions with no live objects.
pub const SWEEP_PIECE_SIZE: usize = 16384;

#[cfg(target_pointer_width = "64")]
const DEFAULT_BASE_HINT: usize = 0x6000_0000_0000;
#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_BASE_HINT: usize = 0x4000_0000;

/// Heap sizing parameters.
///
/// `heap_limit` must stay below 4 GiB: record sizes are 32-bit.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Initial heap size; rounded up to the page size at init.
    pub initial_heap_size: usize,
    /// Bound on total heap growth. Also determines the single-step growth
    /// cap, `heap_limit / 64` rounded down to the page size.
    pub heap_limit: usize,
    /// Address hint for the heap base. The heap grows upward from here;
    /// pass 0 to let the kernel choose (growth may then collide with
    /// neighboring mappings).
    pub base_hint: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_heap_size: INITIAL_HEAP_SIZE,
            heap_limit: HEAP_LIMIT,
            base_hint: DEFAULT_BASE_HINT,
        }
    }
}

/// Record and byte counts from a full heap walk; see [`Heap::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Number of live records.
    pub live_records: usize,
    /// Number of free records (the untouched part of the bump window is
    /// counted in `free_bytes` but not here).
    pub free_records: usize,
    /// Bytes occupied by live records.
    pub live_bytes: usize,
    /// Bytes in free records and the bump window.
    pub free_bytes: usize,
}

/// The collector: heap, scratch region, bump cursor, and free-chunk index,
/// all owned by one value and threaded explicitly through the runtime.
pub struct Heap<R: Runtime> {
    pub(crate) runtime: R,
    pub(crate) page_size: usize,
    pub(crate) heap_limit: usize,
    pub(crate) max_gc_grow: usize,
    pub(crate) pool: *mut u8,
    pub(crate) limit: *mut u8,
    pub(crate) extra: *mut u8,
    pub(crate) mmap_limit: *mut u8,
    pub(crate) current_object: *mut Record,
    pub(crate) current_limit: *mut u8,
    pub(crate) free_chunks: *mut GcRef,
    pub(crate) free_chunk_count: usize,
    pub(crate) array_classes: ArrayClasses,
    pub(crate) array_tag: u32,
    pub(crate) segments: Vec<Mmap>,
    pub(crate) metrics: GcMetrics,
    pub(crate) collections: u64,
}

impl<R: Runtime> Heap<R> {
    /// Maps the initial heap and turns it into a single free record.
    ///
    /// Must be called exactly once per heap before any allocation. Aborts
    /// the process if the initial mapping cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if `config.heap_limit` does not fit a 32-bit record size.
    pub fn init(config: HeapConfig, runtime: R) -> Self {
        assert!(
            config.heap_limit < u32::MAX as usize,
            "heap_limit must stay below 4 GiB"
        );

        let page_size = sys_mmap::page_size();
        let aligned_heap_size = config.initial_heap_size.div_ceil(page_size) * page_size;
        let base = reserve_base(config.base_hint, config.heap_limit);

        let mapping = unsafe { MmapOptions::new().len(aligned_heap_size).hint(base).map_anon() };
        let mapping = match mapping {
            Ok(mapping) => mapping,
            Err(err) => fatal(format_args!(
                "could not initialize a {aligned_heap_size} byte heap: {err}"
            )),
        };

        let pool = mapping.ptr();
        let limit = unsafe { pool.add(aligned_heap_size) };
        let array_classes = runtime.array_classes();
        let array_tag = class_to_tag(array_classes.array);

        let mut heap = Self {
            runtime,
            page_size,
            heap_limit: config.heap_limit,
            max_gc_grow: config.heap_limit / 64 / page_size * page_size,
            pool,
            limit,
            extra: limit,
            mmap_limit: limit,
            current_object: pool.cast::<Record>(),
            current_limit: limit,
            free_chunks: ptr::null_mut(),
            free_chunk_count: 0,
            array_classes,
            array_tag,
            segments: vec![mapping],
            metrics: GcMetrics::new(),
            collections: 0,
        };

        unsafe {
            let root = heap.current_object;
            (*root).tag = TAG_FREE;
            (*root).size = aligned_heap_size as u32;

            heap.free_chunks = heap.alloc_scratch(mem::size_of::<GcRef>()).cast::<GcRef>();
            *heap.free_chunks = root;
            heap.free_chunk_count = 1;
        }

        heap
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.limit as usize - self.pool as usize
    }

    /// First byte of the heap.
    #[must_use]
    pub fn heap_base(&self) -> *const u8 {
        self.pool.cast_const()
    }

    /// One past the last byte of the heap.
    #[must_use]
    pub fn heap_end(&self) -> *const u8 {
        self.limit.cast_const()
    }

    /// Current bump-allocation cursor, or null when no chunk is loaded.
    #[must_use]
    pub fn bump_cursor(&self) -> *const u8 {
        self.current_object.cast_const().cast::<u8>()
    }

    /// Number of entries remaining in the free-chunk index.
    #[must_use]
    pub const fn free_chunk_count(&self) -> usize {
        self.free_chunk_count
    }

    /// System page size the heap was initialized with.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Metrics from the most recent collection cycle.
    #[must_use]
    pub const fn last_gc_metrics(&self) -> GcMetrics {
        self.metrics
    }

    // ------------------------------------------------------------------
    // Scratch region
    // ------------------------------------------------------------------

    /// Bump-allocates from the scratch region, mapping further pages at
    /// `mmap_limit` when the region is exhausted. Aborts on mapping
    /// failure.
    pub(crate) fn alloc_scratch(&mut self, size: usize) -> *mut u8 {
        let next = self.extra.wrapping_add(size);
        if next > self.mmap_limit {
            let requested = (size / self.page_size + 1) * self.page_size;
            let mapping = unsafe {
                MmapOptions::new()
                    .len(requested)
                    .hint(self.mmap_limit as usize)
                    .strict(true)
                    .map_anon()
            };
            match mapping {
                Ok(mapping) => {
                    self.segments.push(mapping);
                    self.mmap_limit = self.mmap_limit.wrapping_add(requested);
                }
                Err(err) => fatal(format_args!(
                    "could not allocate collector scratch memory ({requested} bytes): {err}"
                )),
            }
        }
        let result = self.extra;
        self.extra = next;
        result
    }

    /// Rewinds the scratch cursor to `to`, releasing everything allocated
    /// at or above it. `to` must be a value previously obtained from the
    /// cursor.
    pub(crate) fn rewind_scratch(&mut self, to: *mut u8) {
        debug_assert!(to >= self.limit && to <= self.extra);
        self.extra = to;
    }

    /// Releases the whole scratch region.
    pub(crate) fn release_scratch(&mut self) {
        self.extra = self.limit;
    }

    // ------------------------------------------------------------------
    // Growth
    // ------------------------------------------------------------------

    /// Grows the heap by `size` rounded up to whole pages, keeping the
    /// scratch region adjacent by sliding its live bytes forward. Returns
    /// the number of bytes mapped. Aborts if the pages cannot be mapped at
    /// the end of the current range.
    fn grow_heap_by(&mut self, size: usize) -> usize {
        let requested = (size - 1) / self.page_size * self.page_size + self.page_size;
        let mapping = unsafe {
            MmapOptions::new()
                .len(requested)
                .hint(self.mmap_limit as usize)
                .strict(true)
                .map_anon()
        };
        match mapping {
            Ok(mapping) => self.segments.push(mapping),
            Err(err) => fatal(format_args!(
                "could not grow heap by {requested} bytes: {err}"
            )),
        }

        // The pointer shifts cross into the fresh mapping, hence the
        // wrapping arithmetic.
        let scratch_len = self.extra as usize - self.limit as usize;
        unsafe {
            if scratch_len > 0 {
                ptr::copy(self.limit, self.limit.wrapping_add(requested), scratch_len);
            }
        }
        self.limit = self.limit.wrapping_add(requested);
        self.extra = self.extra.wrapping_add(requested);
        self.mmap_limit = self.mmap_limit.wrapping_add(requested);

        #[cfg(feature = "tracing")]
        crate::gc::tracing::internal::log_heap_grown(requested, self.heap_size());

        requested
    }

    /// Growth-policy entry point: grows by an eighth of the heap, capped
    /// by the single-step limit, raised to `at_least`, and clamped to the
    /// remaining `heap_limit` budget. Returns 0 when the budget is spent.
    pub(crate) fn grow_heap(&mut self, at_least: usize) -> usize {
        let heap_size = self.heap_size();
        let budget = self.heap_limit.saturating_sub(heap_size) / self.page_size * self.page_size;
        let grow_by = growth_request(heap_size, self.max_gc_grow, at_least, budget);
        if grow_by == 0 {
            return 0;
        }
        self.grow_heap_by(grow_by)
    }

    // ------------------------------------------------------------------
    // Record sizes
    // ------------------------------------------------------------------

    /// Byte size of the record at `record` whose tag is `tag`. The tag is
    /// passed separately so the sweep can size records after stripping the
    /// mark bit.
    ///
    /// # Safety
    ///
    /// `record` must point at a record header consistent with `tag`.
    pub(crate) unsafe fn record_size(&self, tag: u32, record: *const Record) -> usize {
        match tag {
            TAG_FREE => unsafe { (*record).size as usize },
            TAG_FREE_WORD => mem::size_of::<u32>(),
            tag if tag == self.array_tag => unsafe { self.array_size(record.cast::<Array>()) },
            tag => {
                let class = find_class(tag);
                #[cfg(feature = "heap-assert")]
                unsafe {
                    if !(*class).is_valid() {
                        fatal(format_args!(
                            "heap corruption: record {record:p} (tag {tag:#x}) does not decode to a class"
                        ));
                    }
                }
                unsafe { (*class).instance_size() }
            }
        }
    }

    /// Total byte size of an array record: header, dimension byte in the
    /// sentinel slot, elements, rounded up to record alignment.
    ///
    /// # Safety
    ///
    /// `array` must point at a live array record.
    pub(crate) unsafe fn array_size(&self, array: *const Array) -> usize {
        let depth = unsafe { Array::depth(array) };
        let count = unsafe { (*array).record.size } as usize;
        let elem_size = if depth == 0 {
            let element_type = unsafe { (*array).element_type };
            let classes = &self.array_classes;
            if element_type == classes.boolean || element_type == classes.byte {
                1
            } else if element_type == classes.short || element_type == classes.char {
                2
            } else if element_type == classes.int || element_type == classes.float {
                4
            } else if element_type == classes.long || element_type == classes.double {
                8
            } else {
                mem::size_of::<GcRef>()
            }
        } else {
            // elements of a multi-dimensional array are sub-arrays
            mem::size_of::<GcRef>()
        };
        align8(mem::size_of::<Array>() + elem_size * (count + 1))
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Walks the whole heap and checks its structural invariants: records
    /// tile `[pool, limit)` exactly, no record carries a mark bit, the
    /// free-chunk index points at free records in ascending size order.
    /// Returns record and byte counts from the walk.
    ///
    /// The bump window `[current_object, current_limit)` is headerless
    /// once allocation has started in it and is accounted as free bytes.
    ///
    /// # Panics
    ///
    /// Panics on any invariant violation. Diagnostic aid; not intended
    /// for production paths.
    #[allow(clippy::missing_panics_doc)]
    pub fn verify(&self) -> HeapStats {
        let mut stats = HeapStats {
            live_records: 0,
            free_records: 0,
            live_bytes: 0,
            free_bytes: 0,
        };

        unsafe {
            let mut record = self.pool.cast::<Record>();
            while record.cast::<u8>() < self.limit {
                if record == self.current_object {
                    // An untouched chunk still has an intact free header
                    // covering the window and parses below; otherwise the
                    // window contents are stale and must be skipped.
                    let window = self.current_limit as usize - record as usize;
                    let tag = (*record).tag;
                    let intact = (tag == TAG_FREE || tag == TAG_FREE_WORD)
                        && self.record_size(tag, record) == window;
                    if !intact {
                        stats.free_bytes += window;
                        record = self.current_limit.cast::<Record>();
                        continue;
                    }
                }

                let tag = (*record).tag;
                assert_eq!(tag & MARK_BIT, 0, "mark bit set outside a collection");
                let size = self.record_size(tag, record);
                assert!(size > 0, "zero-sized record at {record:p}");
                if tag == TAG_FREE || tag == TAG_FREE_WORD {
                    stats.free_records += 1;
                    stats.free_bytes += size;
                } else {
                    stats.live_records += 1;
                    stats.live_bytes += size;
                }
                let next = record.cast::<u8>().add(size);
                assert!(
                    next <= self.limit,
                    "record at {record:p} extends past the heap limit"
                );
                record = next.cast::<Record>();
            }
            assert_eq!(
                record.cast::<u8>(),
                self.limit,
                "heap walk did not land on the limit"
            );

            if self.free_chunk_count > 0 {
                let chunks = std::slice::from_raw_parts(self.free_chunks, self.free_chunk_count);
                for (i, &chunk) in chunks.iter().enumerate() {
                    let addr = chunk as usize;
                    assert!(
                        addr >= self.pool as usize && addr < self.limit as usize,
                        "free-chunk entry {i} points outside the heap"
                    );
                    // entry 0 backs the bump window and may be consumed
                    if i == 0 {
                        continue;
                    }
                    let tag = (*chunk).tag;
                    assert!(
                        tag == TAG_FREE || tag == TAG_FREE_WORD,
                        "free-chunk entry {i} is not a free record"
                    );
                }
                for pair in chunks.windows(2).skip(1) {
                    assert!(
                        chunk_size(pair[0]) <= chunk_size(pair[1]),
                        "free-chunk index is not sorted by size"
                    );
                }
            }
        }

        stats
    }
}

/// Writes a free-record header: one-word tag for a 4-byte gap, a sized
/// header for 8 bytes and up, nothing for an empty gap.
///
/// # Safety
///
/// `record` must point at `size` writable heap bytes.
pub(crate) unsafe fn make_empty(record: *mut Record, size: usize) {
    debug_assert!(
        size == 0 || size == 4 || (size >= 8 && size % 8 == 0),
        "free record of {size} bytes is not representable"
    );
    #[cfg(feature = "heap-assert")]
    if !(size == 0 || size == 4 || (size >= 8 && size % 8 == 0)) {
        fatal(format_args!(
            "heap corruption: free record of {size} bytes is not representable"
        ));
    }
    if size == 0 {
        return;
    }
    unsafe {
        if size == 4 {
            (*record).tag = TAG_FREE_WORD;
        } else {
            (*record).tag = TAG_FREE;
            (*record).size = size as u32;
        }
    }
}

/// Byte size of a free record, honoring the one-word encoding.
///
/// # Safety
///
/// `chunk` must point at a free record's header.
pub(crate) unsafe fn chunk_size(chunk: *const Record) -> usize {
    unsafe {
        if (*chunk).tag == TAG_FREE_WORD {
            mem::size_of::<u32>()
        } else {
            (*chunk).size as usize
        }
    }
}

/// Pure growth-policy arithmetic: an eighth of the heap, capped by the
/// single-step limit, raised to the triggering request, clamped to the
/// remaining budget (already page-aligned).
const fn growth_request(heap_size: usize, max_gc_grow: usize, at_least: usize, budget: usize) -> usize {
    let mut grow_by = heap_size / 8;
    if grow_by > max_gc_grow {
        grow_by = max_gc_grow;
    }
    if grow_by < at_least {
        grow_by = at_least;
    }
    if grow_by > budget {
        grow_by = budget;
    }
    grow_by
}

/// Reserves a distinct base-address range per heap so several heaps in one
/// process do not contend for the same hint.
fn reserve_base(hint: usize, heap_limit: usize) -> usize {
    if hint == 0 {
        return 0;
    }
    static NEXT_OFFSET: AtomicUsize = AtomicUsize::new(0);
    let stride = (heap_limit * 2).max(1 << 24);
    hint + NEXT_OFFSET.fetch_add(stride, Ordering::Relaxed)
}

/// Prints the diagnostic and a native backtrace, then aborts. All three
/// fatal conditions (mapping failure, out of memory, corruption) end here.
pub(crate) fn fatal(message: fmt::Arguments<'_>) -> ! {
    eprintln!("{message}");
    eprintln!("{}", Backtrace::force_capture());
    process::abort()
}
