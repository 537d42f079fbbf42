//! Collection cycle orchestration: all mark work, then all sweep work,
//! then metrics, inline on the allocating thread.

pub(crate) mod mark;
pub(crate) mod sweep;
pub(crate) mod tracing;
pub(crate) mod worklist;

use crate::heap::{make_empty, Heap};
use crate::metrics::GcMetrics;
use crate::runtime::Runtime;

impl<R: Runtime> Heap<R> {
    /// Forces a full stop-the-world collection.
    ///
    /// # Safety
    ///
    /// Every live reference must be visible through the runtime's root
    /// table or shadow stack; no references outside them may be held
    /// across this call.
    pub unsafe fn collect(&mut self) {
        unsafe {
            self.collect_garbage(0);
        }
    }

    /// Runs one cycle sized to the allocation request that triggered it.
    pub(crate) unsafe fn collect_garbage(&mut self, size_to_allocate: usize) {
        let gc_id = crate::gc::tracing::internal::next_gc_id();
        #[cfg(feature = "tracing")]
        let _span = crate::gc::tracing::internal::trace_collection(gc_id, size_to_allocate);
        #[cfg(not(feature = "tracing"))]
        let _ = gc_id;

        let started = self.runtime.current_time_millis();

        // The allocator seals the bump window before it asks for a cycle;
        // a forced cycle must seal it here or the sweep would misparse
        // the headerless window.
        if !self.current_object.is_null() {
            let window = self.current_limit as usize - self.current_object as usize;
            unsafe {
                make_empty(self.current_object, window);
            }
        }

        let outcome = unsafe {
            let pieces = self.mark();
            self.sweep(size_to_allocate, &pieces)
        };
        let finished = self.runtime.current_time_millis();

        self.collections += 1;
        self.metrics = GcMetrics {
            duration_ms: finished - started,
            reclaimed_bytes: outcome.reclaimed,
            max_free_chunk: outcome.max_free_chunk,
            free_chunks: self.free_chunk_count,
            heap_size: self.heap_size(),
            grown_bytes: outcome.grown,
            total_collections: self.collections,
        };

        #[cfg(feature = "tracing")]
        crate::gc::tracing::internal::log_cycle_complete(
            gc_id,
            self.metrics.duration_ms,
            outcome.reclaimed,
        );
    }
}
