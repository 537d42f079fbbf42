//! Collection tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! spans and events for collection cycles. Disabled, it compiles down to
//! stub ids and no code.

#[cfg(feature = "tracing")]
pub(crate) mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// The two phases of a cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum GcPhase {
        /// Trace the live object graph from the roots.
        Mark,
        /// Reclaim unreachable records and rebuild the free-chunk index.
        Sweep,
    }

    /// Stable identifier correlating all events of one collection cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next cycle id.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering an entire collection cycle.
    pub fn trace_collection(gc_id: GcId, size_to_allocate: usize) -> span::EnteredSpan {
        span!(
            Level::DEBUG,
            "gc_collect",
            gc_id = gc_id.0,
            size_to_allocate
        )
        .entered()
    }

    /// Span covering one phase of a cycle.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Event emitted when the heap grows.
    pub fn log_heap_grown(grown: usize, heap_size: usize) {
        tracing::debug!(grown, heap_size, "heap_grown");
    }

    /// Event emitted at the end of a cycle.
    pub fn log_cycle_complete(gc_id: GcId, duration_ms: i64, reclaimed: usize) {
        tracing::debug!(gc_id = gc_id.0, duration_ms, reclaimed, "gc_complete");
    }
}

#[cfg(not(feature = "tracing"))]
pub(crate) mod internal {
    /// Stub cycle id when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub id generator when tracing is disabled.
    pub fn next_gc_id() -> GcId {
        GcId(0)
    }
}
