//! Collection metrics.

/// Statistics from the most recent collection cycle.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Wall-clock duration of the cycle in milliseconds.
    pub duration_ms: i64,
    /// Bytes of free space found by the sweep, after coalescing.
    pub reclaimed_bytes: usize,
    /// Largest single free chunk found by the sweep.
    pub max_free_chunk: usize,
    /// Number of entries in the rebuilt free-chunk index.
    pub free_chunks: usize,
    /// Heap size after the cycle, including any growth.
    pub heap_size: usize,
    /// Bytes the heap grew by during the cycle, 0 if it did not grow.
    pub grown_bytes: usize,
    /// Total collections since the heap was initialized.
    pub total_collections: u64,
}

impl GcMetrics {
    /// Creates a `GcMetrics` with all fields zeroed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration_ms: 0,
            reclaimed_bytes: 0,
            max_free_chunk: 0,
            free_chunks: 0,
            heap_size: 0,
            grown_bytes: 0,
            total_collections: 0,
        }
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}
