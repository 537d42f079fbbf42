//! The callback surface the compiled runtime provides to the collector.

use crate::layout::{CallSite, Class, StackFrame, StackRoots};

/// Addresses of the array class and the primitive element classes.
///
/// Queried once at heap initialization and cached; the addresses must be
/// stable for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct ArrayClasses {
    /// The distinguished class identifying array records.
    pub array: *const Class,
    /// Element class of `boolean[]`.
    pub boolean: *const Class,
    /// Element class of `byte[]`.
    pub byte: *const Class,
    /// Element class of `short[]`.
    pub short: *const Class,
    /// Element class of `char[]`.
    pub char: *const Class,
    /// Element class of `int[]`.
    pub int: *const Class,
    /// Element class of `long[]`.
    pub long: *const Class,
    /// Element class of `float[]`.
    pub float: *const Class,
    /// Element class of `double[]`.
    pub double: *const Class,
}

/// Environment callbacks supplied by the compiled runtime.
///
/// The collector is precise: at every allocation (the only safepoint) it
/// discovers live references exclusively through [`stack_roots`] and the
/// shadow-stack chain starting at [`stack_top`]. Registers and the native
/// stack are never scanned.
///
/// # Safety
///
/// Implementations guarantee, for as long as the heap exists:
///
/// - [`stack_roots`] returns a stable pointer to a table whose `data`
///   entries point at valid reference slots; each slot holds null or a
///   pointer to a live record's header. The table's `size` may grow.
/// - [`stack_top`] returns null or a frame whose `next` chain terminates
///   in null, with `size` valid reference slots after each header.
/// - [`array_classes`] returns stable, 8-byte aligned class addresses
///   below 16 GiB whose descriptors outlive the heap.
/// - [`call_site`] returns a valid handler table for every id the
///   compiled code stores into a frame.
///
/// [`stack_roots`]: Runtime::stack_roots
/// [`stack_top`]: Runtime::stack_top
/// [`array_classes`]: Runtime::array_classes
/// [`call_site`]: Runtime::call_site
pub unsafe trait Runtime {
    /// Current head of the shadow stack, or null when no frame is active.
    fn stack_top(&self) -> *mut StackFrame;

    /// The global root table.
    fn stack_roots(&self) -> *mut StackRoots;

    /// Exception metadata for a call-site id. Used by the unwinder only;
    /// the collector itself never calls this.
    fn call_site(&self, id: i32) -> *const CallSite;

    /// The array class and primitive element classes.
    fn array_classes(&self) -> ArrayClasses;

    /// Wall-clock milliseconds. Used only for cycle metrics and tracing.
    fn current_time_millis(&self) -> i64;
}
