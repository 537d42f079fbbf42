//! A precise, stop-the-world, mark-and-sweep collector for a managed
//! runtime whose compiler emits ahead-of-time native code.
//!
//! The compiler arranges that every live reference at a safepoint is
//! discoverable through a global root table or a linked chain of
//! shadow-stack frames, so the collector never scans registers or the
//! native stack conservatively. The heap is one contiguous range tiled by
//! headered records; allocation bumps a cursor through the smallest
//! usable free chunk, and a cache miss runs a full mark-and-sweep cycle
//! inline before retrying once.
//!
//! # Quick start
//!
//! ```ignore
//! use loam_gc::{Heap, HeapConfig, Runtime};
//!
//! // `Env` implements `Runtime`: it exposes the compiler's root table,
//! // shadow stack, and array class addresses.
//! let mut heap = Heap::init(HeapConfig::default(), Env::new());
//!
//! // Tags come from the code image: a class address shifted right by 3.
//! let object = unsafe { heap.alloc(point_tag) };
//! let buffer = unsafe { heap.int_array_alloc(1023) };
//! ```
//!
//! # Structure
//!
//! - [`layout`]: record headers, class descriptors, and stack metadata
//!   shared with compiled code
//! - [`heap`]: the contiguous heap, its scratch region, and the growth
//!   policy
//! - [`runtime`]: the callback surface the compiled runtime implements
//! - [`unwind`]: the exception unwinder (shadow-stack only, not part of
//!   the collector)
//!
//! Single-mutator by design: the allocator is the only safepoint and runs
//! collections synchronously, so there is nothing to lock.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

mod alloc;
mod gc;
mod metrics;

pub mod heap;
pub mod layout;
pub mod runtime;
pub mod unwind;

pub use heap::{Heap, HeapConfig, HeapStats, HEAP_LIMIT, INITIAL_HEAP_SIZE, SWEEP_PIECE_SIZE};
pub use layout::{
    align8, class_to_tag, find_class, Array, CallSite, Class, FieldLayout, GcRef, Record,
    StackFrame, StackRoots, CLASS_SIZE_MASK, MARK_BIT, TAG_FREE, TAG_FREE_WORD,
};
pub use metrics::GcMetrics;
pub use runtime::{ArrayClasses, Runtime};
