//! Exception unwinding over the shadow stack.
//!
//! Not part of the collector: unwinding only reads and rewrites
//! `call_site_id`s in shadow-stack frames, and records the in-flight
//! exception. Handler matching uses the subtype intervals the compiler
//! assigns to classes: a handler covers an exception when its interval
//! encloses the exception class's interval; a null handler entry is a
//! catch-all.

use std::cell::Cell;
use std::ptr;

use crate::layout::{find_class, Record};
use crate::runtime::Runtime;

thread_local! {
    static THROWN: Cell<*mut Record> = const { Cell::new(ptr::null_mut()) };
}

/// Records `exception` as in flight and walks the shadow stack looking
/// for a call site with a matching handler.
///
/// In the frame where a handler matches, `call_site_id` is advanced past
/// the selected handler (`+ index + 1`) and the walk stops; a frame with
/// no match gets its `call_site_id` decremented before moving to the
/// caller. When no frame matches, every frame has been decremented and
/// the exception stays recorded.
///
/// # Safety
///
/// `exception` must point at a live object record, and every frame's
/// `call_site_id` must identify a call site known to the runtime.
pub unsafe fn throw<R: Runtime>(runtime: &R, exception: *mut Record) {
    let exception_type = find_class(unsafe { (*exception).tag });
    THROWN.with(|thrown| thrown.set(exception));

    let mut frame = runtime.stack_top();
    while !frame.is_null() {
        let call_site = runtime.call_site(unsafe { (*frame).call_site_id });
        let handler_types = unsafe { (*call_site).exception_types };
        let handler_count = unsafe { (*call_site).handler_count } as usize;
        for i in 0..handler_count {
            let handler = unsafe { *handler_types.add(i) };
            let matches = handler.is_null()
                || unsafe {
                    (*handler).tag <= (*exception_type).tag
                        && (*handler).upper_tag >= (*exception_type).upper_tag
                };
            if matches {
                unsafe {
                    (*frame).call_site_id += i as i32 + 1;
                }
                return;
            }
        }
        unsafe {
            (*frame).call_site_id -= 1;
            frame = (*frame).next;
        }
    }
}

/// The exception most recently recorded by [`throw`], or null.
#[must_use]
pub fn thrown_exception() -> *mut Record {
    THROWN.with(Cell::get)
}
