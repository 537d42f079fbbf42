//! Shared test harness.
//!
//! Builds a fake code image in a mapping placed low in the address space,
//! so class addresses compress into record tags the way the compiler's
//! image layout guarantees, and provides a [`TestRuntime`] with a mutable
//! global root table and hand-built shadow frames.

#![allow(dead_code)]

use std::cell::{Cell, RefCell, UnsafeCell};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use loam_gc::{
    ArrayClasses, CallSite, Class, FieldLayout, GcRef, Runtime, StackFrame, StackRoots,
};
use sys_mmap::MmapOptions;

/// Root-slot capacity; slots must not move once handed to the collector.
pub const MAX_ROOTS: usize = 4096;

const IMAGE_LEN: usize = 1 << 20;
const IMAGE_BASE: usize = 0x3000_0000;
const IMAGE_STRIDE: usize = 1 << 24;

/// A fake code image: class descriptors and field tables at addresses low
/// enough for the compressed-class encoding.
pub struct CodeImage {
    mapping: sys_mmap::Mmap,
    cursor: Cell<usize>,
    next_interval: Cell<u32>,
    classes: ArrayClasses,
}

impl CodeImage {
    pub fn new() -> Self {
        static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);
        for _ in 0..64 {
            let slot = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
            let hint = IMAGE_BASE + slot * IMAGE_STRIDE;
            let mapping = unsafe {
                MmapOptions::new()
                    .len(IMAGE_LEN)
                    .hint(hint)
                    .strict(true)
                    .map_anon()
            };
            if let Ok(mapping) = mapping {
                let mut image = Self {
                    mapping,
                    cursor: Cell::new(0),
                    next_interval: Cell::new(1),
                    classes: ArrayClasses {
                        array: ptr::null(),
                        boolean: ptr::null(),
                        byte: ptr::null(),
                        short: ptr::null(),
                        char: ptr::null(),
                        int: ptr::null(),
                        long: ptr::null(),
                        float: ptr::null(),
                        double: ptr::null(),
                    },
                };
                image.classes = ArrayClasses {
                    array: image.class(24, &[], ptr::null()),
                    boolean: image.class(16, &[], ptr::null()),
                    byte: image.class(16, &[], ptr::null()),
                    short: image.class(16, &[], ptr::null()),
                    char: image.class(16, &[], ptr::null()),
                    int: image.class(16, &[], ptr::null()),
                    long: image.class(16, &[], ptr::null()),
                    float: image.class(16, &[], ptr::null()),
                    double: image.class(16, &[], ptr::null()),
                };
                return image;
            }
        }
        panic!("could not map a low-address code image");
    }

    /// The array class and primitive element classes of this image.
    pub fn array_classes(&self) -> ArrayClasses {
        self.classes
    }

    /// Emits a class descriptor with a fresh subtype interval. `size` is
    /// the allocation size including the 12-byte record header; `offsets`
    /// are the byte offsets of reference fields.
    pub fn class(&self, size: u32, offsets: &[u32], parent: *const Class) -> *const Class {
        let interval = self.next_interval.get();
        self.next_interval.set(interval + 1);
        self.class_with_interval(size, offsets, parent, interval, interval)
    }

    /// Emits a class descriptor with an explicit subtype interval, for
    /// unwinder tests.
    pub fn class_with_interval(
        &self,
        size: u32,
        offsets: &[u32],
        parent: *const Class,
        tag: u32,
        upper_tag: u32,
    ) -> *const Class {
        let offsets_ptr = if offsets.is_empty() {
            ptr::null()
        } else {
            let table = self
                .alloc(offsets.len() * mem::size_of::<u32>(), mem::align_of::<u32>())
                .cast::<u32>();
            unsafe {
                ptr::copy_nonoverlapping(offsets.as_ptr(), table, offsets.len());
            }
            table.cast_const()
        };

        let class = self.alloc(mem::size_of::<Class>(), 8).cast::<Class>();
        unsafe {
            class.write(Class {
                size,
                flags: 0,
                tag,
                upper_tag,
                magic: Class::magic_for(tag),
                fields: FieldLayout {
                    parent,
                    count: offsets.len() as u32,
                    offsets: offsets_ptr,
                },
            });
        }
        class.cast_const()
    }

    fn alloc(&self, len: usize, align: usize) -> *mut u8 {
        let cursor = (self.cursor.get() + align - 1) & !(align - 1);
        assert!(cursor + len <= IMAGE_LEN, "code image exhausted");
        self.cursor.set(cursor + len);
        unsafe { self.mapping.ptr().add(cursor) }
    }
}

struct RootTable {
    slots: Vec<GcRef>,
    ptrs: Vec<*mut GcRef>,
}

struct CallSiteEntry {
    site: Box<CallSite>,
    _handlers: Box<[*const Class]>,
}

/// Runtime environment backed by plain vectors: a growable global root
/// table, a settable shadow-stack head, and registered call sites.
pub struct TestRuntime {
    classes: ArrayClasses,
    roots: RefCell<RootTable>,
    table: UnsafeCell<StackRoots>,
    stack_top: Cell<*mut StackFrame>,
    call_sites: RefCell<Vec<CallSiteEntry>>,
}

impl TestRuntime {
    pub fn new(image: &CodeImage) -> Self {
        Self {
            classes: image.array_classes(),
            roots: RefCell::new(RootTable {
                slots: Vec::with_capacity(MAX_ROOTS),
                ptrs: Vec::with_capacity(MAX_ROOTS),
            }),
            table: UnsafeCell::new(StackRoots {
                size: 0,
                data: ptr::null(),
            }),
            stack_top: Cell::new(ptr::null_mut()),
            call_sites: RefCell::new(Vec::new()),
        }
    }

    /// The image's array classes, for element-type assertions.
    pub fn classes(&self) -> ArrayClasses {
        self.classes
    }

    /// Adds a global root slot holding `object`; returns the slot index.
    pub fn add_root(&self, object: GcRef) -> usize {
        let mut roots = self.roots.borrow_mut();
        assert!(
            roots.slots.len() < MAX_ROOTS,
            "root table capacity exhausted"
        );
        roots.slots.push(object);
        let index = roots.slots.len() - 1;
        let slot = ptr::addr_of_mut!(roots.slots[index]);
        roots.ptrs.push(slot);
        index
    }

    /// Overwrites the root slot at `index`.
    pub fn set_root(&self, index: usize, object: GcRef) {
        self.roots.borrow_mut().slots[index] = object;
    }

    /// Empties the global root table.
    pub fn clear_roots(&self) {
        let mut roots = self.roots.borrow_mut();
        roots.slots.clear();
        roots.ptrs.clear();
    }

    /// Installs the shadow-stack head.
    pub fn set_stack_top(&self, frame: *mut StackFrame) {
        self.stack_top.set(frame);
    }

    /// Registers a call site with the given handler classes; returns its
    /// id. A null handler entry is a catch-all.
    pub fn add_call_site(&self, handlers: &[*const Class]) -> i32 {
        let mut sites = self.call_sites.borrow_mut();
        let handlers: Box<[*const Class]> = handlers.into();
        let site = Box::new(CallSite {
            handler_count: handlers.len() as u32,
            exception_types: handlers.as_ptr(),
        });
        let id = sites.len() as i32;
        sites.push(CallSiteEntry {
            site,
            _handlers: handlers,
        });
        id
    }
}

unsafe impl Runtime for &TestRuntime {
    fn stack_top(&self) -> *mut StackFrame {
        self.stack_top.get()
    }

    fn stack_roots(&self) -> *mut StackRoots {
        let roots = self.roots.borrow();
        unsafe {
            (*self.table.get()).size = roots.ptrs.len() as u32;
            (*self.table.get()).data = roots.ptrs.as_ptr();
        }
        self.table.get()
    }

    fn call_site(&self, id: i32) -> *const CallSite {
        let sites = self.call_sites.borrow();
        ptr::addr_of!(*sites[id as usize].site)
    }

    fn array_classes(&self) -> ArrayClasses {
        self.classes
    }

    fn current_time_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_millis() as i64
    }
}

/// A shadow-stack frame in test-owned storage: the frame header followed
/// by its reference slots.
pub struct TestFrame {
    storage: Vec<u64>,
}

impl TestFrame {
    pub fn new(references: &[GcRef], next: *mut StackFrame) -> Self {
        let header_words = mem::size_of::<StackFrame>() / mem::size_of::<u64>();
        let mut storage = vec![0u64; header_words + references.len()];
        let frame = storage.as_mut_ptr().cast::<StackFrame>();
        unsafe {
            (*frame).size = references.len() as u32;
            (*frame).call_site_id = 0;
            (*frame).next = next;
            let slots = StackFrame::references(frame);
            for (i, &reference) in references.iter().enumerate() {
                *slots.add(i) = reference;
            }
        }
        Self { storage }
    }

    pub fn frame(&self) -> *mut StackFrame {
        self.storage.as_ptr().cast_mut().cast::<StackFrame>()
    }

    pub fn call_site_id(&self) -> i32 {
        unsafe { (*self.frame()).call_site_id }
    }

    pub fn set_call_site_id(&self, id: i32) {
        unsafe {
            (*self.frame()).call_site_id = id;
        }
    }
}

/// Reads the reference field at byte offset `offset` of a record.
pub unsafe fn get_field(object: GcRef, offset: usize) -> GcRef {
    unsafe { *object.cast::<u8>().add(offset).cast::<GcRef>() }
}

/// Writes the reference field at byte offset `offset` of a record.
pub unsafe fn set_field(object: GcRef, offset: usize, value: GcRef) {
    unsafe {
        *object.cast::<u8>().add(offset).cast::<GcRef>() = value;
    }
}

/// Reads a 64-bit payload word at byte offset `offset` of a record.
pub unsafe fn get_word(object: GcRef, offset: usize) -> u64 {
    unsafe { *object.cast::<u8>().add(offset).cast::<u64>() }
}

/// Writes a 64-bit payload word at byte offset `offset` of a record.
pub unsafe fn set_word(object: GcRef, offset: usize, value: u64) {
    unsafe {
        *object.cast::<u8>().add(offset).cast::<u64>() = value;
    }
}

/// Asserts that `object` is a live record of the given tag (mark bit
/// clear, class intact).
pub unsafe fn assert_live(object: GcRef, tag: u32) {
    unsafe {
        assert_eq!((*object).tag, tag, "object {object:p} lost its tag");
    }
}
