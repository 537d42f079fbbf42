//! Collection-cycle behavior: reachability, mark/sweep interplay, and
//! cycle idempotence.

mod common;

use std::ptr;

use common::{assert_live, get_field, get_word, set_field, set_word, CodeImage, TestFrame, TestRuntime};
use loam_gc::{class_to_tag, Heap, HeapConfig};

fn config_256k() -> HeapConfig {
    HeapConfig {
        initial_heap_size: 256 * 1024,
        ..HeapConfig::default()
    }
}

#[test]
fn test_unreachable_records_are_swept() {
    let image = CodeImage::new();
    let runtime = TestRuntime::new(&image);
    let mut heap = Heap::init(config_256k(), &runtime);

    let class = image.class(24, &[], ptr::null());
    let tag = class_to_tag(class);

    let mut kept = Vec::new();
    for i in 0..1000 {
        let object = unsafe { heap.alloc(tag) };
        if i % 10 == 0 {
            runtime.add_root(object);
            kept.push(object);
        }
    }

    unsafe { heap.collect() };

    let stats = heap.verify();
    assert_eq!(stats.live_records, 100);
    assert_eq!(stats.live_bytes, 2400);

    let metrics = heap.last_gc_metrics();
    assert!(metrics.reclaimed_bytes >= 21_600);
    assert_eq!(metrics.grown_bytes, 0);
    assert_eq!(heap.heap_size(), 256 * 1024);

    for object in kept {
        unsafe { assert_live(object, tag) };
    }
}

#[test]
fn test_chains_cycles_and_garbage_cycles() {
    let image = CodeImage::new();
    let runtime = TestRuntime::new(&image);
    let mut heap = Heap::init(config_256k(), &runtime);

    // One reference field at offset 16, a payload word at offset 24.
    let node = image.class(32, &[16], ptr::null());
    let tag = class_to_tag(node);

    unsafe {
        // Chain a -> b -> c, rooted at a.
        let a = heap.alloc(tag);
        let b = heap.alloc(tag);
        let c = heap.alloc(tag);
        set_field(a, 16, b);
        set_field(b, 16, c);
        set_word(c, 24, 0xC0FFEE);
        runtime.add_root(a);

        // Cycle x <-> y, rooted at x.
        let x = heap.alloc(tag);
        let y = heap.alloc(tag);
        set_field(x, 16, y);
        set_field(y, 16, x);
        runtime.add_root(x);

        // Garbage cycle, unrooted.
        let g1 = heap.alloc(tag);
        let g2 = heap.alloc(tag);
        set_field(g1, 16, g2);
        set_field(g2, 16, g1);

        heap.collect();

        let stats = heap.verify();
        assert_eq!(stats.live_records, 5);

        assert_live(a, tag);
        assert_eq!(get_field(a, 16), b);
        assert_eq!(get_field(b, 16), c);
        assert_eq!(get_word(c, 24), 0xC0FFEE);
        assert_eq!(get_field(x, 16), y);
        assert_eq!(get_field(y, 16), x);
    }
}

#[test]
fn test_inherited_reference_fields_are_marked() {
    let image = CodeImage::new();
    let runtime = TestRuntime::new(&image);
    let mut heap = Heap::init(config_256k(), &runtime);

    let base = image.class(24, &[16], ptr::null());
    let derived = image.class(40, &[24], base);
    let leaf = image.class(24, &[], ptr::null());
    let derived_tag = class_to_tag(derived);
    let leaf_tag = class_to_tag(leaf);

    unsafe {
        let object = heap.alloc(derived_tag);
        let via_base = heap.alloc(leaf_tag);
        let via_derived = heap.alloc(leaf_tag);
        // Offset 16 is declared by the base class, 24 by the derived one.
        set_field(object, 16, via_base);
        set_field(object, 24, via_derived);
        runtime.add_root(object);

        heap.collect();

        assert_eq!(heap.verify().live_records, 3);
        assert_live(via_base, leaf_tag);
        assert_live(via_derived, leaf_tag);
    }
}

#[test]
fn test_wide_fanout_overflows_worklist_block() {
    let image = CodeImage::new();
    let runtime = TestRuntime::new(&image);
    let mut heap = Heap::init(config_256k(), &runtime);

    // A hub with 600 reference fields pushes past one 512-entry worklist
    // block while marking.
    let offsets: Vec<u32> = (0..600).map(|i| 16 + 8 * i).collect();
    let hub_class = image.class(16 + 600 * 8, &offsets, ptr::null());
    let leaf_class = image.class(24, &[], ptr::null());
    let hub_tag = class_to_tag(hub_class);
    let leaf_tag = class_to_tag(leaf_class);

    unsafe {
        let hub = heap.alloc(hub_tag);
        runtime.add_root(hub);
        for i in 0..600 {
            let leaf = heap.alloc(leaf_tag);
            set_field(hub, 16 + 8 * i, leaf);
        }

        heap.collect();

        let stats = heap.verify();
        assert_eq!(stats.live_records, 601);
        for i in 0..600 {
            assert_live(get_field(hub, 16 + 8 * i), leaf_tag);
        }
    }
}

#[test]
fn test_shadow_frame_roots() {
    let image = CodeImage::new();
    let runtime = TestRuntime::new(&image);
    let mut heap = Heap::init(config_256k(), &runtime);

    let class = image.class(24, &[], ptr::null());
    let tag = class_to_tag(class);

    unsafe {
        let in_outer = heap.alloc(tag);
        let in_inner_a = heap.alloc(tag);
        let in_inner_b = heap.alloc(tag);
        let unreferenced = heap.alloc(tag);
        let _ = unreferenced;

        let outer = TestFrame::new(&[in_outer], ptr::null_mut());
        let inner = TestFrame::new(&[in_inner_a, ptr::null_mut(), in_inner_b], outer.frame());
        runtime.set_stack_top(inner.frame());

        heap.collect();
        assert_eq!(heap.verify().live_records, 3);
        assert_live(in_outer, tag);
        assert_live(in_inner_a, tag);
        assert_live(in_inner_b, tag);

        // Dropping the frames drops the roots.
        runtime.set_stack_top(ptr::null_mut());
        heap.collect();
        assert_eq!(heap.verify().live_records, 0);
    }
}

#[test]
fn test_cleared_root_slot_frees_object() {
    let image = CodeImage::new();
    let runtime = TestRuntime::new(&image);
    let mut heap = Heap::init(config_256k(), &runtime);

    let class = image.class(24, &[], ptr::null());
    let tag = class_to_tag(class);

    unsafe {
        let keep = heap.alloc(tag);
        let drop_me = heap.alloc(tag);
        runtime.add_root(keep);
        let slot = runtime.add_root(drop_me);

        heap.collect();
        assert_eq!(heap.verify().live_records, 2);

        runtime.set_root(slot, ptr::null_mut());
        heap.collect();
        assert_eq!(heap.verify().live_records, 1);
        assert_live(keep, tag);
    }
}

#[test]
fn test_second_collection_is_idempotent() {
    let image = CodeImage::new();
    let runtime = TestRuntime::new(&image);
    let mut heap = Heap::init(config_256k(), &runtime);

    let node = image.class(32, &[16], ptr::null());
    let tag = class_to_tag(node);

    unsafe {
        for i in 0..500 {
            let object = heap.alloc(tag);
            if i % 7 == 0 {
                runtime.add_root(object);
            }
        }

        heap.collect();
        let stats_first = heap.verify();
        let chunks_first = heap.free_chunk_count();
        let cursor_first = heap.bump_cursor();
        let reclaimed_first = heap.last_gc_metrics().reclaimed_bytes;

        heap.collect();
        let stats_second = heap.verify();

        assert_eq!(stats_first, stats_second);
        assert_eq!(heap.free_chunk_count(), chunks_first);
        assert_eq!(heap.bump_cursor(), cursor_first);
        assert_eq!(heap.last_gc_metrics().reclaimed_bytes, reclaimed_first);
        assert_eq!(heap.heap_size(), 256 * 1024);
    }
}
