//! Accounting invariants of the tracked heap.

use proptest::prelude::*;
use rc_runtime::{RefcountRuntime, TrackedHeap};

/// Building a random graph and releasing every handle leaves nothing behind
/// once a full collection has run, whatever cycles the links formed.
#[test]
fn test_dense_graph_fully_reclaimed() {
    let heap = TrackedHeap::new();
    let nodes: Vec<_> = (0..16).map(|_| heap.alloc("node")).collect();
    for (i, a) in nodes.iter().enumerate() {
        for b in nodes.iter().skip(i % 3) {
            heap.link(*a, *b).unwrap();
        }
    }
    for n in &nodes {
        heap.decref(*n).unwrap();
    }
    heap.collect_full();
    assert!(heap.is_empty());
    assert_eq!(heap.live_reference_count(), 0);
}

#[test]
fn test_collection_disabled_keeps_cycles() {
    let heap = TrackedHeap::with_threshold(2);
    heap.set_automatic_collection(false);
    for _ in 0..10 {
        let a = heap.alloc("node");
        let b = heap.alloc("node");
        heap.link(a, b).unwrap();
        heap.link(b, a).unwrap();
        heap.decref(a).unwrap();
        heap.decref(b).unwrap();
    }
    assert_eq!(heap.len(), 20);
    assert_eq!(heap.collections(), 0);
}

proptest! {
    /// The global count equals the number of handles held plus links.
    #[test]
    fn prop_count_is_handles_plus_links(
        links in proptest::collection::vec((0usize..8, 0usize..8), 0..32)
    ) {
        let heap = TrackedHeap::new();
        heap.set_automatic_collection(false);
        let nodes: Vec<_> = (0..8).map(|_| heap.alloc("node")).collect();
        for (a, b) in &links {
            heap.link(nodes[*a], nodes[*b]).unwrap();
        }
        prop_assert_eq!(heap.live_reference_count(), (nodes.len() + links.len()) as i64);

        // Everything is still externally held, so a collection frees nothing.
        heap.collect_full();
        prop_assert_eq!(heap.len(), nodes.len());

        for n in &nodes {
            heap.decref(*n).unwrap();
        }
        heap.collect_full();
        prop_assert!(heap.is_empty());
    }
}
