//! Tracked-allocation heap.
//!
//! Every object carries an explicit reference count and a list of outgoing
//! links (references it owns to other objects). Counts drop to zero on
//! `decref`, which frees the object and releases its links. Cycles are only
//! reclaimed by a full collection, which uses trial deletion: references that
//! originate inside the heap are subtracted, objects left with a positive
//! count are externally held roots, and anything not reachable from a root is
//! garbage.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{LiveObject, RefcountRuntime};

/// Allocations between automatic collections.
pub const DEFAULT_COLLECT_THRESHOLD: usize = 700;

/// Handle to an object in a [`TrackedHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjId(u64);

impl core::fmt::Display for ObjId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("object {0} is not live")]
    UnknownObject(ObjId),

    #[error("object {parent} holds no link to {child}")]
    MissingLink { parent: ObjId, child: ObjId },
}

#[derive(Debug)]
struct ObjRecord {
    label: String,
    refcount: i64,
    links: Vec<ObjId>,
}

#[derive(Debug, Default)]
struct HeapState {
    objects: BTreeMap<ObjId, ObjRecord>,
    interned: HashMap<String, ObjId>,
    next_id: u64,
    pending_error: Option<String>,
    allocations_since_collect: usize,
    collections: u64,
}

impl HeapState {
    fn get_mut(&mut self, id: ObjId) -> Result<&mut ObjRecord, HeapError> {
        self.objects
            .get_mut(&id)
            .ok_or(HeapError::UnknownObject(id))
    }

    fn allocate(&mut self, label: &str) -> ObjId {
        let id = ObjId(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            id,
            ObjRecord {
                label: label.to_string(),
                refcount: 1,
                links: Vec::new(),
            },
        );
        id
    }

    fn decref(&mut self, id: ObjId) -> Result<(), HeapError> {
        let rec = self.get_mut(id)?;
        rec.refcount -= 1;
        if rec.refcount > 0 {
            return Ok(());
        }

        let mut dying = vec![id];
        while let Some(dead) = dying.pop() {
            let Some(rec) = self.objects.remove(&dead) else {
                continue;
            };
            trace!(object = %dead, label = %rec.label, "freed");
            self.interned.retain(|_, v| *v != dead);
            for child in rec.links {
                if let Some(c) = self.objects.get_mut(&child) {
                    c.refcount -= 1;
                    if c.refcount <= 0 {
                        dying.push(child);
                    }
                }
            }
        }
        Ok(())
    }

    /// Trial deletion over the whole heap. Returns the number of objects freed.
    fn collect(&mut self) -> usize {
        let mut external: BTreeMap<ObjId, i64> = self
            .objects
            .iter()
            .map(|(id, rec)| (*id, rec.refcount))
            .collect();
        for rec in self.objects.values() {
            for child in &rec.links {
                if let Some(count) = external.get_mut(child) {
                    *count -= 1;
                }
            }
        }

        let mut reachable = BTreeSet::new();
        let mut stack: Vec<ObjId> = external
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(id, _)| *id)
            .collect();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(rec) = self.objects.get(&id) {
                stack.extend(rec.links.iter().copied());
            }
        }

        let garbage: Vec<ObjId> = self
            .objects
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();

        let mut survivors_released = Vec::new();
        for id in &garbage {
            if let Some(rec) = self.objects.remove(id) {
                self.interned.retain(|_, v| *v != *id);
                survivors_released.extend(rec.links.into_iter().filter(|c| reachable.contains(c)));
            }
        }
        for child in survivors_released {
            // Survivors keep at least one external reference, so this never frees.
            let _ = self.decref(child);
        }

        self.allocations_since_collect = 0;
        self.collections += 1;
        garbage.len()
    }
}

/// A runtime approximating reference counting through explicit tracking.
///
/// All operations go through `&self`; the heap is meant to be shared by the
/// harness and the units of work it measures on a single thread.
#[derive(Debug)]
pub struct TrackedHeap {
    state: RefCell<HeapState>,
    auto_collect: Cell<bool>,
    threshold: usize,
}

impl Default for TrackedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedHeap {
    /// Empty heap with automatic collection enabled.
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_COLLECT_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            state: RefCell::new(HeapState::default()),
            auto_collect: Cell::new(true),
            threshold: threshold.max(1),
        }
    }

    /// Allocate an object owned once by the caller.
    pub fn alloc(&self, label: &str) -> ObjId {
        let (id, due) = {
            let mut state = self.state.borrow_mut();
            let id = state.allocate(label);
            state.allocations_since_collect += 1;
            (id, state.allocations_since_collect >= self.threshold)
        };
        if due && self.auto_collect.get() {
            debug!(threshold = self.threshold, "automatic collection");
            self.state.borrow_mut().collect();
        }
        id
    }

    pub fn incref(&self, id: ObjId) -> Result<(), HeapError> {
        self.state.borrow_mut().get_mut(id)?.refcount += 1;
        Ok(())
    }

    /// Drop one reference; the object and everything only it owned is freed
    /// when the count reaches zero.
    pub fn decref(&self, id: ObjId) -> Result<(), HeapError> {
        self.state.borrow_mut().decref(id)
    }

    /// Make `parent` own one reference to `child`.
    pub fn link(&self, parent: ObjId, child: ObjId) -> Result<(), HeapError> {
        let mut state = self.state.borrow_mut();
        state.get_mut(child)?;
        state.get_mut(parent)?.links.push(child);
        state.get_mut(child)?.refcount += 1;
        Ok(())
    }

    /// Remove one link from `parent` to `child` and release the reference.
    pub fn unlink(&self, parent: ObjId, child: ObjId) -> Result<(), HeapError> {
        let mut state = self.state.borrow_mut();
        let rec = state.get_mut(parent)?;
        let pos = rec
            .links
            .iter()
            .position(|c| *c == child)
            .ok_or(HeapError::MissingLink { parent, child })?;
        rec.links.remove(pos);
        state.decref(child)
    }

    /// Return the interned object for `key`, creating it on first use.
    ///
    /// The intern table keeps one reference for the lifetime of the heap, so
    /// the first call grows the live count permanently while later calls are
    /// balanced once the caller releases its reference.
    pub fn intern(&self, key: &str) -> ObjId {
        let existing = self.state.borrow().interned.get(key).copied();
        if let Some(id) = existing {
            if let Ok(rec) = self.state.borrow_mut().get_mut(id) {
                rec.refcount += 1;
                return id;
            }
        }
        let id = self.alloc(key);
        let mut state = self.state.borrow_mut();
        state.interned.insert(key.to_string(), id);
        if let Ok(rec) = state.get_mut(id) {
            rec.refcount += 1;
        }
        id
    }

    /// Current reference count of `id`, or `None` if it has been freed.
    pub fn refcount(&self, id: ObjId) -> Option<i64> {
        self.state.borrow().objects.get(&id).map(|rec| rec.refcount)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.state.borrow().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of full collections run so far, explicit or automatic.
    pub fn collections(&self) -> u64 {
        self.state.borrow().collections
    }

    /// Set the pending error, replacing any previous one.
    pub fn raise(&self, message: impl Into<String>) {
        self.state.borrow_mut().pending_error = Some(message.into());
    }

    /// Take the pending error, leaving none behind.
    pub fn clear_error(&self) -> Option<String> {
        self.state.borrow_mut().pending_error.take()
    }

    /// Turn a failed heap operation into a pending error.
    pub fn trap<T>(&self, result: Result<T, HeapError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.raise(err.to_string());
                None
            }
        }
    }
}

impl RefcountRuntime for TrackedHeap {
    fn collect_full(&self) {
        let freed = self.state.borrow_mut().collect();
        debug!(freed, "full collection");
    }

    fn live_reference_count(&self) -> i64 {
        self.state
            .borrow()
            .objects
            .values()
            .map(|rec| rec.refcount)
            .sum()
    }

    fn live_objects(&self) -> Vec<LiveObject> {
        self.state
            .borrow()
            .objects
            .iter()
            .map(|(id, rec)| LiveObject {
                key: format!("{}{}", rec.label, id),
                refcount: rec.refcount,
            })
            .collect()
    }

    fn pending_error(&self) -> Option<String> {
        self.state.borrow().pending_error.clone()
    }

    fn automatic_collection(&self) -> bool {
        self.auto_collect.get()
    }

    fn set_automatic_collection(&self, enabled: bool) {
        self.auto_collect.set(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_release() {
        let heap = TrackedHeap::new();
        let a = heap.alloc("list");
        assert_eq!(heap.live_reference_count(), 1);
        heap.decref(a).unwrap();
        assert!(heap.is_empty());
        assert_eq!(heap.live_reference_count(), 0);
    }

    #[test]
    fn test_release_frees_owned_children() {
        let heap = TrackedHeap::new();
        let parent = heap.alloc("dict");
        let child = heap.alloc("str");
        heap.link(parent, child).unwrap();
        heap.decref(child).unwrap();
        assert_eq!(heap.refcount(child), Some(1));

        heap.decref(parent).unwrap();
        assert_eq!(heap.refcount(child), None);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_cycle_survives_decref_until_collected() {
        let heap = TrackedHeap::new();
        let a = heap.alloc("node");
        let b = heap.alloc("node");
        heap.link(a, b).unwrap();
        heap.link(b, a).unwrap();
        heap.decref(a).unwrap();
        heap.decref(b).unwrap();
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.live_reference_count(), 2);

        heap.collect_full();
        assert!(heap.is_empty());
        assert_eq!(heap.collections(), 1);
    }

    #[test]
    fn test_collect_keeps_externally_held_cycle() {
        let heap = TrackedHeap::new();
        let a = heap.alloc("node");
        let b = heap.alloc("node");
        heap.link(a, b).unwrap();
        heap.link(b, a).unwrap();
        heap.decref(b).unwrap();

        heap.collect_full();
        assert_eq!(heap.refcount(a), Some(2));
        assert_eq!(heap.refcount(b), Some(1));
    }

    #[test]
    fn test_collect_releases_links_from_garbage_into_live_objects() {
        let heap = TrackedHeap::new();
        let shared = heap.alloc("shared");
        let a = heap.alloc("node");
        let b = heap.alloc("node");
        heap.link(a, b).unwrap();
        heap.link(b, a).unwrap();
        heap.link(a, shared).unwrap();
        heap.decref(a).unwrap();
        heap.decref(b).unwrap();
        assert_eq!(heap.refcount(shared), Some(2));

        heap.collect_full();
        assert_eq!(heap.refcount(shared), Some(1));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_intern_grows_once() {
        let heap = TrackedHeap::new();
        let first = heap.intern("name");
        heap.decref(first).unwrap();
        assert_eq!(heap.live_reference_count(), 1);

        let again = heap.intern("name");
        assert_eq!(first, again);
        heap.decref(again).unwrap();
        assert_eq!(heap.live_reference_count(), 1);
    }

    #[test]
    fn test_unknown_object_is_an_error() {
        let heap = TrackedHeap::new();
        let a = heap.alloc("x");
        heap.decref(a).unwrap();
        assert_eq!(heap.decref(a), Err(HeapError::UnknownObject(a)));
        assert_eq!(heap.incref(a), Err(HeapError::UnknownObject(a)));
    }

    #[test]
    fn test_unlink_missing_link() {
        let heap = TrackedHeap::new();
        let a = heap.alloc("x");
        let b = heap.alloc("y");
        assert_eq!(
            heap.unlink(a, b),
            Err(HeapError::MissingLink { parent: a, child: b })
        );
    }

    #[test]
    fn test_trap_raises_pending_error() {
        let heap = TrackedHeap::new();
        let a = heap.alloc("x");
        heap.decref(a).unwrap();
        assert!(heap.trap(heap.decref(a)).is_none());
        assert!(heap.has_pending_error());
        assert_eq!(heap.clear_error(), Some(format!("object {} is not live", a)));
        assert!(!heap.has_pending_error());
    }

    #[test]
    fn test_automatic_collection_threshold() {
        let heap = TrackedHeap::with_threshold(4);
        for _ in 0..4 {
            heap.alloc("tmp");
        }
        assert_eq!(heap.collections(), 1);

        heap.set_automatic_collection(false);
        for _ in 0..8 {
            heap.alloc("tmp");
        }
        assert_eq!(heap.collections(), 1);
    }

    #[test]
    fn test_live_object_keys() {
        let heap = TrackedHeap::new();
        let a = heap.alloc("tuple");
        let objects = heap.live_objects();
        assert_eq!(
            objects,
            vec![LiveObject {
                key: format!("tuple{}", a),
                refcount: 1
            }]
        );
    }
}
