//! Reference-count introspection for leak regression checks.
//!
//! [`RefcountRuntime`] is the capability a target runtime exposes to the
//! harness: forced collection, the global live reference count, per-object
//! enumeration, pending error state and control over automatic collection.
//! [`TrackedHeap`] implements it for a runtime without native reference
//! counting by tracking every allocation explicitly.

pub mod heap;

use std::rc::Rc;

use serde::{Deserialize, Serialize};

pub use heap::{HeapError, ObjId, TrackedHeap};

/// One live object as seen by the runtime at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveObject {
    /// Stable identity string for the object.
    pub key: String,
    pub refcount: i64,
}

/// Introspection primitives the leak checker relies on.
///
/// Methods take `&self` so a unit of work can hold a shared handle to the
/// runtime while the checker measures it. Implementations are expected to be
/// single-threaded.
pub trait RefcountRuntime {
    /// Run a full collection, reclaiming unreachable cycles.
    fn collect_full(&self);

    /// Sum of reference counts over every tracked object.
    fn live_reference_count(&self) -> i64;

    /// Every live object with its current reference count.
    fn live_objects(&self) -> Vec<LiveObject>;

    /// Description of the error currently pending, if any.
    fn pending_error(&self) -> Option<String>;

    fn has_pending_error(&self) -> bool {
        self.pending_error().is_some()
    }

    /// Whether the runtime collects on its own between explicit requests.
    fn automatic_collection(&self) -> bool;

    fn set_automatic_collection(&self, enabled: bool);

    /// False when the runtime cannot report a meaningful reference count
    /// (e.g. a release interpreter without refcount instrumentation).
    fn is_instrumented(&self) -> bool {
        true
    }
}

impl<T: RefcountRuntime + ?Sized> RefcountRuntime for &T {
    fn collect_full(&self) {
        (**self).collect_full()
    }

    fn live_reference_count(&self) -> i64 {
        (**self).live_reference_count()
    }

    fn live_objects(&self) -> Vec<LiveObject> {
        (**self).live_objects()
    }

    fn pending_error(&self) -> Option<String> {
        (**self).pending_error()
    }

    fn has_pending_error(&self) -> bool {
        (**self).has_pending_error()
    }

    fn automatic_collection(&self) -> bool {
        (**self).automatic_collection()
    }

    fn set_automatic_collection(&self, enabled: bool) {
        (**self).set_automatic_collection(enabled)
    }

    fn is_instrumented(&self) -> bool {
        (**self).is_instrumented()
    }
}

impl<T: RefcountRuntime + ?Sized> RefcountRuntime for Rc<T> {
    fn collect_full(&self) {
        (**self).collect_full()
    }

    fn live_reference_count(&self) -> i64 {
        (**self).live_reference_count()
    }

    fn live_objects(&self) -> Vec<LiveObject> {
        (**self).live_objects()
    }

    fn pending_error(&self) -> Option<String> {
        (**self).pending_error()
    }

    fn has_pending_error(&self) -> bool {
        (**self).has_pending_error()
    }

    fn automatic_collection(&self) -> bool {
        (**self).automatic_collection()
    }

    fn set_automatic_collection(&self, enabled: bool) {
        (**self).set_automatic_collection(enabled)
    }

    fn is_instrumented(&self) -> bool {
        (**self).is_instrumented()
    }
}
