//! Exclusive control over the runtime's automatic collector.

use rc_runtime::RefcountRuntime;
use tracing::debug;

/// Disables automatic collection for as long as it is held.
///
/// The previous setting is restored on drop, including during unwinding, so
/// a panicking unit of work cannot leave the collector switched off.
pub struct CollectorLease<'r, R: RefcountRuntime + ?Sized> {
    runtime: &'r R,
    previous: bool,
}

impl<'r, R: RefcountRuntime + ?Sized> CollectorLease<'r, R> {
    pub fn acquire(runtime: &'r R) -> Self {
        let previous = runtime.automatic_collection();
        runtime.set_automatic_collection(false);
        debug!(previous, "automatic collection disabled");
        Self { runtime, previous }
    }
}

impl<R: RefcountRuntime + ?Sized> Drop for CollectorLease<'_, R> {
    fn drop(&mut self) {
        self.runtime.set_automatic_collection(self.previous);
        debug!(enabled = self.previous, "automatic collection restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_runtime::TrackedHeap;

    #[test]
    fn test_lease_disables_and_restores() {
        let heap = TrackedHeap::new();
        {
            let _lease = CollectorLease::acquire(&heap);
            assert!(!heap.automatic_collection());
        }
        assert!(heap.automatic_collection());
    }

    #[test]
    fn test_lease_keeps_disabled_collector_disabled() {
        let heap = TrackedHeap::new();
        heap.set_automatic_collection(false);
        drop(CollectorLease::acquire(&heap));
        assert!(!heap.automatic_collection());
    }

    #[test]
    fn test_lease_restores_on_panic() {
        let heap = TrackedHeap::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _lease = CollectorLease::acquire(&heap);
            panic!("unit of work blew up");
        }));
        assert!(result.is_err());
        assert!(heap.automatic_collection());
    }
}
