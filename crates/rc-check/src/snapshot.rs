//! Live-object snapshots for explain mode.
//!
//! A snapshot maps each live object's identity key to its reference count at
//! one instant. [`DiagnosticState`] holds the two slots a check fills on its
//! final round; each capture overwrites its slot, so the pair always
//! describes the most recent explained check only.

use std::collections::BTreeMap;

use rc_runtime::RefcountRuntime;
use serde::{Deserialize, Serialize};

use crate::diff::{diff_snapshots, Suspect};

/// Object key -> reference count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub objects: BTreeMap<String, i64>,
}

impl LiveSnapshot {
    pub fn capture<R: RefcountRuntime + ?Sized>(runtime: &R) -> Self {
        Self {
            objects: runtime
                .live_objects()
                .into_iter()
                .map(|obj| (obj.key, obj.refcount))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.objects.get(key).copied()
    }
}

/// Before/after snapshot slots, owned by the caller and reused across checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticState {
    pub before: LiveSnapshot,
    pub after: LiveSnapshot,
}

impl DiagnosticState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_before<R: RefcountRuntime + ?Sized>(&mut self, runtime: &R) {
        self.before = LiveSnapshot::capture(runtime);
    }

    pub fn capture_after<R: RefcountRuntime + ?Sized>(&mut self, runtime: &R) {
        self.after = LiveSnapshot::capture(runtime);
    }

    /// Objects whose presence or count differs between the two slots.
    pub fn suspects(&self) -> Vec<Suspect> {
        diff_snapshots(&self.before, &self.after)
    }
}
