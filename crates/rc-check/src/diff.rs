//! Snapshot diffing for explain mode.
//!
//! Compares two [`LiveSnapshot`]s key by key. Every key present on only one
//! side, or present on both with different counts, becomes a [`Suspect`].

use serde::{Deserialize, Serialize};

use crate::snapshot::LiveSnapshot;

/// How a suspect object changed across the checked call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SuspectKind {
    /// Live before, gone after.
    Vanished,
    /// Not live before, live after.
    Appeared,
    /// Live on both sides with a different count.
    Changed,
}

impl core::fmt::Display for SuspectKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SuspectKind::Vanished => write!(f, "VANISHED"),
            SuspectKind::Appeared => write!(f, "APPEARED"),
            SuspectKind::Changed => write!(f, "CHANGED"),
        }
    }
}

/// One object whose reference count moved during the final round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspect {
    pub key: String,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

impl Suspect {
    pub fn kind(&self) -> SuspectKind {
        match (self.before, self.after) {
            (Some(_), None) => SuspectKind::Vanished,
            (None, Some(_)) => SuspectKind::Appeared,
            _ => SuspectKind::Changed,
        }
    }

    /// Signed change in count, treating an absent side as zero.
    pub fn delta(&self) -> i64 {
        self.after.unwrap_or(0) - self.before.unwrap_or(0)
    }
}

impl core::fmt::Display for Suspect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let show = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |n| n.to_string());
        write!(
            f,
            "[{}] {}: before={}, after={}",
            self.kind(),
            self.key,
            show(self.before),
            show(self.after)
        )
    }
}

/// Compare two snapshots and return every differing key, in key order.
pub fn diff_snapshots(before: &LiveSnapshot, after: &LiveSnapshot) -> Vec<Suspect> {
    let mut suspects = Vec::new();

    for (key, count) in &before.objects {
        match after.objects.get(key) {
            Some(later) if later == count => {}
            later => suspects.push(Suspect {
                key: key.clone(),
                before: Some(*count),
                after: later.copied(),
            }),
        }
    }

    for (key, count) in &after.objects {
        if !before.objects.contains_key(key) {
            suspects.push(Suspect {
                key: key.clone(),
                before: None,
                after: Some(*count),
            });
        }
    }

    suspects.sort_by(|a, b| a.key.cmp(&b.key));
    suspects
}
