//! Batch reporting: per-entry statuses folded into one verdict.

use std::process::ExitCode;

use serde::{Deserialize, Serialize};

use crate::checker::CheckOutcome;
use crate::diff::Suspect;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryStatus {
    Passed {
        rounds: usize,
    },
    Failed {
        pre: i64,
        post: i64,
        delta: i64,
        suspects: Vec<Suspect>,
    },
    Skipped {
        reason: String,
    },
}

impl EntryStatus {
    /// Whether this status counts against the batch verdict.
    pub fn is_failure(&self) -> bool {
        matches!(self, EntryStatus::Failed { .. })
    }
}

impl From<CheckOutcome> for EntryStatus {
    fn from(outcome: CheckOutcome) -> Self {
        if outcome.passed() {
            EntryStatus::Passed {
                rounds: outcome.rounds,
            }
        } else {
            EntryStatus::Failed {
                pre: outcome.pre,
                post: outcome.post,
                delta: outcome.delta(),
                suspects: outcome.suspects,
            }
        }
    }
}

impl core::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntryStatus::Passed { .. } => write!(f, "PASSED"),
            EntryStatus::Failed {
                pre, post, delta, ..
            } => write!(f, "FAILED {} {} leaked {}", pre, post, delta),
            EntryStatus::Skipped { reason } => write!(f, "SKIPPED ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReport {
    pub id: u32,
    pub name: String,
    #[serde(flatten)]
    pub status: EntryStatus,
}

/// Outcome of a whole batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub entries: Vec<EntryReport>,
    /// True iff no executed entry failed.
    pub passed: bool,
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            passed: true,
        }
    }

    /// Record one entry, folding it into the verdict.
    pub fn record(&mut self, id: u32, name: impl Into<String>, status: EntryStatus) {
        self.passed &= !status.is_failure();
        self.entries.push(EntryReport {
            id,
            name: name.into(),
            status,
        });
    }

    pub fn passed_count(&self) -> usize {
        self.count(|s| matches!(s, EntryStatus::Passed { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(EntryStatus::is_failure)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, EntryStatus::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&EntryStatus) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.status)).count()
    }

    /// Entries that failed, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| e.status.is_failure())
    }

    /// Process exit code for CI: failure if any entry failed.
    pub fn exit_code(&self) -> ExitCode {
        if self.passed {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n============================================================");
        println!(
            "Result: {}",
            if self.passed { "PASS" } else { "FAIL" }
        );
        println!(
            "Entries: {} passed, {} failed, {} skipped",
            self.passed_count(),
            self.failed_count(),
            self.skipped_count()
        );
        for entry in self.failures() {
            println!("  {}: {}", entry.name, entry.status);
            if let EntryStatus::Failed { suspects, .. } = &entry.status {
                for s in suspects {
                    println!("    {}", s);
                }
            }
        }
        println!("============================================================\n");
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}
