//! Batch runner: checks every registered entry and folds the verdicts.
//!
//! Automatic collection stays disabled for the whole batch so the only
//! collections are the ones the checker forces. Failing entries do not stop
//! the batch; every entry is attempted and reported so one run lists all
//! regressions.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

use rc_runtime::RefcountRuntime;
use tracing::{info, warn};

use crate::checker::{log_outcome, CheckOutcome, ReferenceChecker};
use crate::config::{HarnessConfig, Suppression, DEFAULT_MAX_ROUNDS};
use crate::error::{CheckError, ConfigError};
use crate::lease::CollectorLease;
use crate::redirect::StderrSilencer;
use crate::report::{BatchReport, EntryStatus};
use crate::snapshot::DiagnosticState;
use crate::suite::{Entry, Suite, UnitOfWork};

pub struct BatchRunner<R> {
    checker: ReferenceChecker<R>,
    suppression: Suppression,
}

impl<R: RefcountRuntime> BatchRunner<R> {
    pub fn new(runtime: R, config: &HarnessConfig) -> Result<Self, ConfigError> {
        let checker = ReferenceChecker::new(runtime, config.rounds()?).with_explain(config.explain);
        Ok(Self::from_checker(checker, config.suppression))
    }

    pub fn from_checker(checker: ReferenceChecker<R>, suppression: Suppression) -> Self {
        Self {
            checker,
            suppression,
        }
    }

    pub fn checker(&self) -> &ReferenceChecker<R> {
        &self.checker
    }

    /// Run every entry of `suite` in id order, writing one status line per
    /// entry to `out`.
    ///
    /// Leaks are recorded in the report. Pending-error violations and output
    /// failures abort the batch; the collector setting and the error stream
    /// are restored either way.
    pub fn run(&self, suite: &mut Suite<'_>, out: &mut dyn Write) -> Result<BatchReport, CheckError> {
        let runtime = self.checker.runtime();
        if !runtime.is_instrumented() {
            return Err(CheckError::Uninstrumented);
        }

        let _lease = CollectorLease::acquire(runtime);
        let mut diagnostics = DiagnosticState::new();
        let mut report = BatchReport::new();

        suite.sort();
        let Suite {
            entries,
            skipped,
            noisy,
        } = suite;

        for entry in entries.iter_mut() {
            if let Some(reason) = skipped.get(&entry.id) {
                writeln!(out, "{}: SKIPPED ({})", entry.name, reason)?;
                report.record(
                    entry.id,
                    entry.name.clone(),
                    EntryStatus::Skipped {
                        reason: reason.clone(),
                    },
                );
                continue;
            }

            let outcome = if noisy.contains(&entry.id) {
                self.check_silenced(entry, &mut diagnostics, out)?
            } else {
                self.checker
                    .check(&entry.name, &mut *entry.body, &mut diagnostics, out)?
            };
            log_outcome(&entry.name, &outcome);
            report.record(entry.id, entry.name.clone(), outcome.into());
        }

        info!(
            entries = report.entries.len(),
            passed = report.passed_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            "batch finished"
        );
        Ok(report)
    }

    /// Check a noisy entry with the error stream pointed away. If the stream
    /// cannot be redirected the entry is still checked, just unsuppressed.
    ///
    /// Anything logged while the silencer is held is lost along with the
    /// entry's own output, so the verdict is logged by the caller after this
    /// returns. The fallback warning is only emitted when no redirect is in
    /// place.
    fn check_silenced(
        &self,
        entry: &mut Entry<'_>,
        diagnostics: &mut DiagnosticState,
        out: &mut dyn Write,
    ) -> Result<CheckOutcome, CheckError> {
        let _silencer = match StderrSilencer::engage(self.suppression) {
            Ok(silencer) => Some(silencer),
            Err(err) => {
                warn!(entry = %entry.name, %err, "running noisy entry unsuppressed");
                None
            }
        };
        self.checker
            .check(&entry.name, &mut *entry.body, diagnostics, out)
    }
}

/// Discover `<prefix><digits>` entries among `candidates` and check them
/// with default settings, reporting to stdout. Returns the folded verdict.
pub fn execute_reference_checked<'a, R, N>(
    runtime: R,
    prefix: &str,
    candidates: impl IntoIterator<Item = (N, UnitOfWork<'a>)>,
    skipped: &BTreeMap<u32, String>,
    noisy: &BTreeSet<u32>,
) -> Result<bool, CheckError>
where
    R: RefcountRuntime,
    N: Into<String>,
{
    let mut suite = Suite::new();
    suite.discover(prefix, candidates);
    for (id, reason) in skipped {
        suite.skip(*id, reason.clone());
    }
    for id in noisy {
        suite.noisy(*id);
    }

    let checker = ReferenceChecker::new(runtime, DEFAULT_MAX_ROUNDS);
    let runner = BatchRunner::from_checker(checker, Suppression::default());
    let report = runner.run(&mut suite, &mut io::stdout().lock())?;
    Ok(report.passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_runtime::TrackedHeap;
    use std::cell::Cell;

    fn config(max_rounds: usize) -> HarnessConfig {
        HarnessConfig {
            max_rounds,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn test_status_lines_in_order() {
        let heap = TrackedHeap::new();
        let mut suite = Suite::new();
        suite
            .register(3, "testCase3", || {
                heap.alloc("leak");
            })
            .register(1, "testCase1", || {})
            .register(2, "testCase2", || {})
            .skip(2, "known crash");

        let runner = BatchRunner::new(&heap, &config(2)).unwrap();
        let mut out = Vec::new();
        let report = runner.run(&mut suite, &mut out).unwrap();

        assert!(!report.passed);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "testCase1: PASSED\ntestCase2: SKIPPED (known crash)\ntestCase3: FAILED 1 2 leaked 1\n"
        );
    }

    #[test]
    fn test_collector_disabled_only_during_batch() {
        let heap = TrackedHeap::with_threshold(1);
        let seen = Cell::new(None);
        let mut suite = Suite::new();
        suite.register(1, "testCase1", || seen.set(Some(heap.automatic_collection())));

        let runner = BatchRunner::new(&heap, &config(1)).unwrap();
        runner.run(&mut suite, &mut Vec::new()).unwrap();

        assert_eq!(seen.get(), Some(false));
        assert!(heap.automatic_collection());
    }

    #[test]
    fn test_unsuppressed_noisy_entry_is_still_checked() {
        let heap = TrackedHeap::new();
        let calls = Cell::new(0);
        let mut suite = Suite::new();
        suite.register(1, "testNoisy1", || calls.set(calls.get() + 1)).noisy(1);

        let cfg = HarnessConfig {
            suppression: Suppression::Off,
            ..HarnessConfig::default()
        };
        let runner = BatchRunner::new(&heap, &cfg).unwrap();
        let report = runner.run(&mut suite, &mut Vec::new()).unwrap();

        assert!(report.passed);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_execute_reference_checked_discovers_entries() {
        let heap = TrackedHeap::new();
        let calls = Cell::new(0);
        let first: UnitOfWork<'_> = Box::new(|| calls.set(calls.get() + 1));
        let helper: UnitOfWork<'_> = Box::new(|| calls.set(calls.get() + 100));
        let candidates = vec![("testCall1", first), ("helper", helper)];
        let passed = execute_reference_checked(
            &heap,
            "testCall",
            candidates,
            &BTreeMap::new(),
            &BTreeSet::new(),
        )
        .unwrap();
        assert!(passed);
        assert_eq!(calls.get(), 1);
    }
}
