//! Convergence checker.
//!
//! Runs a unit of work repeatedly, comparing the runtime's live reference
//! count before and after each run with a forced full collection on both
//! sides. The first round where the two counts are equal passes the unit.
//! First executions of a code path may legitimately grow lazily filled
//! caches, so only a unit that never converges within `max_rounds` fails,
//! and the reported delta is the one of the final round.

use std::io::{self, Write};
use std::num::NonZeroUsize;

use rc_runtime::RefcountRuntime;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::diff::Suspect;
use crate::error::CheckError;
use crate::snapshot::DiagnosticState;

/// Result of checking one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Rounds executed, including the final one.
    pub rounds: usize,
    /// Live reference count before the final round.
    pub pre: i64,
    /// Live reference count after the final round.
    pub post: i64,
    /// Explain-mode suspects; empty unless the check failed in explain mode.
    pub suspects: Vec<Suspect>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.pre == self.post
    }

    /// Positive for a leak, negative for an over-release.
    pub fn delta(&self) -> i64 {
        self.post - self.pre
    }
}

pub struct ReferenceChecker<R> {
    runtime: R,
    max_rounds: NonZeroUsize,
    explain: bool,
}

impl<R: RefcountRuntime> ReferenceChecker<R> {
    pub fn new(runtime: R, max_rounds: NonZeroUsize) -> Self {
        Self {
            runtime,
            max_rounds,
            explain: false,
        }
    }

    /// Capture before/after snapshots on the final round and list suspects
    /// when a check fails.
    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn max_rounds(&self) -> NonZeroUsize {
        self.max_rounds
    }

    pub fn explain(&self) -> bool {
        self.explain
    }

    /// Check `unit`, writing its status line to `out`.
    ///
    /// The `"<name>: "` prefix is flushed before the unit first runs so a
    /// unit that hangs is identifiable. A pending runtime error before or
    /// after any run aborts the check with an error instead of a verdict.
    /// The verdict is not logged here; callers pass the outcome to
    /// [`log_outcome`] once the error stream is their own again.
    pub fn check(
        &self,
        name: &str,
        unit: &mut dyn FnMut(),
        diagnostics: &mut DiagnosticState,
        out: &mut dyn Write,
    ) -> Result<CheckOutcome, CheckError> {
        let rt = &self.runtime;
        if let Some(error) = rt.pending_error() {
            return Err(CheckError::PendingErrorBefore {
                name: name.to_string(),
                error,
            });
        }

        write!(out, "{}: ", name)?;
        out.flush()?;

        let last = self.max_rounds.get() - 1;
        let mut pre = 0;
        let mut post = 0;
        let mut rounds = 0;

        for round in 0..=last {
            rounds = round + 1;
            let capture = self.explain && round == last;

            rt.collect_full();
            pre = rt.live_reference_count();
            if capture {
                diagnostics.capture_before(rt);
            }

            unit();

            if let Some(error) = rt.pending_error() {
                return Err(CheckError::PendingErrorAfter {
                    name: name.to_string(),
                    round,
                    error,
                });
            }

            rt.collect_full();
            if capture {
                diagnostics.capture_after(rt);
            }
            post = rt.live_reference_count();

            debug!(unit = name, round, pre, post, "round finished");
            if pre == post {
                break;
            }
        }

        let mut outcome = CheckOutcome {
            rounds,
            pre,
            post,
            suspects: Vec::new(),
        };

        if outcome.passed() {
            writeln!(out, "PASSED")?;
        } else {
            writeln!(out, "FAILED {} {} leaked {}", pre, post, outcome.delta())?;
            if self.explain {
                outcome.suspects = diagnostics.suspects();
                for suspect in &outcome.suspects {
                    writeln!(out, "{}", "*".repeat(80))?;
                    writeln!(out, "{}", suspect.key)?;
                }
            }
        }

        if let Some(error) = rt.pending_error() {
            return Err(CheckError::PendingErrorAfter {
                name: name.to_string(),
                round: rounds - 1,
                error,
            });
        }

        rt.collect_full();
        out.flush()?;
        Ok(outcome)
    }
}

/// Emit the log event for a finished check. Leaks are errors.
pub fn log_outcome(name: &str, outcome: &CheckOutcome) {
    if outcome.passed() {
        debug!(unit = name, rounds = outcome.rounds, "reference count converged");
    } else {
        error!(
            unit = name,
            pre = outcome.pre,
            post = outcome.post,
            delta = outcome.delta(),
            "reference count did not converge"
        );
    }
}

/// Check one unit with default settings, reporting to stdout.
pub fn check_reference_count<R: RefcountRuntime>(
    runtime: R,
    name: &str,
    unit: &mut dyn FnMut(),
    max_rounds: NonZeroUsize,
) -> Result<bool, CheckError> {
    if !runtime.is_instrumented() {
        return Err(CheckError::Uninstrumented);
    }
    let checker = ReferenceChecker::new(runtime, max_rounds);
    let mut diagnostics = DiagnosticState::new();
    let outcome = checker.check(name, unit, &mut diagnostics, &mut io::stdout().lock())?;
    log_outcome(name, &outcome);
    Ok(outcome.passed())
}
