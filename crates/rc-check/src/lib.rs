//! Reference-count leak regression harness.
//!
//! Provides the convergence checker that decides whether a unit of work
//! leaks or over-releases references, a batch runner over numbered entries
//! with skip and noisy-output registries, explain-mode snapshot diffing, and
//! batch reporting.

pub mod batch;
pub mod checker;
pub mod config;
pub mod diff;
pub mod error;
pub mod lease;
pub mod redirect;
pub mod report;
pub mod snapshot;
pub mod suite;

pub use batch::{execute_reference_checked, BatchRunner};
pub use checker::{check_reference_count, log_outcome, CheckOutcome, ReferenceChecker};
pub use config::{HarnessConfig, Suppression};
pub use error::{CheckError, ConfigError, RedirectError};
pub use report::{BatchReport, EntryStatus};
pub use snapshot::DiagnosticState;
pub use suite::{Suite, UnitOfWork};
