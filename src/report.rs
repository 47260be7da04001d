//! Progress and result reporting.
//!
//! Reporters receive events from every worker of an attempt, so
//! implementations must be `Send + Sync`. Progress snapshots are emitted
//! under the results table's snapshot lock; a reporter never sees two
//! snapshots at once.

pub mod console;

use async_trait::async_trait;

use crate::framework::{TestResult, TestSpec};
use crate::orchestrator::RunOutcome;
use crate::orchestrator::results::{ProgressSnapshot, ResultsTable};

pub use console::{ConsoleReporter, render_failures, render_progress};

/// A reporter receives events while queues execute.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called before an attempt's workers start.
    async fn on_attempt_start(&self, attempt: usize, max_attempts: usize, table: &ResultsTable);

    /// Called when a worker issues a test's command.
    async fn on_test_start(&self, queue: usize, spec: &TestSpec);

    /// Called once a test's result is recorded.
    async fn on_test_complete(&self, spec: &TestSpec, result: &TestResult);

    /// Called after each test with a cross-queue snapshot.
    async fn on_progress(&self, snapshot: &ProgressSnapshot);

    /// Called once per attempt that had failures, with their titles in
    /// discovery order.
    async fn on_failures(&self, attempt: usize, titles: &[String]);

    /// Called when the run reaches a terminal state.
    async fn on_run_complete(&self, outcome: &RunOutcome);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_attempt_start(&self, _attempt: usize, _max: usize, _table: &ResultsTable) {}
    async fn on_test_start(&self, _queue: usize, _spec: &TestSpec) {}
    async fn on_test_complete(&self, _spec: &TestSpec, _result: &TestResult) {}
    async fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
    async fn on_failures(&self, _attempt: usize, _titles: &[String]) {}
    async fn on_run_complete(&self, _outcome: &RunOutcome) {}
}
