//! Shared results table for one attempt.
//!
//! The table is index-addressed: one [`Queue`] per worker, one
//! [`QueueEntry`] per test, in execution order. Each entry's result is a
//! write-once slot, so workers record results without taking any shared
//! lock and readers never see a result change after it appears.
//!
//! Progress snapshots read every queue while other workers are still
//! writing. They are display-only and may be torn. The table's snapshot
//! lock only serializes snapshot scans (and their output) against each
//! other.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::framework::{TestResult, TestSpec, TestStatus};

/// Exit status recorded for a test whose worker never produced a result.
pub const NO_RESULT_EXIT_STATUS: i32 = -1;

/// A test and its (eventual) result.
#[derive(Debug)]
pub struct QueueEntry {
    spec: TestSpec,
    result: OnceLock<TestResult>,
}

impl QueueEntry {
    fn new(spec: TestSpec) -> Self {
        Self {
            spec,
            result: OnceLock::new(),
        }
    }

    /// The test being run.
    pub fn spec(&self) -> &TestSpec {
        &self.spec
    }

    /// The result, once recorded.
    pub fn result(&self) -> Option<&TestResult> {
        self.result.get()
    }

    /// Progress category; `Running` until a result is recorded.
    pub fn status(&self) -> TestStatus {
        self.result
            .get()
            .map_or(TestStatus::Running, TestResult::status)
    }

    /// Records the result. Returns `false` if one was already recorded,
    /// in which case the first result is kept.
    pub(crate) fn record(&self, result: TestResult) -> bool {
        self.result.set(result).is_ok()
    }
}

/// An ordered batch of tests run sequentially by one worker.
#[derive(Debug)]
pub struct Queue {
    entries: Vec<QueueEntry>,
}

impl Queue {
    /// Entries in execution order.
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A failed test, borrowed from the table after the join.
#[derive(Debug, Clone, Copy)]
pub struct FailedTest<'a> {
    pub spec: &'a TestSpec,
    pub result: &'a TestResult,
}

/// All queues of one attempt.
#[derive(Debug)]
pub struct ResultsTable {
    queues: Vec<Queue>,
    snapshot_lock: Mutex<()>,
}

impl ResultsTable {
    /// Builds a fresh table with every result slot empty.
    pub fn new(queues: Vec<Vec<TestSpec>>) -> Self {
        Self {
            queues: queues
                .into_iter()
                .map(|specs| Queue {
                    entries: specs.into_iter().map(QueueEntry::new).collect(),
                })
                .collect(),
            snapshot_lock: Mutex::new(()),
        }
    }

    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    pub fn queue(&self, index: usize) -> Option<&Queue> {
        self.queues.get(index)
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Total number of tests across all queues.
    pub fn test_count(&self) -> usize {
        self.queues.iter().map(Queue::len).sum()
    }

    fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.queues.iter().flat_map(|q| q.entries.iter())
    }

    /// Serializes snapshot scans. Never held while recording a result.
    pub async fn lock_snapshot(&self) -> MutexGuard<'_, ()> {
        self.snapshot_lock.lock().await
    }

    /// Reads the current state of every queue.
    pub fn snapshot(&self, elapsed: Duration) -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot {
            elapsed,
            still_running: Vec::with_capacity(self.queues.len()),
            timed_out: Vec::new(),
            failed: Vec::new(),
            passed: Vec::new(),
        };

        for queue in &self.queues {
            let mut running = Vec::new();
            for entry in &queue.entries {
                let title = entry.spec.title.clone();
                match entry.status() {
                    TestStatus::Running => running.push(title),
                    TestStatus::TimedOut => snapshot.timed_out.push(title),
                    TestStatus::Failed => snapshot.failed.push(title),
                    TestStatus::Passed => snapshot.passed.push(title),
                }
            }
            snapshot.still_running.push(running);
        }

        snapshot
    }

    /// Records a failed placeholder for every slot still empty. Called
    /// after the join so every test has exactly one completed result.
    pub(crate) fn fill_unrecorded(&self) -> usize {
        let mut filled = 0;
        for entry in self.entries() {
            if entry.result().is_none()
                && entry.record(TestResult::from_exit(
                    "worker exited before recording a result",
                    NO_RESULT_EXIT_STATUS,
                    Duration::ZERO,
                ))
            {
                filled += 1;
            }
        }
        filled
    }

    /// Every unsuccessful test, in discovery order (queue by queue, in
    /// execution order within a queue).
    pub fn failures(&self) -> Vec<FailedTest<'_>> {
        self.entries()
            .filter_map(|entry| {
                let result = entry.result()?;
                (!result.success).then_some(FailedTest {
                    spec: &entry.spec,
                    result,
                })
            })
            .collect()
    }

    /// Whether every test completed successfully.
    pub fn all_passed(&self) -> bool {
        self.entries()
            .all(|entry| entry.result().is_some_and(|r| r.success))
    }
}

/// Point-in-time view of an attempt, emitted after each test completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Time since the reporting queue started.
    pub elapsed: Duration,
    /// Titles not yet completed, grouped by queue index.
    pub still_running: Vec<Vec<String>>,
    /// Titles that hit the remote timeout.
    pub timed_out: Vec<String>,
    /// Titles that completed with a non-timeout failure.
    pub failed: Vec<String>,
    /// Titles that completed successfully.
    pub passed: Vec<String>,
}

impl ProgressSnapshot {
    /// Whether any queue still has tests to complete.
    pub fn has_running(&self) -> bool {
        self.still_running.iter().any(|q| !q.is_empty())
    }

    /// Number of tests not yet completed.
    pub fn running_count(&self) -> usize {
        self.still_running.iter().map(Vec::len).sum()
    }
}
