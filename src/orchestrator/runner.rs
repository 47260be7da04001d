//! Sequential execution of one queue.
//!
//! A [`QueueRunner`] walks its queue in order. For each entry it issues the
//! remote command, records the result into the entry's write-once slot,
//! and emits a progress snapshot. A failing test never stops the queue.

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::RemoteTarget;
use super::results::{NO_RESULT_EXIT_STATUS, ResultsTable};
use crate::framework::{TestResult, TestSpec};
use crate::provider::{RemoteCommand, RemoteExecutor};
use crate::report::Reporter;

/// Runs the tests of a single queue against the remote host.
pub struct QueueRunner<'a, E, R> {
    executor: &'a E,
    reporter: &'a R,
    table: &'a ResultsTable,
    target: &'a RemoteTarget,
}

impl<'a, E: RemoteExecutor, R: Reporter> QueueRunner<'a, E, R> {
    pub fn new(
        executor: &'a E,
        reporter: &'a R,
        table: &'a ResultsTable,
        target: &'a RemoteTarget,
    ) -> Self {
        Self {
            executor,
            reporter,
            table,
            target,
        }
    }

    /// Runs every entry of queue `index` in order. Returns the number of
    /// results this worker recorded.
    pub async fn run(&self, index: usize) -> usize {
        let Some(queue) = self.table.queue(index) else {
            warn!("Queue {} does not exist", index);
            return 0;
        };

        let start = Instant::now();
        let mut recorded = 0;

        for entry in queue.entries() {
            let spec = entry.spec();
            self.reporter.on_test_start(index, spec).await;

            let result = self.execute(spec).await;
            if result.timed_out {
                warn!("{} timed out after {:?}", spec.title, spec.options.timeout);
            }

            if entry.record(result) {
                recorded += 1;
            } else {
                error!("Result for {} was already recorded", spec.title);
            }

            if let Some(result) = entry.result() {
                self.reporter.on_test_complete(spec, result).await;
            }

            let _guard = self.table.lock_snapshot().await;
            let snapshot = self.table.snapshot(start.elapsed());
            self.reporter.on_progress(&snapshot).await;
        }

        debug!(
            "Queue {} finished {} tests in {:?}",
            index,
            recorded,
            start.elapsed()
        );
        recorded
    }

    async fn execute(&self, spec: &TestSpec) -> TestResult {
        debug!("Queue command for {}: {}", spec.title, spec.command);

        let cmd = RemoteCommand::new(
            self.target.host.as_str(),
            spec.command.as_str(),
            spec.options.timeout,
        )
        .user(self.target.user.as_str())
        .connect_attempts(self.target.connect_attempts);

        match self.executor.execute(&cmd).await {
            Ok(exec) => TestResult::from_exec(exec),
            Err(e) => {
                error!("Failed to execute {} on {}: {}", spec.title, cmd.host, e);
                TestResult::from_exit(e.to_string(), NO_RESULT_EXIT_STATUS, Duration::ZERO)
            }
        }
    }
}
