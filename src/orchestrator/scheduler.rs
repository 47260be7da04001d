//! Parallel execution of one attempt.
//!
//! The [`Scheduler`] builds a fresh [`ResultsTable`] from the attempt's
//! queues, runs one worker per queue concurrently, and returns the table
//! once every worker has finished. Queues are independent: a failing
//! test in one never affects another.

use tracing::{debug, info, warn};

use super::RemoteTarget;
use super::results::ResultsTable;
use super::runner::QueueRunner;
use crate::framework::TestSpec;
use crate::provider::RemoteExecutor;
use crate::report::Reporter;

/// Runs every queue of an attempt concurrently.
pub struct Scheduler<'a, E, R> {
    executor: &'a E,
    reporter: &'a R,
    target: &'a RemoteTarget,
}

impl<'a, E: RemoteExecutor, R: Reporter> Scheduler<'a, E, R> {
    pub fn new(executor: &'a E, reporter: &'a R, target: &'a RemoteTarget) -> Self {
        Self {
            executor,
            reporter,
            target,
        }
    }

    /// Starts one worker per queue and waits for all of them.
    ///
    /// On return every entry of the table holds exactly one completed
    /// result.
    pub async fn run(&self, table: &ResultsTable) {
        if table.queue_count() == 0 {
            debug!("No queues to run");
            return;
        }

        info!(
            "Running {} tests across {} queues on {}",
            table.test_count(),
            table.queue_count(),
            self.target.host
        );

        // Scoped spawns let workers borrow the table without 'static.
        tokio_scoped::scope(|scope| {
            for index in 0..table.queue_count() {
                let runner = QueueRunner::new(self.executor, self.reporter, table, self.target);
                scope.spawn(async move {
                    runner.run(index).await;
                });
            }
        });

        let filled = table.fill_unrecorded();
        if filled > 0 {
            warn!("{} tests had no recorded result after all workers joined", filled);
        }
    }

    /// Builds a table for `queues` and runs it.
    pub async fn run_queues(&self, queues: Vec<Vec<TestSpec>>) -> ResultsTable {
        let table = ResultsTable::new(queues);
        self.run(&table).await;
        table
    }
}
