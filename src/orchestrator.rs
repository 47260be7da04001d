//! Attempt-level orchestration.
//!
//! This module ties the pieces of a run together: parallel queue
//! execution, failure classification and the bounded retry loop.
//!
//! # Architecture
//!
//! ```text
//!   caller queues: Vec<Vec<TestSpec>>
//!        │
//!        ▼
//!   RetryController ──── attempt n ───► Scheduler ──► QueueRunner (one per queue)
//!        │                                  │               │
//!        │                                  │        RemoteExecutor.execute()
//!        │                                  ▼               │
//!        │                            ResultsTable ◄────────┘ record / snapshot
//!        │                                  │
//!        │◄──────────── failures ───────────┘
//!        │
//!        ├── RemoteEnvironment.idle()
//!        ├── FailureClassifier.classify() ──► single retry queue
//!        └── RemoteEnvironment.reset_test_dir()
//! ```
//!
//! # Attempt States
//!
//! | State | Next |
//! |-------|------|
//! | `Attempt(n)`, no failures | `Success` |
//! | `Attempt(n)`, failures, n < 3 | `Attempt(n + 1)` with the retry queue |
//! | `Attempt(3)`, failures | `Exhausted` |
//!
//! Each attempt gets a fresh [`ResultsTable`]; nothing carries over
//! except the retry units built from the previous attempt's failures.

pub mod results;
pub mod retry;
pub mod runner;
pub mod scheduler;

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{Config, OrchestratorConfig};
use crate::framework::{CommandBuilder, TestSpec};
use crate::provider::{RemoteEnvironment, RemoteExecutor};
use crate::report::Reporter;

pub use results::{FailedTest, ProgressSnapshot, ResultsTable};
pub use retry::{FailureClassifier, RetryKind, RetryUnit};
pub use runner::QueueRunner;
pub use scheduler::Scheduler;

/// Maximum number of attempts per run, the first included.
pub const MAX_ATTEMPTS: usize = 3;

/// Errors raised by the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{} tests still failing after {attempts} attempts", .failed.len())]
    ExhaustedRetries { attempts: usize, failed: Vec<String> },

    #[error("Invalid failure pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Where and as whom test commands run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    pub connect_attempts: u32,
}

impl RemoteTarget {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            host: config.host.clone(),
            user: config.ssh_user.clone(),
            connect_attempts: config.ssh_connect_attempts,
        }
    }
}

/// Position in the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Attempt `n` (1-based) is about to run.
    Attempt(usize),
    /// The last attempt had no failures.
    Success,
    /// The final attempt still had failures.
    Exhausted,
}

impl AttemptState {
    /// The state after the current attempt finished.
    pub fn advance(self, has_failures: bool) -> Self {
        match self {
            AttemptState::Attempt(_) if !has_failures => AttemptState::Success,
            AttemptState::Attempt(n) if n < MAX_ATTEMPTS => AttemptState::Attempt(n + 1),
            AttemptState::Attempt(_) => AttemptState::Exhausted,
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptState::Attempt(_))
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Whether the last attempt had no failures.
    pub success: bool,
    /// Number of attempts executed.
    pub attempts: usize,
    /// Titles still failing after the last attempt, in discovery order.
    pub failed_titles: Vec<String>,
    /// Wall-clock duration of the whole run.
    pub duration: Duration,
}

impl RunOutcome {
    /// Process exit code: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.success { 0 } else { 1 }
    }

    /// Converts an unsuccessful outcome into an error.
    pub fn into_result(self) -> Result<Self, OrchestratorError> {
        if self.success {
            Ok(self)
        } else {
            Err(OrchestratorError::ExhaustedRetries {
                attempts: self.attempts,
                failed: self.failed_titles,
            })
        }
    }
}

/// Runs queues and retries their failures up to [`MAX_ATTEMPTS`] times.
///
/// # Type Parameters
///
/// - `E`: executes test commands on the host
/// - `V`: idles and resets the host between attempts
/// - `R`: receives progress and failure reports
pub struct RetryController<E, V, R> {
    executor: E,
    environment: V,
    reporter: R,
    classifier: FailureClassifier,
    target: RemoteTarget,
    archive_previous_runs: bool,
}

impl<E, V, R> RetryController<E, V, R>
where
    E: RemoteExecutor,
    V: RemoteEnvironment,
    R: Reporter,
{
    /// Creates a controller from configuration.
    ///
    /// Fails only if the configured classifier patterns do not compile.
    pub fn new(
        config: &Config,
        executor: E,
        environment: V,
        reporter: R,
    ) -> Result<Self, OrchestratorError> {
        let builder = CommandBuilder::new(&config.commands);
        Ok(Self {
            executor,
            environment,
            reporter,
            classifier: FailureClassifier::new(builder, &config.classifier)?,
            target: RemoteTarget::from_config(&config.orchestrator),
            archive_previous_runs: config.orchestrator.archive_previous_runs,
        })
    }

    /// Runs `queues`, then retries failures until they pass or the
    /// attempt bound is reached.
    pub async fn run(&self, queues: Vec<Vec<TestSpec>>) -> RunOutcome {
        let start = Instant::now();
        let scheduler = Scheduler::new(&self.executor, &self.reporter, &self.target);

        let mut queues = queues;
        let mut state = AttemptState::Attempt(1);
        let mut attempts = 0;
        let mut failed_titles = Vec::new();

        while let AttemptState::Attempt(attempt) = state {
            attempts = attempt;
            info!("Starting test run #{} of {}", attempt, MAX_ATTEMPTS);

            let table = ResultsTable::new(std::mem::take(&mut queues));
            self.reporter
                .on_attempt_start(attempt, MAX_ATTEMPTS, &table)
                .await;
            scheduler.run(&table).await;

            let failures = table.failures();
            failed_titles = failures.iter().map(|f| f.spec.title.clone()).collect();
            state = state.advance(!failures.is_empty());

            if failures.is_empty() {
                info!("Test run #{} passed", attempt);
                break;
            }

            info!(
                "Test run #{} finished with {} failures",
                attempt,
                failures.len()
            );

            if let Err(e) = self
                .environment
                .idle(&self.target.host, &self.target.user)
                .await
            {
                warn!("Failed to idle {}: {}", self.target.host, e);
            }
            self.reporter.on_failures(attempt, &failed_titles).await;

            if state.is_terminal() {
                break;
            }

            let units = self.classifier.classify(&failures);
            debug!(
                "Built {} retry units from {} failures",
                units.len(),
                failures.len()
            );
            queues = vec![units.into_iter().map(|unit| unit.spec).collect()];

            if let Err(e) = self
                .environment
                .reset_test_dir(
                    &self.target.host,
                    &self.target.user,
                    self.archive_previous_runs,
                )
                .await
            {
                warn!("Failed to reset test dir on {}: {}", self.target.host, e);
            }
        }

        let outcome = RunOutcome {
            success: state == AttemptState::Success,
            attempts,
            failed_titles: if state == AttemptState::Success {
                Vec::new()
            } else {
                failed_titles
            },
            duration: start.elapsed(),
        };

        if outcome.success {
            info!("All tests passed after {} attempts", outcome.attempts);
        } else {
            warn!(
                "{} tests still failing after {} attempts",
                outcome.failed_titles.len(),
                outcome.attempts
            );
        }

        self.reporter.on_run_complete(&outcome).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::config::load_config_str;
    use crate::framework::ScenarioRequest;
    use crate::provider::{ExecResult, ProviderError, ProviderResult, RemoteCommand};
    use crate::report::NullReporter;

    /// Answers calls with queued exit statuses, then 0.
    #[derive(Default)]
    struct ScriptedExecutor {
        statuses: Mutex<VecDeque<(i32, String)>>,
        commands: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn with_statuses(statuses: &[i32]) -> Self {
            Self::with_outputs(&statuses.iter().map(|s| (*s, "")).collect::<Vec<_>>())
        }

        fn with_outputs(responses: &[(i32, &str)]) -> Self {
            Self {
                statuses: Mutex::new(
                    responses
                        .iter()
                        .map(|(s, o)| (*s, o.to_string()))
                        .collect(),
                ),
                commands: Mutex::new(Vec::new()),
            }
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn execute(&self, cmd: &RemoteCommand) -> ProviderResult<ExecResult> {
            self.commands.lock().unwrap().push(cmd.command.clone());
            let (exit_status, output) = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((0, String::new()));
            Ok(ExecResult {
                exit_status,
                output,
                duration: Duration::from_millis(1),
            })
        }
    }

    #[derive(Default)]
    struct CountingEnvironment {
        idles: Mutex<usize>,
        resets: Mutex<Vec<bool>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteEnvironment for CountingEnvironment {
        async fn idle(&self, host: &str, _user: &str) -> ProviderResult<()> {
            *self.idles.lock().unwrap() += 1;
            if self.fail {
                return Err(ProviderError::ExecFailed {
                    host: host.to_string(),
                    message: "unreachable".into(),
                });
            }
            Ok(())
        }

        async fn reset_test_dir(&self, host: &str, _user: &str, archive: bool) -> ProviderResult<()> {
            self.resets.lock().unwrap().push(archive);
            if self.fail {
                return Err(ProviderError::ExecFailed {
                    host: host.to_string(),
                    message: "unreachable".into(),
                });
            }
            Ok(())
        }
    }

    fn config() -> Config {
        load_config_str("[orchestrator]\nhost = \"broker.example.com\"\n").unwrap()
    }

    fn controller(
        executor: ScriptedExecutor,
        environment: CountingEnvironment,
    ) -> RetryController<ScriptedExecutor, CountingEnvironment, NullReporter> {
        RetryController::new(&config(), executor, environment, NullReporter).unwrap()
    }

    fn unit(title: &str) -> TestSpec {
        CommandBuilder::new(&config().commands).rake(title, format!("rake {title}"), Default::default(), false)
    }

    #[test]
    fn test_attempt_state_transitions() {
        let first = AttemptState::Attempt(1);
        assert_eq!(first.advance(false), AttemptState::Success);
        assert_eq!(first.advance(true), AttemptState::Attempt(2));
        assert_eq!(AttemptState::Attempt(2).advance(true), AttemptState::Attempt(3));
        assert_eq!(AttemptState::Attempt(3).advance(true), AttemptState::Exhausted);
        assert_eq!(AttemptState::Exhausted.advance(false), AttemptState::Exhausted);
        assert!(AttemptState::Success.is_terminal());
        assert!(!first.is_terminal());
    }

    #[test]
    fn test_outcome_exit_code_and_result() {
        let ok = RunOutcome {
            success: true,
            attempts: 1,
            failed_titles: Vec::new(),
            duration: Duration::ZERO,
        };
        assert_eq!(ok.exit_code(), 0);
        assert!(ok.clone().into_result().is_ok());

        let failed = RunOutcome {
            success: false,
            attempts: 3,
            failed_titles: vec!["Node".into()],
            ..ok
        };
        assert_eq!(failed.exit_code(), 1);
        match failed.into_result() {
            Err(OrchestratorError::ExhaustedRetries { attempts, failed }) => {
                assert_eq!(attempts, 3);
                assert_eq!(failed, vec!["Node"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_target_from_config() {
        let target = RemoteTarget::from_config(&config().orchestrator);
        assert_eq!(target.host, "broker.example.com");
        assert_eq!(target.user, "root");
        assert_eq!(target.connect_attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_success_stops_after_first_attempt() {
        let controller = controller(ScriptedExecutor::default(), CountingEnvironment::default());

        let outcome = controller
            .run(vec![vec![unit("a")], vec![unit("b")]])
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.failed_titles.is_empty());
        assert_eq!(*controller.environment.idles.lock().unwrap(), 0);
        assert!(controller.environment.resets.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_never_more_than_three_attempts() {
        let executor = ScriptedExecutor::with_statuses(&[1, 1, 1, 1, 1]);
        let controller = controller(executor, CountingEnvironment::default());

        let outcome = controller.run(vec![vec![unit("Broker units")]]).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, MAX_ATTEMPTS);
        assert_eq!(outcome.failed_titles, vec!["Broker units"]);
        assert_eq!(controller.executor.commands().len(), 3);
        assert_eq!(*controller.environment.idles.lock().unwrap(), 3);
        assert_eq!(*controller.environment.resets.lock().unwrap(), vec![true, true]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failure_on_second_attempt_then_pass() {
        let executor = ScriptedExecutor::with_statuses(&[2]);
        let controller = controller(executor, CountingEnvironment::default());

        let outcome = controller.run(vec![vec![unit("a")], vec![]]).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(*controller.environment.idles.lock().unwrap(), 1);
        assert_eq!(controller.environment.resets.lock().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rerun_file_then_timeout_chain() {
        let builder = CommandBuilder::new(&config().commands);
        let spec = builder.cucumber(ScenarioRequest::new("Runtime").test_dir("/data/tests"));
        let first_rerun = spec.scenario().unwrap().rerun_file.clone().unwrap();

        let executor = ScriptedExecutor::with_statuses(&[1, 255, 0]);
        let controller = controller(executor, CountingEnvironment::default());

        let outcome = controller.run(vec![vec![spec]]).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);

        let commands = controller.executor.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[1].contains(&format!("@{first_rerun}")));
        assert!(!commands[2].contains(" @"));
        assert!(commands[2].contains("/data/tests/*.feature"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unit_failures_split_into_single_queue() {
        let output = "\
/usr/lib/ruby/gems/1.8/gems/rake-0.9.2/lib/rake/rake_test_loader
  1) Failure:
test_x(FooTest) [/root/broker/test/unit/foo_test.rb:10]:
  2) Failure:
test_y(FooTest) [/root/broker/test/unit/foo_test.rb:22]:
";
        let builder = CommandBuilder::new(&config().commands);
        let spec = builder.rake(
            "Broker units",
            "cd /root/broker; rake test:units",
            Default::default(),
            true,
        );
        let executor = ScriptedExecutor::with_outputs(&[(1, output)]);
        let controller = controller(executor, CountingEnvironment::default());

        let outcome = controller.run(vec![vec![spec]]).await;

        assert!(outcome.success);
        let commands = controller.executor.commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[1].contains("cd /root/broker; ruby -Ilib:test test/unit/foo_test.rb -n test_x"));
        assert!(commands[2].contains("cd /root/broker; ruby -Ilib:test test/unit/foo_test.rb -n test_y"));
    }

    /// Fails the first call at the transport, then passes everything.
    #[derive(Default)]
    struct DroppedConnection {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteExecutor for DroppedConnection {
        async fn execute(&self, cmd: &RemoteCommand) -> ProviderResult<ExecResult> {
            let mut commands = self.commands.lock().unwrap();
            commands.push(cmd.command.clone());
            if commands.len() == 1 {
                return Err(ProviderError::ExecFailed {
                    host: cmd.host.clone(),
                    message: "connection refused".into(),
                });
            }
            Ok(ExecResult {
                exit_status: 0,
                output: String::new(),
                duration: Duration::ZERO,
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transport_error_retries_full_scope() {
        let builder = CommandBuilder::new(&config().commands);
        let spec = builder.cucumber(ScenarioRequest::new("Runtime").test_dir("/data/tests"));
        let first_rerun = spec.scenario().unwrap().rerun_file.clone().unwrap();

        let controller = RetryController::new(
            &config(),
            DroppedConnection::default(),
            CountingEnvironment::default(),
            NullReporter,
        )
        .unwrap();

        let outcome = controller.run(vec![vec![spec]]).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        let commands = controller.executor.commands.lock().unwrap();
        assert!(!commands[1].contains(&format!("@{first_rerun}")));
        assert!(commands[1].contains("/data/tests/*.feature"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_environment_errors_do_not_stop_retries() {
        let executor = ScriptedExecutor::with_statuses(&[1]);
        let environment = CountingEnvironment {
            fail: true,
            ..Default::default()
        };
        let controller = controller(executor, environment);

        let outcome = controller.run(vec![vec![unit("a")]]).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(*controller.environment.idles.lock().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_archive_setting_is_passed_to_reset() {
        let mut config = config();
        config.orchestrator.archive_previous_runs = false;
        let controller = RetryController::new(
            &config,
            ScriptedExecutor::with_statuses(&[1]),
            CountingEnvironment::default(),
            NullReporter,
        )
        .unwrap();

        controller.run(vec![vec![unit("a")]]).await;

        assert_eq!(*controller.environment.resets.lock().unwrap(), vec![false]);
    }
}
