//! gauntlet: parallel remote test orchestration with minimized retries.
//!
//! The caller hands over queues of prebuilt [`TestSpec`]s. Each queue runs
//! sequentially on its own worker against one remote host; all queues of
//! an attempt run concurrently. Failed tests are classified and narrowed
//! to the smallest scope worth retrying, and the narrowed batch runs
//! again, up to three attempts in total.
//!
//! # Architecture
//!
//! - **Framework**: builds test specs and their wrapped shell commands
//!   (cucumber scenarios, rake / Test::Unit suites)
//! - **Provider**: executes commands and resets the remote host
//! - **Orchestrator**: runs queues, classifies failures, drives retries
//! - **Report**: progress snapshots and failure reports
//!
//! # Example
//!
//! ```no_run
//! use gauntlet::config::load_config;
//! use gauntlet::framework::{CommandBuilder, ScenarioRequest};
//! use gauntlet::orchestrator::RetryController;
//! use gauntlet::provider::{RemoteExecutor, ShellEnvironment};
//! use gauntlet::report::ConsoleReporter;
//! use std::sync::Arc;
//!
//! async fn run<E: RemoteExecutor + 'static>(executor: Arc<E>) -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("gauntlet.toml"))?;
//!     let builder = CommandBuilder::new(&config.commands);
//!
//!     let queues = vec![
//!         vec![builder.cucumber(ScenarioRequest::new("Runtime").tag("@runtime"))],
//!         vec![builder.rake("Broker units", "cd /root/broker; rake test:units", Default::default(), true)],
//!     ];
//!
//!     let environment = ShellEnvironment::new(executor.clone(), config.environment.clone());
//!     let reporter = ConsoleReporter::new(&config.report);
//!     let controller = RetryController::new(&config, executor, environment, reporter)?;
//!
//!     let outcome = controller.run(queues).await;
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

pub mod config;
pub mod framework;
pub mod orchestrator;
pub mod provider;
pub mod report;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Re-export commonly used types
pub use config::{Config, load_config};
pub use framework::{CommandBuilder, TestResult, TestSpec};
pub use orchestrator::{OrchestratorError, RetryController, RunOutcome};
pub use provider::{RemoteEnvironment, RemoteExecutor};
pub use report::Reporter;

/// Installs the global tracing subscriber: DEBUG when `verbose`, INFO
/// otherwise. `RUST_LOG` directives take precedence when set.
pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(verbose, directives.as_deref())?)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn log_filter(verbose: bool, directives: Option<&str>) -> anyhow::Result<EnvFilter> {
    let directives = directives.unwrap_or(if verbose { "debug" } else { "info" });
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter: {directives}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_defaults() {
        assert_eq!(log_filter(true, None).unwrap().to_string(), "debug");
        assert_eq!(log_filter(false, None).unwrap().to_string(), "info");
    }

    #[test]
    fn test_log_filter_directives_override_verbose() {
        let filter = log_filter(true, Some("gauntlet=trace")).unwrap();
        assert_eq!(filter.to_string(), "gauntlet=trace");
    }
}
