//! Test specifications, results and command construction.
//!
//! A [`TestSpec`] is a self-contained description of one remote test
//! invocation: a title, the fully wrapped shell command, tags, and
//! [`TestOptions`]. Specs come in two families:
//!
//! | Family | Runner | Built by |
//! |--------|--------|----------|
//! | [`TestFamily::Scenario`] | cucumber feature files | [`CommandBuilder::cucumber`] |
//! | [`TestFamily::Unit`] | rake / Test::Unit loader | [`CommandBuilder::rake`] |
//!
//! Specs are immutable once built. Retries never edit a spec; the failure
//! classifier builds new ones through the same [`CommandBuilder`].
//!
//! # Invocation Wrapping
//!
//! Every command is wrapped for the target OS before it is stored:
//!
//! ```text
//! fedora*       sudo bash -c "runcon -t openshift_initrc_t bash -c \"<env> <cmd>\""
//! rhel/centos   sudo bash -c "/usr/bin/scl enable ruby193 \"<env> <cmd>\""
//! other         sudo bash -c "<env> <cmd>"
//! ```

pub mod cucumber;
pub mod testunit;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CommandConfig;
use crate::provider::{ExecResult, TIMEOUT_EXIT_STATUS};

pub use cucumber::ScenarioRequest;

/// Environment variable that disables the SELinux `runcon` wrapper on
/// fedora hosts.
pub const SKIP_RUNCON_ENV: &str = "SKIP_RUNCON";

/// An immutable description of one remote test invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Human-readable title used in progress and failure reports.
    pub title: String,

    /// Fully wrapped shell command sent to the host.
    pub command: String,

    /// Tags passed to the runner (scenario family only uses them).
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Timeout, environment and family-specific options.
    pub options: TestOptions,
}

impl TestSpec {
    /// Creates a spec from already-built parts.
    pub fn new(title: impl Into<String>, command: impl Into<String>, options: TestOptions) -> Self {
        Self {
            title: title.into(),
            command: command.into(),
            tags: BTreeSet::new(),
            options,
        }
    }

    /// Scenario options, if this is a scenario-family spec.
    pub fn scenario(&self) -> Option<&ScenarioOptions> {
        match &self.options.family {
            TestFamily::Scenario(opts) => Some(opts),
            TestFamily::Unit(_) => None,
        }
    }

    /// Unit options, if this is a unit-family spec.
    pub fn unit(&self) -> Option<&UnitOptions> {
        match &self.options.family {
            TestFamily::Unit(opts) => Some(opts),
            TestFamily::Scenario(_) => None,
        }
    }
}

/// Options shared by both families plus the family-specific shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOptions {
    /// Upper bound for the remote call.
    pub timeout: Duration,

    /// Variables exported before the command runs.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Family-specific options.
    pub family: TestFamily,
}

/// The two shapes a test can take.
///
/// Keeping these apart makes combinations such as per-test splitting on a
/// feature run unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestFamily {
    /// Feature/scenario files run by cucumber.
    Scenario(ScenarioOptions),
    /// Named test methods run by the Test::Unit loader.
    Unit(UnitOptions),
}

/// Options for scenario-family tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioOptions {
    /// Rerun file this invocation writes its failed scenarios to.
    pub rerun_file: Option<String>,

    /// Feature directory (also passed as `-r` to cucumber).
    pub test_dir: String,

    /// Directory with a Gemfile to bundle before running, if any.
    pub require_dir: Option<String>,

    /// Extra formatters and their output paths.
    #[serde(default)]
    pub other_outputs: BTreeMap<String, String>,

    /// Feature target handed to cucumber: a glob, a file, a
    /// `file:line` pair, or `@<rerun file>`.
    pub selector: String,

    /// How failures located in the output are split on retry.
    #[serde(default)]
    pub granularity: ScenarioGranularity,
}

/// Retry granularity for scenario failures located in runner output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioGranularity {
    /// One retry per distinct feature file.
    #[default]
    PerFeature,
    /// One retry per failed scenario (`file:line`).
    PerScenario,
}

/// Options for unit-family tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOptions {
    /// Split failures into one retry per failed test method.
    pub retry_individually: bool,

    /// The command before OS wrapping. A leading `cd <dir>; ` is carried
    /// into per-test retries.
    pub script: String,
}

/// Result of one test invocation.
///
/// Only ever built from a finished remote call, so `completed` is always
/// true on a stored result. Queue slots that have no result yet are the
/// "still running" tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    /// Captured output.
    pub output: String,
    /// Exit status from the executor.
    pub exit_status: i32,
    /// `exit_status == 0`.
    pub success: bool,
    /// Set once the remote call returned.
    pub completed: bool,
    /// `exit_status == 255`.
    pub timed_out: bool,
    /// How long the remote call took.
    pub duration: Duration,
}

impl TestResult {
    /// Builds a completed result from an exit status.
    pub fn from_exit(output: impl Into<String>, exit_status: i32, duration: Duration) -> Self {
        Self {
            output: output.into(),
            exit_status,
            success: exit_status == 0,
            completed: true,
            timed_out: exit_status == TIMEOUT_EXIT_STATUS,
            duration,
        }
    }

    /// Builds a completed result from an executor result.
    pub fn from_exec(exec: ExecResult) -> Self {
        Self::from_exit(exec.output, exec.exit_status, exec.duration)
    }

    /// Classifies this result for progress reporting.
    pub fn status(&self) -> TestStatus {
        if !self.completed {
            TestStatus::Running
        } else if self.timed_out {
            TestStatus::TimedOut
        } else if self.success {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        }
    }
}

/// Progress category of a queued test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    /// No result recorded yet.
    Running,
    /// Finished with the timeout status.
    TimedOut,
    /// Finished with any other non-zero status.
    Failed,
    /// Finished with status 0.
    Passed,
}

/// Operating system of the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseOs {
    Fedora,
    Rhel,
    Centos,
    Other(String),
}

impl BaseOs {
    /// Parses a configured OS name. Any `fedora*` name is Fedora.
    pub fn parse(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("fedora") {
            BaseOs::Fedora
        } else if lower == "rhel" {
            BaseOs::Rhel
        } else if lower == "centos" {
            BaseOs::Centos
        } else {
            BaseOs::Other(name.to_string())
        }
    }

    /// Whether scenario runs exclude tags that don't apply to RHEL-like
    /// hosts.
    pub fn is_rhel_like(&self) -> bool {
        matches!(self, BaseOs::Rhel | BaseOs::Centos)
    }
}

/// Builds [`TestSpec`]s for both test families.
///
/// The builder is plain data derived from [`CommandConfig`] and is cheap to
/// clone; the failure classifier owns a copy so retry units are built with
/// the same wrapping and defaults as the originals.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    base_os: BaseOs,
    default_timeout: Duration,
    default_test_dir: String,
    rerun_dir: String,
    other_outputs: BTreeMap<String, String>,
}

impl CommandBuilder {
    /// Creates a builder from the `[commands]` config section.
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            base_os: BaseOs::parse(&config.base_os),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            default_test_dir: config.default_test_dir.clone(),
            rerun_dir: config.rerun_dir.trim_end_matches('/').to_string(),
            other_outputs: config.other_outputs.clone(),
        }
    }

    /// Wraps `command` with env exports and the OS-specific invocation.
    pub fn wrap(&self, command: &str, env: &BTreeMap<String, String>) -> String {
        let env_str: String = env
            .iter()
            .map(|(key, value)| format!("export {key}={value}; "))
            .collect();

        match &self.base_os {
            BaseOs::Fedora if env.contains_key(SKIP_RUNCON_ENV) => {
                format!(r#"sudo bash -c "export REGISTER_USER=1 ; {env_str} {command}""#)
            }
            BaseOs::Fedora => format!(
                r#"sudo bash -c "runcon -t openshift_initrc_t bash -c \"export REGISTER_USER=1 ; {env_str} {command}\"""#
            ),
            BaseOs::Rhel | BaseOs::Centos => format!(
                r#"sudo bash -c "/usr/bin/scl enable ruby193 \"export LANG=en_US.UTF-8 ; export REGISTER_USER=1; {env_str} {command}\"""#
            ),
            BaseOs::Other(_) => {
                format!(r#"sudo bash -c "export REGISTER_USER=1 ; {env_str} {command}""#)
            }
        }
    }

    /// A rerun file path no other spec will use.
    fn new_rerun_file(&self) -> String {
        format!(
            "{}/rerun_{}.txt",
            self.rerun_dir,
            uuid::Uuid::new_v4().simple()
        )
    }
}
