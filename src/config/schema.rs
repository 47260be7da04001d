//! Configuration schema definitions for gauntlet.
//!
//! This module defines all configuration types that can be deserialized
//! from TOML configuration files. Only the target host is required; every
//! other setting has a default.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── OrchestratorConfig     - Target host, ssh user, archive policy
//! ├── CommandConfig          - Test command construction defaults
//! ├── ClassifierConfig       - Failure locator patterns
//! ├── EnvironmentConfig      - Remote reset/idle actions
//! └── ReportConfig           - Console output settings
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration structure for gauntlet.
///
/// # TOML Structure
///
/// ```toml
/// [orchestrator]
/// host = "broker.example.com"
/// ssh_user = "root"
///
/// [commands]
/// base_os = "fedora"
/// default_timeout_secs = 5400
///
/// [commands.other_outputs]
/// junit = "/tmp/rhc/cucumber_results"
///
/// [environment]
/// results_dir = "/tmp/rhc"
///
/// [report]
/// show_output = true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Target host and attempt-level settings.
    pub orchestrator: OrchestratorConfig,

    /// Defaults used when building test commands.
    #[serde(default)]
    pub commands: CommandConfig,

    /// Patterns used to split failures into retry units.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Remote environment reset settings.
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Console reporting settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Target host and attempt-level settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `ssh_user` | `root` |
/// | `ssh_connect_attempts` | 1 |
/// | `archive_previous_runs` | true |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Host every queue runs against.
    pub host: String,

    /// Remote user for every command.
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    /// Connect attempts handed to the executor for each test command.
    #[serde(default = "default_connect_attempts")]
    pub ssh_connect_attempts: u32,

    /// Archive the previous run's artifacts when resetting the test
    /// directory between attempts instead of deleting them.
    #[serde(default = "default_true")]
    pub archive_previous_runs: bool,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_connect_attempts() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Defaults used by [`CommandBuilder`](crate::framework::CommandBuilder).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandConfig {
    /// Operating system of the target host. Selects the invocation wrapper
    /// (`fedora*`, `rhel`, `centos`, anything else).
    #[serde(default = "default_base_os")]
    pub base_os: String,

    /// Timeout applied to every built test command.
    ///
    /// Default: 5400 (90 minutes)
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Feature directory used when a scenario test names none.
    #[serde(default = "default_test_dir")]
    pub default_test_dir: String,

    /// Directory rerun files are written to on the remote host.
    #[serde(default = "default_rerun_dir")]
    pub rerun_dir: String,

    /// Extra cucumber formatters and their output paths.
    #[serde(default = "default_other_outputs")]
    pub other_outputs: BTreeMap<String, String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            base_os: default_base_os(),
            default_timeout_secs: default_timeout_secs(),
            default_test_dir: default_test_dir(),
            rerun_dir: default_rerun_dir(),
            other_outputs: default_other_outputs(),
        }
    }
}

fn default_base_os() -> String {
    "fedora".to_string()
}

fn default_timeout_secs() -> u64 {
    5400
}

fn default_test_dir() -> String {
    "/data/openshift-test/tests".to_string()
}

fn default_rerun_dir() -> String {
    "/tmp".to_string()
}

fn default_other_outputs() -> BTreeMap<String, String> {
    BTreeMap::from([("junit".to_string(), "/tmp/rhc/cucumber_results".to_string())])
}

/// Patterns the failure classifier matches against captured output.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Command token that precedes a failed scenario locator,
    /// e.g. `cucumber` in `cucumber openshift-test/tests/app.feature:12`.
    #[serde(default = "default_scenario_runner")]
    pub scenario_runner: String,

    /// Path prefix between the runner token and the feature path.
    #[serde(default = "default_locator_prefix")]
    pub scenario_locator_prefix: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            scenario_runner: default_scenario_runner(),
            scenario_locator_prefix: default_locator_prefix(),
        }
    }
}

fn default_scenario_runner() -> String {
    "cucumber".to_string()
}

fn default_locator_prefix() -> String {
    "openshift-test/tests/".to_string()
}

/// Settings for [`ShellEnvironment`](crate::provider::ShellEnvironment).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    /// Directory holding the current run's artifacts.
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// Subdirectories of `results_dir` that stay in place when a run is
    /// archived.
    #[serde(default = "default_preserved_dirs")]
    pub preserved_dirs: Vec<String>,

    /// Report directories whose contents are cleared on every reset.
    #[serde(default = "default_report_dirs")]
    pub report_dirs: Vec<String>,

    /// Cache directories whose contents are cleared on every reset.
    #[serde(default = "default_cache_dirs")]
    pub cache_dirs: Vec<String>,

    /// Command that idles shared remote execution slots. Nothing is run
    /// when unset.
    #[serde(default)]
    pub idle_command: Option<String>,

    /// Timeout for each administrative command.
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            preserved_dirs: default_preserved_dirs(),
            report_dirs: default_report_dirs(),
            cache_dirs: default_cache_dirs(),
            idle_command: None,
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

fn default_results_dir() -> String {
    "/tmp/rhc".to_string()
}

fn default_preserved_dirs() -> Vec<String> {
    vec!["cucumber_results".to_string()]
}

fn default_report_dirs() -> Vec<String> {
    vec!["/root/openshift-test/*/test/reports".to_string()]
}

fn default_cache_dirs() -> Vec<String> {
    vec!["/var/www/openshift/broker/tmp/cache".to_string()]
}

fn default_reset_timeout() -> u64 {
    120
}

/// Console reporting settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Print each test's captured output once it completes.
    #[serde(default = "default_true")]
    pub show_output: bool,

    /// Show a progress bar per attempt.
    #[serde(default)]
    pub progress_bar: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            show_output: true,
            progress_bar: false,
        }
    }
}
