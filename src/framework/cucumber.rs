//! Scenario-family (cucumber) command construction.
//!
//! By default every cucumber invocation writes a rerun file listing the
//! scenarios that failed. The next attempt can then target `@<rerun file>`
//! and run only those scenarios. Each built spec gets its own rerun file so
//! concurrent queues never write to the same one.
//!
//! # Command Shape
//!
//! ```text
//! cucumber --strict -f progress [-f rerun --out <rerun file>]
//!          [-f <formatter> --out <path>]... [-t <tag>]...
//!          -r <test dir> <selector>
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::{
    CommandBuilder, ScenarioGranularity, ScenarioOptions, TestFamily, TestOptions, TestSpec,
};

/// Tags excluded on RHEL-like hosts.
const RHEL_EXCLUDED_TAGS: [&str; 2] = ["~@not-rhel", "~@not-origin"];

/// Default feature glob when no file is targeted.
pub const ALL_FEATURES: &str = "*.feature";

/// Parameters for one cucumber invocation.
///
/// # Example
///
/// ```
/// use gauntlet::config::CommandConfig;
/// use gauntlet::framework::{CommandBuilder, ScenarioRequest};
///
/// let builder = CommandBuilder::new(&CommandConfig::default());
/// let spec = builder.cucumber(
///     ScenarioRequest::new("Broker extended")
///         .tag("@broker_extended")
///         .test_dir("/data/openshift-test/tests"),
/// );
///
/// assert!(spec.command.contains("-t @broker_extended"));
/// assert!(spec.scenario().unwrap().rerun_file.is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScenarioRequest {
    title: String,
    tags: BTreeSet<String>,
    env: BTreeMap<String, String>,
    old_rerun_file: Option<String>,
    test_dir: Option<String>,
    feature: Option<String>,
    require_dir: Option<String>,
    other_outputs: Option<BTreeMap<String, String>>,
    granularity: ScenarioGranularity,
    timeout: Option<Duration>,
    skip_rerun_file: bool,
}

impl ScenarioRequest {
    /// Starts a request with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Starts a request that re-targets `failed`, keeping its title, tags,
    /// environment, directories, formatters, granularity, timeout and
    /// whether it writes a rerun file.
    pub fn retry_of(failed: &TestSpec, options: &ScenarioOptions) -> Self {
        Self {
            title: failed.title.clone(),
            tags: failed.tags.clone(),
            env: failed.options.env.clone(),
            old_rerun_file: None,
            test_dir: Some(options.test_dir.clone()),
            feature: None,
            require_dir: options.require_dir.clone(),
            other_outputs: Some(options.other_outputs.clone()),
            granularity: options.granularity,
            timeout: Some(failed.options.timeout),
            skip_rerun_file: options.rerun_file.is_none(),
        }
    }

    /// Adds a `-t` tag filter.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds an exported environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Runs only the scenarios listed in a previous run's rerun file.
    pub fn rerun_from(mut self, rerun_file: impl Into<String>) -> Self {
        self.old_rerun_file = Some(rerun_file.into());
        self
    }

    /// Sets the feature directory.
    pub fn test_dir(mut self, dir: impl Into<String>) -> Self {
        self.test_dir = Some(dir.into());
        self
    }

    /// Targets a feature file (optionally `file:line`) relative to the
    /// test dir instead of every feature.
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Bundles the Gemfile in `dir` and runs cucumber through bundler.
    pub fn require_dir(mut self, dir: impl Into<String>) -> Self {
        self.require_dir = Some(dir.into());
        self
    }

    /// Replaces the configured extra formatters.
    pub fn other_outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.other_outputs = Some(outputs);
        self
    }

    /// Overrides the configured default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the spec without a rerun file. Failures are then located
    /// from the runner's output instead.
    pub fn without_rerun_file(mut self) -> Self {
        self.skip_rerun_file = true;
        self
    }

    /// Sets how located failures are split on retry.
    pub fn granularity(mut self, granularity: ScenarioGranularity) -> Self {
        self.granularity = granularity;
        self
    }
}

impl CommandBuilder {
    /// Builds a scenario-family spec.
    pub fn cucumber(&self, request: ScenarioRequest) -> TestSpec {
        let ScenarioRequest {
            title,
            mut tags,
            env,
            old_rerun_file,
            test_dir,
            feature,
            require_dir,
            other_outputs,
            granularity,
            timeout,
            skip_rerun_file,
        } = request;

        let test_dir = test_dir.unwrap_or_else(|| self.default_test_dir.clone());
        let other_outputs = other_outputs.unwrap_or_else(|| self.other_outputs.clone());
        let rerun_file = (!skip_rerun_file).then(|| self.new_rerun_file());

        if self.base_os.is_rhel_like() {
            tags.extend(RHEL_EXCLUDED_TAGS.iter().map(|t| t.to_string()));
        }

        let selector = match old_rerun_file {
            Some(old) => format!("@{old}"),
            None => format!(
                "{}/{}",
                test_dir.trim_end_matches('/'),
                feature.as_deref().unwrap_or(ALL_FEATURES)
            ),
        };

        let mut opts = vec!["--strict".to_string(), "-f progress".to_string()];
        if let Some(rerun_file) = &rerun_file {
            opts.push(format!("-f rerun --out {rerun_file}"));
        }
        opts.extend(
            other_outputs
                .iter()
                .map(|(formatter, path)| format!("-f {formatter} --out {path}")),
        );
        opts.extend(tags.iter().map(|tag| format!("-t {tag}")));
        opts.push(format!("-r {test_dir}"));
        opts.push(selector.clone());
        let opts = opts.join(" ");

        let script = match &require_dir {
            Some(dir) => format!(
                r#"cd {dir}; bundle install --path=gems; bundle exec "cucumber {opts}""#
            ),
            None => format!("cucumber {opts}"),
        };

        TestSpec {
            title,
            command: self.wrap(&script, &env),
            tags,
            options: TestOptions {
                timeout: timeout.unwrap_or(self.default_timeout),
                env,
                family: TestFamily::Scenario(ScenarioOptions {
                    rerun_file,
                    test_dir,
                    require_dir,
                    other_outputs,
                    selector,
                    granularity,
                }),
            },
        }
    }
}
