//! Failure classification and retry construction.
//!
//! For each failed test the [`FailureClassifier`] picks the smallest scope
//! worth running again. Rules are tried in order; the first that applies
//! wins:
//!
//! | # | Applies to | Retry |
//! |---|------------|-------|
//! | 1 | scenario spec with a rerun file | `@<rerun file>`, or the full feature glob if the run timed out |
//! | 2 | scenario spec without a rerun file, output has `<runner> <prefix>x.feature:N` | one per scenario or one per feature file |
//! | 3 | unit spec with `retry_individually`, Test::Unit failure output | one per failed test method |
//! | 4 | anything else | the original spec, unchanged |
//!
//! A run that timed out, or that never produced an exit status at all,
//! never retries through its rerun file: the file was not (fully) written.
//!
//! Output scraping is done by extractor functions that return an
//! [`Extraction`]. A unit-test entry that doesn't have the exact expected
//! shape (an `Error:` entry has no `[file:line]`) makes the whole
//! extraction [`Extraction::PartialMatch`], and the test falls back to a
//! verbatim retry.

use std::collections::HashSet;

use regex::Regex;
use tracing::debug;

use super::OrchestratorError;
use super::results::{FailedTest, NO_RESULT_EXIT_STATUS};
use crate::config::ClassifierConfig;
use crate::framework::{
    CommandBuilder, ScenarioGranularity, ScenarioOptions, ScenarioRequest, TestResult, TestSpec,
    UnitOptions,
};

/// Marker Test::Unit prints for an assertion failure.
const UNIT_FAILURE_MARKER: &str = "Failure:";

/// Marker identifying output produced under the rake Test::Unit loader.
const UNIT_LOADER_MARKER: &str = "rake_test_loader";

/// `test_x(FooTest) [/abs/path/test/unit/foo_test.rb:10]:`
const UNIT_LOCATOR_PATTERN: &str = r"^(test_\w+)\((\w+Test)\) \[/.*/(test/.*_test\.rb):(\d+)\]:";

/// Any Test::Unit entry line, whatever its class and with or without a
/// location (`Error:` entries carry none).
const UNIT_ENTRY_LINE_PATTERN: &str = r"^(test_\w+)\((\w+)\)";

/// Numbered `Failure:`/`Error:` header preceding each entry.
const UNIT_HEADER_PATTERN: &str = r"^\s*\d+\) (?:Failure|Error):";

/// Leading directory change in a unit script.
const CHDIR_PATTERN: &str = r"^(cd .+?; )";

/// Outcome of scraping output for failure locators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<L> {
    /// No locator found.
    NoMatch,
    /// Every failure line yielded a locator.
    FullMatch(Vec<L>),
    /// Some failure lines couldn't be parsed; splitting is unsafe.
    PartialMatch,
}

/// A failed scenario, relative to the feature directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScenarioLocator {
    pub feature: String,
    pub line: u32,
}

/// A failed Test::Unit test method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitTestLocator {
    pub test_name: String,
    pub class_name: String,
    pub file: String,
    pub line: u32,
}

/// How a retry unit narrows (or keeps) the failed scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryKind {
    /// Scenarios listed in the failed run's rerun file.
    RerunFailedScenarios,
    /// Every feature in the test dir (the run timed out).
    FullScope,
    /// One scenario (`file:line`).
    Scenario,
    /// One feature file.
    Feature,
    /// One Test::Unit test method.
    UnitTest,
    /// The original spec again.
    Verbatim,
}

/// A spec to run in the next attempt and why it has that scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryUnit {
    pub kind: RetryKind,
    pub spec: TestSpec,
}

impl RetryUnit {
    fn new(kind: RetryKind, spec: TestSpec) -> Self {
        Self { kind, spec }
    }
}

/// Turns failed tests into retry units.
///
/// Patterns are compiled once at construction and reused for every
/// attempt.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    builder: CommandBuilder,
    scenario_locator: Regex,
    unit_locator: Regex,
    unit_entry_line: Regex,
    unit_header: Regex,
    chdir: Regex,
}

impl FailureClassifier {
    /// Creates a classifier that builds retry specs with `builder`.
    pub fn new(builder: CommandBuilder, config: &ClassifierConfig) -> Result<Self, OrchestratorError> {
        let scenario_locator = Regex::new(&format!(
            r"{} {}(\S+?\.feature):(\d+)",
            regex::escape(&config.scenario_runner),
            regex::escape(&config.scenario_locator_prefix)
        ))?;

        Ok(Self {
            builder,
            scenario_locator,
            unit_locator: Regex::new(UNIT_LOCATOR_PATTERN)?,
            unit_entry_line: Regex::new(UNIT_ENTRY_LINE_PATTERN)?,
            unit_header: Regex::new(UNIT_HEADER_PATTERN)?,
            chdir: Regex::new(CHDIR_PATTERN)?,
        })
    }

    /// Builds the retry queue for an attempt's failures, preserving their
    /// order.
    pub fn classify(&self, failures: &[FailedTest<'_>]) -> Vec<RetryUnit> {
        failures
            .iter()
            .flat_map(|failed| self.retry_units(failed.spec, failed.result))
            .collect()
    }

    /// Retry units for one failed test. Never empty.
    pub fn retry_units(&self, spec: &TestSpec, result: &TestResult) -> Vec<RetryUnit> {
        let units = if let Some(opts) = spec.scenario() {
            self.scenario_retries(spec, opts, result)
        } else if let Some(opts) = spec.unit() {
            self.unit_retries(spec, opts, result)
        } else {
            None
        };

        units.unwrap_or_else(|| {
            debug!("Retrying '{}' verbatim", spec.title);
            vec![RetryUnit::new(RetryKind::Verbatim, spec.clone())]
        })
    }

    fn scenario_retries(
        &self,
        spec: &TestSpec,
        opts: &ScenarioOptions,
        result: &TestResult,
    ) -> Option<Vec<RetryUnit>> {
        if let Some(rerun_file) = &opts.rerun_file {
            let request = ScenarioRequest::retry_of(spec, opts);
            let unit = if result.timed_out || result.exit_status == NO_RESULT_EXIT_STATUS {
                debug!(
                    "'{}' exited with {} before writing its rerun file, retrying its full scope",
                    spec.title, result.exit_status
                );
                RetryUnit::new(RetryKind::FullScope, self.builder.cucumber(request))
            } else {
                debug!("Retrying '{}' from rerun file {}", spec.title, rerun_file);
                RetryUnit::new(
                    RetryKind::RerunFailedScenarios,
                    self.builder.cucumber(request.rerun_from(rerun_file.as_str())),
                )
            };
            return Some(vec![unit]);
        }

        let Extraction::FullMatch(locators) = self.extract_scenarios(&result.output) else {
            return None;
        };

        let units = match opts.granularity {
            ScenarioGranularity::PerScenario => locators
                .iter()
                .map(|loc| {
                    let request = ScenarioRequest::retry_of(spec, opts)
                        .feature(format!("{}:{}", loc.feature, loc.line));
                    RetryUnit::new(RetryKind::Scenario, self.builder.cucumber(request))
                })
                .collect(),
            ScenarioGranularity::PerFeature => {
                let mut seen = HashSet::new();
                locators
                    .iter()
                    .filter(|loc| seen.insert(loc.feature.as_str()))
                    .map(|loc| {
                        let request =
                            ScenarioRequest::retry_of(spec, opts).feature(loc.feature.as_str());
                        RetryUnit::new(RetryKind::Feature, self.builder.cucumber(request))
                    })
                    .collect()
            }
        };
        debug!("Split '{}' into {:?}", spec.title, locators);
        Some(units)
    }

    fn unit_retries(
        &self,
        spec: &TestSpec,
        opts: &UnitOptions,
        result: &TestResult,
    ) -> Option<Vec<RetryUnit>> {
        if !opts.retry_individually
            || !result.output.contains(UNIT_FAILURE_MARKER)
            || !result.output.contains(UNIT_LOADER_MARKER)
        {
            return None;
        }

        let locators = match self.extract_unit_tests(&result.output) {
            Extraction::FullMatch(locators) => locators,
            Extraction::PartialMatch => {
                debug!(
                    "'{}' has failure lines that can't be split, retrying verbatim",
                    spec.title
                );
                return None;
            }
            Extraction::NoMatch => return None,
        };

        let chdir = self
            .chdir
            .captures(&opts.script)
            .and_then(|caps| caps.get(1))
            .map_or("", |m| m.as_str());

        let units = locators
            .iter()
            .map(|loc| {
                RetryUnit::new(
                    RetryKind::UnitTest,
                    self.builder.single_unit_test(
                        &loc.class_name,
                        &loc.test_name,
                        &loc.file,
                        chdir,
                        spec.options.env.clone(),
                        spec.options.timeout,
                    ),
                )
            })
            .collect();
        Some(units)
    }

    /// Finds every `<runner> <prefix><file>.feature:<line>` locator.
    pub fn extract_scenarios(&self, output: &str) -> Extraction<ScenarioLocator> {
        let locators: Vec<_> = self
            .scenario_locator
            .captures_iter(output)
            .filter_map(|caps| {
                Some(ScenarioLocator {
                    feature: caps[1].to_string(),
                    line: caps[2].parse().ok()?,
                })
            })
            .collect();

        if locators.is_empty() {
            Extraction::NoMatch
        } else {
            Extraction::FullMatch(locators)
        }
    }

    /// Parses Test::Unit failure lines. Duplicate `(class, test, file)`
    /// entries are dropped. The result is [`Extraction::PartialMatch`] when
    /// any entry line has a different shape (such as an `Error:` entry with
    /// no location) or when there are more numbered headers than parsed
    /// entries.
    pub fn extract_unit_tests(&self, output: &str) -> Extraction<UnitTestLocator> {
        let mut locators: Vec<UnitTestLocator> = Vec::new();
        let mut entries = 0;
        let mut headers = 0;

        for line in output.lines() {
            if self.unit_header.is_match(line) {
                headers += 1;
            }

            if let Some(caps) = self.unit_locator.captures(line) {
                let Ok(line_no) = caps[4].parse() else {
                    return Extraction::PartialMatch;
                };
                entries += 1;
                let locator = UnitTestLocator {
                    test_name: caps[1].to_string(),
                    class_name: caps[2].to_string(),
                    file: caps[3].to_string(),
                    line: line_no,
                };
                let duplicate = locators.iter().any(|l| {
                    l.test_name == locator.test_name
                        && l.class_name == locator.class_name
                        && l.file == locator.file
                });
                if !duplicate {
                    locators.push(locator);
                }
            } else if self.unit_entry_line.is_match(line) {
                return Extraction::PartialMatch;
            }
        }

        if headers > entries {
            return Extraction::PartialMatch;
        }

        if locators.is_empty() {
            Extraction::NoMatch
        } else {
            Extraction::FullMatch(locators)
        }
    }
}
