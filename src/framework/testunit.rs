//! Unit-family (rake / Test::Unit) command construction.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{CommandBuilder, TestFamily, TestOptions, TestSpec, UnitOptions};

impl CommandBuilder {
    /// Builds a unit-family spec around `script`, e.g.
    /// `cd /root/broker; rake test:functionals`.
    pub fn rake(
        &self,
        title: impl Into<String>,
        script: impl Into<String>,
        env: BTreeMap<String, String>,
        retry_individually: bool,
    ) -> TestSpec {
        self.unit_spec(title.into(), script.into(), env, retry_individually, self.default_timeout)
    }

    /// Builds a spec that runs one named test method from one file.
    ///
    /// `chdir` is a leading `cd <dir>; ` taken from the failed command, or
    /// empty. `timeout` is usually the failed spec's.
    pub fn single_unit_test(
        &self,
        class_name: &str,
        test_name: &str,
        file: &str,
        chdir: &str,
        env: BTreeMap<String, String>,
        timeout: Duration,
    ) -> TestSpec {
        self.unit_spec(
            format!("{class_name} ({test_name})"),
            format!("{chdir}ruby -Ilib:test {file} -n {test_name}"),
            env,
            true,
            timeout,
        )
    }

    fn unit_spec(
        &self,
        title: String,
        script: String,
        env: BTreeMap<String, String>,
        retry_individually: bool,
        timeout: Duration,
    ) -> TestSpec {
        TestSpec::new(
            title,
            self.wrap(&script, &env),
            TestOptions {
                timeout,
                env,
                family: TestFamily::Unit(UnitOptions {
                    retry_individually,
                    script,
                }),
            },
        )
    }
}
