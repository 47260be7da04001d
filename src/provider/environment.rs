//! Remote environment actions issued between attempts.
//!
//! [`ShellEnvironment`] implements [`RemoteEnvironment`] on top of any
//! [`RemoteExecutor`] by sending short administrative scripts. It is the
//! implementation used when the caller has no dedicated tooling for these
//! actions. [`NoopEnvironment`] is for hosts that need neither.
//!
//! # Test Directory Layout
//!
//! ```text
//! <results_dir>/                  current run
//! ├── junit/                      recreated on every reset
//! ├── cucumber_results/           kept in place across archived runs
//! ├── run_1/                      archived previous run
//! └── run_2/                      ...
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use super::{ProviderError, ProviderResult, RemoteCommand, RemoteEnvironment, RemoteExecutor};
use crate::config::EnvironmentConfig;

/// Where the reset script is staged on the remote host.
const RESET_SCRIPT_PATH: &str = "/tmp/gauntlet_reset_test_dir.sh";

/// Highest archive slot tried before giving up on archiving.
const MAX_ARCHIVED_RUNS: u32 = 100;

/// Environment actions performed through shell scripts.
pub struct ShellEnvironment<E> {
    executor: E,
    config: EnvironmentConfig,
}

impl<E: RemoteExecutor> ShellEnvironment<E> {
    /// Creates an environment that issues its scripts through `executor`.
    pub fn new(executor: E, config: EnvironmentConfig) -> Self {
        Self { executor, config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.reset_timeout_secs)
    }

    async fn run_checked(&self, host: &str, user: &str, command: String) -> ProviderResult<()> {
        let cmd = RemoteCommand::new(host, command, self.timeout()).user(user);
        let result = self.executor.execute(&cmd).await?;
        if !result.success() {
            return Err(ProviderError::CommandFailed {
                host: host.to_string(),
                command: cmd.command,
                exit_status: result.exit_status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<E: RemoteExecutor> RemoteEnvironment for ShellEnvironment<E> {
    async fn idle(&self, host: &str, user: &str) -> ProviderResult<()> {
        let Some(idle_command) = &self.config.idle_command else {
            debug!("No idle command configured, skipping idle on {}", host);
            return Ok(());
        };

        info!("Idling remote execution state on {}", host);
        self.run_checked(host, user, idle_command.clone()).await
    }

    async fn reset_test_dir(&self, host: &str, user: &str, archive: bool) -> ProviderResult<()> {
        info!(
            "Resetting test directory {} on {} (archive: {})",
            self.config.results_dir, host, archive
        );

        let stage = format!(
            "cat <<'EOF' > {RESET_SCRIPT_PATH}\n{}EOF\nchmod +x {RESET_SCRIPT_PATH}",
            reset_script(&self.config, archive)
        );
        self.run_checked(host, user, stage).await?;
        self.run_checked(host, user, format!("sudo bash -c '{RESET_SCRIPT_PATH}'"))
            .await?;

        for cache_dir in &self.config.cache_dirs {
            self.run_checked(host, user, format!("sudo bash -c \"rm -rf {cache_dir}/*\""))
                .await?;
        }

        Ok(())
    }
}

/// Builds the bash script that clears (or archives) the results directory.
fn reset_script(config: &EnvironmentConfig, archive: bool) -> String {
    let results = &config.results_dir;
    let previous = format!("{results}_previous_runs");
    let mut script = String::new();

    for report_dir in &config.report_dirs {
        script.push_str(&format!("rm -rf {report_dir}/*\n"));
    }

    script.push_str(&format!("if [ -d {results} ]\nthen\n"));
    if archive {
        // Earlier archives move aside so the current run can take the next slot.
        script.push_str(&format!(
            "    if ls {results}/run_* > /dev/null 2>&1\n    then\n        rm -rf {previous}\n        mkdir -p {previous}\n        mv {results}/run_* {previous}\n    fi\n"
        ));

        let mut restore = String::new();
        for kept in &config.preserved_dirs {
            restore.push_str(&format!(
                "                mkdir -p {results}/{kept}/\n                mv {previous}/run_$i/{kept}/* {results}/{kept}/ 2>/dev/null\n"
            ));
        }
        script.push_str(&format!(
            "    if ls {results}/* > /dev/null 2>&1\n    then\n        for i in $(seq 1 {MAX_ARCHIVED_RUNS})\n        do\n            if ! [ -d {previous}/run_$i ]\n            then\n                mkdir -p {previous}/run_$i\n                mv {results}/* {previous}/run_$i\n{restore}                break\n            fi\n        done\n    fi\n"
        ));

        script.push_str(&format!(
            "    if ls {previous}/run_* > /dev/null 2>&1\n    then\n        mv {previous}/run_* {results}/\n        rm -rf {previous}\n    fi\n"
        ));
    } else {
        script.push_str(&format!("    rm -rf {results}\n"));
    }
    script.push_str("fi\n");
    script.push_str(&format!("mkdir -p {results}/junit\n"));

    script
}

/// An environment with nothing to reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnvironment;

#[async_trait]
impl RemoteEnvironment for NoopEnvironment {
    async fn idle(&self, _host: &str, _user: &str) -> ProviderResult<()> {
        Ok(())
    }

    async fn reset_test_dir(&self, _host: &str, _user: &str, _archive: bool) -> ProviderResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ExecResult;
    use std::sync::Mutex;

    struct RecordingExecutor {
        commands: Mutex<Vec<RemoteCommand>>,
        exit_status: i32,
    }

    impl RecordingExecutor {
        fn new(exit_status: i32) -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                exit_status,
            }
        }
    }

    #[async_trait]
    impl RemoteExecutor for RecordingExecutor {
        async fn execute(&self, cmd: &RemoteCommand) -> ProviderResult<ExecResult> {
            self.commands.lock().unwrap().push(cmd.clone());
            Ok(ExecResult {
                exit_status: self.exit_status,
                output: String::new(),
                duration: Duration::ZERO,
            })
        }
    }

    #[test]
    fn test_reset_script_without_archive_removes_results() {
        let config = EnvironmentConfig::default();
        let script = reset_script(&config, false);

        assert!(script.contains("rm -rf /tmp/rhc\n"));
        assert!(script.ends_with("mkdir -p /tmp/rhc/junit\n"));
        assert!(!script.contains("run_$i"));
    }

    #[test]
    fn test_reset_script_with_archive_keeps_formatter_output() {
        let config = EnvironmentConfig::default();
        let script = reset_script(&config, true);

        assert!(script.contains("mkdir -p /tmp/rhc_previous_runs/run_$i"));
        assert!(script.contains("mv /tmp/rhc_previous_runs/run_$i/cucumber_results/*"));
        assert!(script.contains("mv /tmp/rhc_previous_runs/run_* /tmp/rhc/"));
        assert!(!script.contains("rm -rf /tmp/rhc\n"));
    }

    #[tokio::test]
    async fn test_reset_test_dir_issues_stage_run_and_cache_commands() {
        let config = EnvironmentConfig {
            cache_dirs: vec!["/var/cache/app".to_string()],
            ..Default::default()
        };
        let env = ShellEnvironment::new(RecordingExecutor::new(0), config);

        env.reset_test_dir("host1", "root", true).await.unwrap();

        let commands = env.executor.commands.lock().unwrap();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].command.starts_with("cat <<'EOF' > "));
        assert_eq!(
            commands[1].command,
            format!("sudo bash -c '{RESET_SCRIPT_PATH}'")
        );
        assert_eq!(commands[2].command, "sudo bash -c \"rm -rf /var/cache/app/*\"");
        assert!(commands.iter().all(|c| c.timeout == Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_idle_without_command_is_noop() {
        let env = ShellEnvironment::new(RecordingExecutor::new(0), EnvironmentConfig::default());

        env.idle("host1", "root").await.unwrap();

        assert!(env.executor.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_failure_is_reported() {
        let config = EnvironmentConfig {
            idle_command: Some("oo-admin-ctl-gears idleall".to_string()),
            ..Default::default()
        };
        let env = ShellEnvironment::new(RecordingExecutor::new(3), config);

        let err = env.idle("host1", "root").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::CommandFailed { exit_status: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_noop_environment_succeeds() {
        let env = NoopEnvironment;

        env.idle("host1", "root").await.unwrap();
        env.reset_test_dir("host1", "root", true).await.unwrap();
    }
}
