//! Configuration loading and schema definitions for gauntlet.
//!
//! This module provides types and functions for loading gauntlet
//! configuration from TOML files or strings. The schema covers the target
//! host, command construction defaults, failure classification patterns,
//! remote environment resets and console reporting.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads gauntlet configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use gauntlet::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("gauntlet.toml"))?;
/// println!("Target host: {}", config.orchestrator.host);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads gauntlet configuration from a TOML string.
///
/// # Example
///
/// ```
/// use gauntlet::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [orchestrator]
///     host = "broker.example.com"
/// "#)?;
///
/// assert_eq!(config.orchestrator.ssh_user, "root");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_defaults() {
        let config = load_config_str(
            r#"
            [orchestrator]
            host = "broker.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.host, "broker.example.com");
        assert_eq!(config.orchestrator.ssh_user, "root");
        assert_eq!(config.orchestrator.ssh_connect_attempts, 1);
        assert!(config.orchestrator.archive_previous_runs);
        assert_eq!(config.commands.base_os, "fedora");
        assert_eq!(config.commands.default_timeout_secs, 5400);
        assert_eq!(
            config.commands.other_outputs.get("junit").map(String::as_str),
            Some("/tmp/rhc/cucumber_results")
        );
        assert_eq!(config.classifier.scenario_runner, "cucumber");
        assert_eq!(config.environment.results_dir, "/tmp/rhc");
        assert_eq!(config.environment.reset_timeout_secs, 120);
        assert!(config.environment.idle_command.is_none());
        assert!(config.report.show_output);
    }

    #[test]
    fn test_load_config_overrides() {
        let config = load_config_str(
            r#"
            [orchestrator]
            host = "10.0.0.5"
            ssh_user = "ec2-user"
            archive_previous_runs = false

            [commands]
            base_os = "rhel"
            rerun_dir = "/var/tmp"

            [commands.other_outputs]
            junit = "/srv/results"
            html = "/srv/report.html"

            [environment]
            idle_command = "oo-admin-ctl-gears idleall"
            "#,
        )
        .unwrap();

        assert_eq!(config.orchestrator.ssh_user, "ec2-user");
        assert!(!config.orchestrator.archive_previous_runs);
        assert_eq!(config.commands.base_os, "rhel");
        assert_eq!(config.commands.rerun_dir, "/var/tmp");
        assert_eq!(config.commands.other_outputs.len(), 2);
        assert_eq!(
            config.environment.idle_command.as_deref(),
            Some("oo-admin-ctl-gears idleall")
        );
    }

    #[test]
    fn test_load_config_requires_host() {
        let err = load_config_str("[report]\nshow_output = false\n").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nhost = \"file-host\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.orchestrator.host, "file-host");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/gauntlet.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
