//! Console reporter.
//!
//! Prints plain-text status blocks to stdout. The block headings are the
//! progress vocabulary: `Still Running Tests`, `Timed Out Tests`,
//! `Failed Tests` and `Passed Tests`, followed by `Failures` once an
//! attempt ends with failures.

use std::fmt::Write as _;
use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};

use super::Reporter;
use crate::config::ReportConfig;
use crate::framework::{TestResult, TestSpec};
use crate::orchestrator::RunOutcome;
use crate::orchestrator::results::{ProgressSnapshot, ResultsTable};

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    show_output: bool,
    progress_bar: bool,
    progress: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    /// Create a new console reporter.
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            show_output: config.show_output,
            progress_bar: config.progress_bar,
            progress: Mutex::new(None),
        }
    }

    /// Prints a block, through the progress bar when one is active so the
    /// bar stays at the bottom.
    fn print(&self, text: &str) {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        match progress.as_ref() {
            Some(pb) => pb.println(text),
            None => println!("{}", text),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_attempt_start(&self, attempt: usize, max_attempts: usize, table: &ResultsTable) {
        println!(
            "{}\n",
            console::style(format!("Test run #{attempt} of {max_attempts}")).bold()
        );

        if self.progress_bar {
            let pb = ProgressBar::new(table.test_count() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb);
        }
    }

    async fn on_test_start(&self, _queue: usize, _spec: &TestSpec) {}

    async fn on_test_complete(&self, spec: &TestSpec, result: &TestResult) {
        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            pb.inc(1);
        }

        if self.show_output {
            self.print(&render_output(spec, result));
        }
    }

    async fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let text = render_progress(snapshot);
        if !text.is_empty() {
            self.print(&text);
        }
    }

    async fn on_failures(&self, _attempt: usize, titles: &[String]) {
        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pb.finish_and_clear();
        }
        println!("{}", render_failures(titles));
    }

    async fn on_run_complete(&self, outcome: &RunOutcome) {
        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pb.finish_and_clear();
        }

        println!();
        println!(
            "  Attempts: {} | Duration: {:?}",
            outcome.attempts, outcome.duration
        );
        if outcome.success {
            println!("{}", console::style("All tests passed!").green().bold());
        } else {
            println!(
                "{}",
                console::style(format!(
                    "{} tests still failing after {} attempts:",
                    outcome.failed_titles.len(),
                    outcome.attempts
                ))
                .red()
                .bold()
            );
            for title in &outcome.failed_titles {
                println!("  - {}", title);
            }
        }
    }
}

/// Renders a test's captured output between begin/end markers.
pub fn render_output(spec: &TestSpec, result: &TestResult) -> String {
    let rule = "-----------------------------------------------------------";
    format!(
        "\n{rule}\n  Begin Output From {title} Tests\n{rule}\n\n# {command}\n\n{output}\n\n{rule}\n  End Output From {title} Tests (exit status {status})\n{rule}\n",
        title = spec.title,
        command = spec.command,
        output = result.output.trim_end(),
        status = result.exit_status,
    )
}

/// Renders a progress snapshot. Empty categories are omitted; an empty
/// string means there is nothing to show.
pub fn render_progress(snapshot: &ProgressSnapshot) -> String {
    let mut out = String::new();

    if snapshot.has_running() {
        let mins = snapshot.elapsed.as_secs() / 60;
        let secs = snapshot.elapsed.as_secs() % 60;
        let _ = writeln!(out, "Still Running Tests ({mins}m {secs}s):");
        for (index, titles) in snapshot.still_running.iter().enumerate() {
            if titles.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\t Queue {index}:");
            for title in titles {
                let _ = writeln!(out, "\t\t{title}");
            }
        }
        out.push('\n');
    }

    for (heading, titles) in [
        ("Timed Out Tests", &snapshot.timed_out),
        ("Failed Tests", &snapshot.failed),
        ("Passed Tests", &snapshot.passed),
    ] {
        if titles.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{heading}:");
        for title in titles {
            let _ = writeln!(out, "\t{title}");
        }
        out.push('\n');
    }

    out
}

/// Renders the consolidated failure report for an attempt.
pub fn render_failures(titles: &[String]) -> String {
    format!("Failures\n{}\n", titles.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_render_progress_vocabulary() {
        let snapshot = ProgressSnapshot {
            elapsed: Duration::from_secs(125),
            still_running: vec![vec![], vec!["Broker units".into()]],
            timed_out: vec!["Runtime".into()],
            failed: vec!["Node".into()],
            passed: vec!["Domains".into(), "Apps".into()],
        };

        let text = render_progress(&snapshot);

        assert!(text.starts_with("Still Running Tests (2m 5s):\n"));
        assert!(!text.contains("Queue 0:"));
        assert!(text.contains("\t Queue 1:\n\t\tBroker units\n"));
        assert!(text.contains("Timed Out Tests:\n\tRuntime\n"));
        assert!(text.contains("Failed Tests:\n\tNode\n"));
        assert!(text.contains("Passed Tests:\n\tDomains\n\tApps\n"));
    }

    #[test]
    fn test_render_progress_omits_empty_sections() {
        let snapshot = ProgressSnapshot {
            still_running: vec![vec![]],
            passed: vec!["Apps".into()],
            ..Default::default()
        };

        let text = render_progress(&snapshot);

        assert_eq!(text, "Passed Tests:\n\tApps\n\n");
        assert_eq!(render_progress(&ProgressSnapshot::default()), "");
    }

    #[test]
    fn test_render_failures() {
        let titles = vec!["B".to_string(), "A".to_string()];
        assert_eq!(render_failures(&titles), "Failures\nB\nA\n");
    }

    #[test]
    fn test_render_output_block() {
        let builder = crate::framework::CommandBuilder::new(&Default::default());
        let spec = builder.rake("Units", "rake test", Default::default(), false);
        let result = TestResult::from_exit("3 tests, 0 failures\n", 0, Duration::ZERO);

        let text = render_output(&spec, &result);

        assert!(text.contains("Begin Output From Units Tests"));
        assert!(text.contains(&format!("# {}", spec.command)));
        assert!(text.contains("3 tests, 0 failures\n\n"));
        assert!(text.contains("End Output From Units Tests (exit status 0)"));
    }
}
