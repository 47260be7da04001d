//! Remote execution contracts.
//!
//! gauntlet never transports commands itself. Everything that touches the
//! target host goes through two narrow traits:
//!
//! - [`RemoteExecutor`] - runs one shell command on a host and reports its
//!   captured output and exit status
//! - [`RemoteEnvironment`] - administrative actions between attempts
//!   (quiescing shared remote state, resetting the test directory)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RemoteExecutor                          │
//! │                                                              │
//! │  execute(RemoteCommand) ──────────► ExecResult               │
//! │        host, command, timeout,       output, exit_status     │
//! │        capture, attempts, user                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Exit Status Convention
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 0 | Success |
//! | 255 | The remote call timed out ([`TIMEOUT_EXIT_STATUS`]) |
//! | other | Generic failure |
//!
//! A timeout is only ever observed through the status. Executors must not
//! return an error for a command that ran and exited non-zero; errors are
//! reserved for the cases where no status exists at all.

pub mod environment;

use std::time::Duration;

use async_trait::async_trait;

pub use environment::{NoopEnvironment, ShellEnvironment};

/// Exit status reserved for a remote call that hit its timeout.
pub const TIMEOUT_EXIT_STATUS: i32 = 255;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur while talking to the remote host.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The command could not be issued or no exit status came back.
    #[error("Failed to execute command on {host}: {message}")]
    ExecFailed { host: String, message: String },

    /// An administrative command ran but exited non-zero.
    #[error("Command on {host} exited with status {exit_status}: {command}")]
    CommandFailed {
        host: String,
        command: String,
        exit_status: i32,
    },
}

/// A command to execute on a remote host.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    /// Host name or address.
    pub host: String,
    /// Shell command text, already wrapped for the target OS.
    pub command: String,
    /// Upper bound for the remote call.
    pub timeout: Duration,
    /// Whether output should be captured and returned.
    pub capture_output: bool,
    /// How many times the transport may try to connect.
    pub connect_attempts: u32,
    /// Remote user.
    pub user: String,
}

impl RemoteCommand {
    /// Create a command with capture enabled, one connect attempt and
    /// `root` as the user.
    pub fn new(host: impl Into<String>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
            timeout,
            capture_output: true,
            connect_attempts: 1,
            user: "root".to_string(),
        }
    }

    /// Set the remote user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the number of connect attempts.
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    /// Enable or disable output capture.
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }
}

/// Result of executing a remote command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit status reported by the transport.
    pub exit_status: i32,
    /// Captured output (stdout and stderr interleaved).
    pub output: String,
    /// Wall-clock duration of the call.
    pub duration: Duration,
}

impl ExecResult {
    /// Check if the command succeeded (status 0).
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Check if the command hit the remote timeout.
    pub fn timed_out(&self) -> bool {
        self.exit_status == TIMEOUT_EXIT_STATUS
    }
}

/// Executes shell commands on remote hosts.
///
/// Each call blocks the calling worker until the command returns or the
/// transport gives up. There is no cancellation of an in-flight call.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `cmd` and return its captured output and exit status.
    async fn execute(&self, cmd: &RemoteCommand) -> ProviderResult<ExecResult>;
}

/// Administrative actions on the remote host.
///
/// Both actions are idempotent. Callers treat failures as non-fatal.
#[async_trait]
pub trait RemoteEnvironment: Send + Sync {
    /// Quiesce shared remote execution state (idle/reset execution slots).
    async fn idle(&self, host: &str, user: &str) -> ProviderResult<()>;

    /// Clear previous run artifacts, optionally archiving them first.
    async fn reset_test_dir(&self, host: &str, user: &str, archive: bool) -> ProviderResult<()>;
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for std::sync::Arc<T> {
    async fn execute(&self, cmd: &RemoteCommand) -> ProviderResult<ExecResult> {
        (**self).execute(cmd).await
    }
}
