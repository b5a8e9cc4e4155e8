//! Process transport for the governed tool.
//!
//! Executes one external command per call and returns its raw output
//! without interpretation. Arguments always travel as a discrete array;
//! there is no shell between Lantern and the tool.
//!
//! A non-zero exit is *not* a transport failure: some tool commands use exit
//! codes to report findings, and interpreting them is the client's job. The
//! transport fails only when the process cannot be started or when the call
//! is aborted (cancellation, timeout, disposal).

mod cancel;
mod exec;
mod process;
mod registry;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use lantern_types::settings::DEFAULT_TIMEOUT_MS;

pub use cancel::CancelToken;
pub use exec::{MAX_OUTPUT_BYTES, SIGNAL_EXIT_CODE, TokioTransport, child_env, resolve_program};

/// Timeout applied when the caller does not choose one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);

/// Future returned by [`ProcessTransport::execute`].
pub type ExecFut<'a> = Pin<Box<dyn Future<Output = Result<RawOutput, TransportError>> + Send + 'a>>;

/// Per-call knobs.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Written to the child's stdin before it is closed.
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub cancel: Option<CancelToken>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
            cancel: None,
        }
    }
}

impl ExecOptions {
    #[must_use]
    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// One invocation of the tool.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub options: ExecOptions,
}

impl ExecRequest {
    /// First argument, which names the subcommand.
    #[must_use]
    pub fn command(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }
}

/// Captured output of a process that ran to completion (any exit code).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; [`SIGNAL_EXIT_CODE`] when terminated by a signal.
    pub exit_code: i32,
}

impl RawOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The caller's cancel token fired.
    Cancelled,
    TimedOut(Duration),
    /// The transport was disposed while the process ran.
    Disposed,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut(after) => write!(f, "timed out after {} ms", after.as_millis()),
            Self::Disposed => f.write_str("transport disposed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The executable could not be started, or its pipes could not be driven.
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("process {reason}")]
    Aborted { reason: AbortReason },
}

/// Executes one external command per call.
///
/// Implementations must pass `args` as a discrete argument array and must
/// resolve with [`RawOutput`] for every exit code.
pub trait ProcessTransport: Send + Sync {
    fn execute(&self, request: ExecRequest) -> ExecFut<'_>;

    /// Kill every child still running and refuse new executions.
    ///
    /// Returns how many in-progress executions were signalled.
    fn terminate_all(&self) -> usize;
}
