//! Tokio-backed [`ProcessTransport`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};

use crate::cancel::cancelled_or_pending;
use crate::process::ChildGuard;
use crate::registry::RunningSet;
use crate::{AbortReason, ExecFut, ExecRequest, ProcessTransport, RawOutput, TransportError};

/// Cap on captured bytes per stream. Excess output is drained and dropped.
pub const MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// Exit code reported for a child terminated by a signal.
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// How long to wait for a killed child to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long to keep draining pipes after the child has exited.
/// A grandchild that inherited the pipes could otherwise hold them open forever.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Environment layered over the inherited one for every child.
///
/// Keeps tool output plain (no ANSI colour) and locale-independent.
#[must_use]
pub fn child_env() -> Vec<(&'static str, &'static str)> {
    let mut env = vec![("NO_COLOR", "1")];
    if !cfg!(windows) {
        env.push(("LC_ALL", "C"));
    }
    env
}

/// Resolve a bare executable name against `PATH` (and `PATHEXT` on Windows).
///
/// Anything unresolvable is returned unchanged so the spawn reports the
/// real error.
#[must_use]
pub fn resolve_program(program: &Path, cwd: &Path) -> PathBuf {
    if program.components().count() != 1 {
        return program.to_path_buf();
    }
    which::which_in(program, std::env::var_os("PATH"), cwd).unwrap_or_else(|_| program.to_path_buf())
}

/// Spawns real processes with `tokio::process`.
#[derive(Default)]
pub struct TokioTransport {
    running: RunningSet,
}

impl TokioTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executions currently holding a child.
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Whether [`ProcessTransport::terminate_all`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.running.is_closed()
    }

    async fn run(&self, request: ExecRequest) -> Result<RawOutput, TransportError> {
        let ExecRequest {
            program,
            args,
            cwd,
            options,
        } = request;

        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(TransportError::Aborted {
                reason: AbortReason::Cancelled,
            });
        }
        let Some(registration) = self.running.register() else {
            return Err(TransportError::Aborted {
                reason: AbortReason::Disposed,
            });
        };

        let mut cmd = Command::new(resolve_program(&program, &cwd));
        cmd.args(&args)
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in child_env() {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        crate::process::set_new_session(&mut cmd);

        let command = args.first().cloned().unwrap_or_default();
        tracing::debug!(program = %program.display(), command = %command, "spawning tool");

        let child = cmd.spawn().map_err(|source| TransportError::Spawn {
            program: program.clone(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);

        let pipes_missing = || TransportError::Spawn {
            program: program.clone(),
            source: std::io::Error::other("child pipes were not captured"),
        };
        let stdin = guard.child_mut().stdin.take().ok_or_else(pipes_missing)?;
        let stdout = guard.child_mut().stdout.take().ok_or_else(pipes_missing)?;
        let stderr = guard.child_mut().stderr.take().ok_or_else(pipes_missing)?;

        let stdin_task = tokio::spawn(feed_stdin(stdin, options.stdin));
        let stdout_task = tokio::spawn(read_bounded(stdout, MAX_OUTPUT_BYTES));
        let stderr_task = tokio::spawn(read_bounded(stderr, MAX_OUTPUT_BYTES));

        let waited = tokio::select! {
            status = guard.child_mut().wait() => Ok(status),
            () = tokio::time::sleep(options.timeout) => Err(AbortReason::TimedOut(options.timeout)),
            () = cancelled_or_pending(options.cancel.as_ref()) => Err(AbortReason::Cancelled),
            () = registration.token().cancelled() => Err(AbortReason::Disposed),
        };

        let status = match waited {
            Ok(Ok(status)) => {
                guard.disarm();
                status
            }
            Ok(Err(source)) => {
                stdin_task.abort();
                stdout_task.abort();
                stderr_task.abort();
                return Err(TransportError::Spawn { program, source });
            }
            Err(reason) => {
                tracing::debug!(command = %command, %reason, "aborting tool process");
                guard.kill_and_reap(KILL_GRACE).await;
                stdin_task.abort();
                stdout_task.abort();
                stderr_task.abort();
                return Err(TransportError::Aborted { reason });
            }
        };

        let _ = stdin_task.await;
        let stdout = collect(stdout_task, &command, "stdout").await;
        let stderr = collect(stderr_task, &command, "stderr").await;

        let exit_code = status.code().unwrap_or(SIGNAL_EXIT_CODE);
        tracing::debug!(command = %command, exit_code, "tool exited");

        Ok(RawOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

impl ProcessTransport for TokioTransport {
    fn execute(&self, request: ExecRequest) -> ExecFut<'_> {
        Box::pin(self.run(request))
    }

    fn terminate_all(&self) -> usize {
        let signalled = self.running.close();
        if signalled > 0 {
            tracing::info!(count = signalled, "terminating running tool processes");
        }
        signalled
    }
}

/// Write the optional payload, then close stdin so readers see EOF.
async fn feed_stdin(mut stdin: ChildStdin, payload: Option<String>) {
    if let Some(payload) = payload
        && let Err(e) = stdin.write_all(payload.as_bytes()).await
    {
        // A child that exits without reading its input is not an error.
        if e.kind() != std::io::ErrorKind::BrokenPipe {
            tracing::debug!("failed to write tool stdin: {e}");
        }
    }
    drop(stdin);
}

async fn read_bounded<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        // Keep draining past the cap so the child never blocks on a full pipe.
        let remaining = max_bytes.saturating_sub(buf.len());
        let take = remaining.min(n);
        buf.extend_from_slice(&tmp[..take]);
        if take < n {
            truncated = true;
        }
    }

    (buf, truncated)
}

async fn collect(
    task: tokio::task::JoinHandle<(Vec<u8>, bool)>,
    command: &str,
    stream: &'static str,
) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, task).await {
        Ok(Ok((bytes, truncated))) => {
            if truncated {
                tracing::warn!(command = %command, stream, "tool output truncated at {MAX_OUTPUT_BYTES} bytes");
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Ok(Err(e)) => {
            tracing::debug!(command = %command, stream, "pipe reader failed: {e}");
            String::new()
        }
        Err(_) => {
            abort.abort();
            tracing::warn!(command = %command, stream, "pipe still open after exit; output dropped");
            String::new()
        }
    }
}
