//! Errors surfaced by the command client.

use std::path::PathBuf;

use lantern_transport::{AbortReason, TransportError};

/// Coarse classification for callers that branch on the failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Spawn,
    CommandFailed,
    ParseFailed,
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The executable could not be started: wrong path, not executable,
    /// permission denied. A configuration problem, never retried.
    #[error("cannot run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The tool ran and exited with a code outside the command's success set.
    #[error("`{command}` exited with code {exit_code}: {message}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        /// Trimmed stderr, or stdout when stderr was blank.
        message: String,
    },
    /// The tool reported success but stdout was not valid JSON.
    #[error("`{command}` printed malformed JSON ({source}): {preview}")]
    ParseFailed {
        command: String,
        /// Bounded prefix of the raw output.
        preview: String,
        #[source]
        source: serde_json::Error,
    },
    /// Cancellation, timeout, or disposal fired before the tool finished.
    #[error("`{command}` {reason}")]
    Aborted {
        command: String,
        reason: AbortReason,
    },
}

impl ClientError {
    pub(crate) fn from_transport(command: &str, err: TransportError) -> Self {
        match err {
            TransportError::Spawn { program, source } => Self::Spawn { program, source },
            TransportError::Aborted { reason } => Self::Aborted {
                command: command.to_string(),
                reason,
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::CommandFailed { .. } => ErrorKind::CommandFailed,
            Self::ParseFailed { .. } => ErrorKind::ParseFailed,
            Self::Aborted { .. } => ErrorKind::Aborted,
        }
    }

    /// Exit code for `CommandFailed`.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Whether the user can fix this by changing configuration.
    #[must_use]
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Aborted {
                reason: AbortReason::TimedOut(_),
                ..
            }
        )
    }
}
