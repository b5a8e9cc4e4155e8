//! Scripted in-memory transport for tests.
//!
//! Records every request synchronously inside `execute()` (before the
//! returned future is polled), so a test can count spawns even while a
//! reply is still held.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Semaphore;

use crate::cancel::cancelled_or_pending;
use crate::{
    AbortReason, CancelToken, ExecFut, ExecRequest, ProcessTransport, RawOutput, TransportError,
};

/// What the mock does for one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Exit(RawOutput),
    /// Behave as if the executable does not exist.
    SpawnFailure,
    /// Wait for [`MockTransport::release`] (or cancellation), then reply.
    Held(Box<MockReply>),
}

impl MockReply {
    /// Exit `code` with `stdout` and empty stderr.
    #[must_use]
    pub fn stdout(code: i32, stdout: impl Into<String>) -> Self {
        Self::Exit(RawOutput {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: code,
        })
    }

    #[must_use]
    pub fn stderr(code: i32, stderr: impl Into<String>) -> Self {
        Self::Exit(RawOutput {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: code,
        })
    }

    #[must_use]
    pub fn held(self) -> Self {
        Self::Held(Box::new(self))
    }
}

type Responder = Box<dyn Fn(&ExecRequest) -> MockReply + Send + Sync>;

pub struct MockTransport {
    calls: Mutex<Vec<ExecRequest>>,
    responder: Responder,
    gate: Semaphore,
    shutdown: CancelToken,
    in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&ExecRequest) -> MockReply + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            gate: Semaphore::new(0),
            shutdown: CancelToken::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Reply the same way to every request.
    pub fn always(reply: MockReply) -> Self {
        Self::new(move |_| reply.clone())
    }

    /// Every request seen so far, in order.
    pub fn calls(&self) -> Vec<ExecRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Argument arrays of every request so far.
    pub fn args_log(&self) -> Vec<Vec<String>> {
        self.calls().into_iter().map(|r| r.args).collect()
    }

    /// Requests whose first argument is `command`.
    pub fn calls_for(&self, command: &str) -> usize {
        self.calls().iter().filter(|r| r.command() == command).count()
    }

    /// Let `n` held replies complete.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Held replies currently waiting.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn reply(&self, reply: MockReply, request: &ExecRequest) -> ExecFut<'_> {
        let cancel = request.options.cancel.clone();
        let program = request.program.clone();
        Box::pin(async move {
            match reply {
                MockReply::Exit(out) => Ok(out),
                MockReply::SpawnFailure => Err(TransportError::Spawn {
                    program,
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
                MockReply::Held(inner) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    let waited = tokio::select! {
                        permit = self.gate.acquire() => {
                            if let Ok(permit) = permit {
                                permit.forget();
                            }
                            Ok(())
                        }
                        () = cancelled_or_pending(cancel.as_ref()) => Err(AbortReason::Cancelled),
                        () = self.shutdown.cancelled() => Err(AbortReason::Disposed),
                    };
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    match waited {
                        Ok(()) => match *inner {
                            MockReply::Exit(out) => Ok(out),
                            MockReply::SpawnFailure | MockReply::Held(_) => {
                                Err(TransportError::Spawn {
                                    program,
                                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                                })
                            }
                        },
                        Err(reason) => Err(TransportError::Aborted { reason }),
                    }
                }
            }
        })
    }
}

impl ProcessTransport for MockTransport {
    fn execute(&self, request: ExecRequest) -> ExecFut<'_> {
        if self.shutdown.is_cancelled() {
            return Box::pin(async {
                Err(TransportError::Aborted {
                    reason: AbortReason::Disposed,
                })
            });
        }
        let reply = (self.responder)(&request);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.reply(reply, &request)
    }

    fn terminate_all(&self) -> usize {
        self.shutdown.cancel();
        self.in_flight()
    }
}
