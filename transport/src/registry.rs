//! Registry of executions that may still own a running child.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cancel::CancelToken;

#[derive(Default)]
struct Inner {
    next_id: u64,
    running: HashMap<u64, CancelToken>,
    closed: bool,
}

/// Tracks every in-progress execution so disposal can reach all of them.
///
/// Once closed, new registrations are refused.
#[derive(Default, Clone)]
pub(crate) struct RunningSet {
    inner: Arc<Mutex<Inner>>,
}

impl RunningSet {
    /// Register a new execution. `None` once the set has been closed.
    pub fn register(&self) -> Option<Registration> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return None;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let token = CancelToken::new();
        inner.running.insert(id, token.clone());
        Some(Registration {
            id,
            token,
            set: self.clone(),
        })
    }

    /// Fire every registered token and refuse further registrations.
    pub fn close(&self) -> usize {
        let tokens: Vec<CancelToken> = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.closed = true;
            inner.running.values().cloned().collect()
        };
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .len()
    }

    fn remove(&self, id: u64) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .remove(&id);
    }
}

/// Live entry in a [`RunningSet`]; deregisters on drop.
pub(crate) struct Registration {
    id: u64,
    token: CancelToken,
    set: RunningSet,
}

impl Registration {
    /// Fires when the owning transport is disposed.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}
