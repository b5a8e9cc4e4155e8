//! Keyed one-at-a-time guard for recurring operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use lantern_transport::CancelToken;

/// Tracks which keyed operations are running. At most one per key.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    running: Arc<Mutex<HashMap<String, CancelToken>>>,
}

impl InFlightRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` while a previous holder is still alive.
    pub fn try_acquire(&self, key: &str) -> Option<InFlightSlot> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.contains_key(key) {
            return None;
        }
        let token = CancelToken::new();
        running.insert(key.to_string(), token.clone());
        Some(InFlightSlot {
            key: key.to_string(),
            token,
            running: Arc::clone(&self.running),
        })
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Signal the holder of `key`. The slot stays claimed until the holder drops it.
    pub fn cancel(&self, key: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every holder; returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        for token in running.values() {
            token.cancel();
        }
        running.len()
    }
}

/// Held for the lifetime of one keyed operation; releases the key on drop.
#[derive(Debug)]
pub struct InFlightSlot {
    key: String,
    token: CancelToken,
    running: Arc<Mutex<HashMap<String, CancelToken>>>,
}

impl InFlightSlot {
    /// Fires when the registry cancels this key.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
