//! Recurring probe with debounced alerting.
//!
//! A [`PollCoordinator`] ticks a [`PollSignal`] on an interval. Each tick is
//! skipped outright while the previous poll for the same key is still
//! running. Results feed a [`Hysteresis`], which raises an alert only after
//! `alert_threshold` consecutive true readings and clears it only after
//! `clear_threshold` consecutive false readings. Failed polls are noise and
//! move neither counter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use lantern_transport::CancelToken;
use lantern_types::{CorrelatorSettings, CorrelatorStatus};
use lantern_types::settings::{DEFAULT_ALERT_THRESHOLD, DEFAULT_CLEAR_THRESHOLD};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::client::CommandClient;
use crate::commands;
use crate::error::ClientError;
use crate::in_flight::InFlightRegistry;

/// Key under which correlator polls are registered.
pub const CORRELATOR_POLL_KEY: &str = "correlator-poll";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisConfig {
    pub alert_threshold: u32,
    pub clear_threshold: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            clear_threshold: DEFAULT_CLEAR_THRESHOLD,
        }
    }
}

impl HysteresisConfig {
    /// Thresholds below 1 are raised to 1.
    #[must_use]
    pub fn new(alert_threshold: u32, clear_threshold: u32) -> Self {
        Self {
            alert_threshold: alert_threshold.max(1),
            clear_threshold: clear_threshold.max(1),
        }
    }
}

impl From<&CorrelatorSettings> for HysteresisConfig {
    fn from(settings: &CorrelatorSettings) -> Self {
        Self::new(settings.alert_threshold(), settings.clear_threshold())
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Condition(bool),
    /// The poll failed; says nothing about the condition.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    Raised,
    Cleared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollState {
    pub consecutive_true: u32,
    pub consecutive_false: u32,
}

/// Debounces a boolean signal into an alerted flag.
#[derive(Debug, Clone, Default)]
pub struct Hysteresis {
    config: HysteresisConfig,
    state: PollState,
    alerted: bool,
}

impl Hysteresis {
    #[must_use]
    pub fn new(config: HysteresisConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Fold one outcome in. Returns the transition it caused, if any.
    pub fn record(&mut self, outcome: PollOutcome) -> Option<AlertTransition> {
        let PollOutcome::Condition(captured) = outcome else {
            return None;
        };
        if captured {
            self.state.consecutive_true = self.state.consecutive_true.saturating_add(1);
            self.state.consecutive_false = 0;
            if !self.alerted && self.state.consecutive_true >= self.config.alert_threshold {
                self.alerted = true;
                return Some(AlertTransition::Raised);
            }
        } else {
            self.state.consecutive_false = self.state.consecutive_false.saturating_add(1);
            self.state.consecutive_true = 0;
            if self.alerted && self.state.consecutive_false >= self.config.clear_threshold {
                self.alerted = false;
                return Some(AlertTransition::Cleared);
            }
        }
        None
    }

    #[must_use]
    pub fn alerted(&self) -> bool {
        self.alerted
    }

    #[must_use]
    pub fn state(&self) -> PollState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> HysteresisConfig {
        self.config
    }

    /// New thresholds apply from the next recorded outcome; counters are kept.
    pub fn set_config(&mut self, config: HysteresisConfig) {
        self.config = config;
    }
}

/// A boolean condition that can be polled.
pub trait PollSignal: Send + Sync {
    /// In-flight registry key; one poll per key at a time.
    fn key(&self) -> &str;

    fn poll(&self, cancel: CancelToken) -> BoxFuture<'_, Result<bool, ClientError>>;
}

/// Polls `correlator status` and reads `captured`.
#[derive(Debug, Clone)]
pub struct CorrelatorSignal {
    client: Arc<CommandClient>,
}

impl CorrelatorSignal {
    #[must_use]
    pub fn new(client: Arc<CommandClient>) -> Self {
        Self { client }
    }
}

impl PollSignal for CorrelatorSignal {
    fn key(&self) -> &str {
        CORRELATOR_POLL_KEY
    }

    fn poll(&self, cancel: CancelToken) -> BoxFuture<'_, Result<bool, ClientError>> {
        Box::pin(async move {
            let status: CorrelatorStatus = self
                .client
                .exec_json(commands::correlator_status().with_cancel(cancel))
                .await?;
            Ok(status.captured)
        })
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// A poll for this key was already running; nothing was spawned.
    Skipped,
    Started(JoinHandle<PollOutcome>),
}

pub struct PollCoordinator {
    signal: Arc<dyn PollSignal>,
    registry: InFlightRegistry,
    hysteresis: Arc<Mutex<Hysteresis>>,
    alerts: Arc<watch::Sender<bool>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PollCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollCoordinator")
            .field("key", &self.signal.key())
            .field("alerted", &self.is_alerted())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PollCoordinator {
    #[must_use]
    pub fn new(
        signal: Arc<dyn PollSignal>,
        registry: InFlightRegistry,
        config: HysteresisConfig,
    ) -> Self {
        let (alerts, _) = watch::channel(false);
        Self {
            signal,
            registry,
            hysteresis: Arc::new(Mutex::new(Hysteresis::new(config))),
            alerts: Arc::new(alerts),
            timer: Mutex::new(None),
        }
    }

    /// Correlator monitor sharing `client`'s in-flight registry.
    #[must_use]
    pub fn correlator(client: Arc<CommandClient>, config: HysteresisConfig) -> Self {
        let registry = client.in_flight().clone();
        Self::new(Arc::new(CorrelatorSignal::new(client)), registry, config)
    }

    fn hysteresis(&self) -> MutexGuard<'_, Hysteresis> {
        self.hysteresis.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Poll once unless a poll for this key is already running.
    pub fn tick(&self) -> TickOutcome {
        let Some(slot) = self.registry.try_acquire(self.signal.key()) else {
            debug!(key = self.signal.key(), "poll still in flight; tick skipped");
            return TickOutcome::Skipped;
        };
        let signal = Arc::clone(&self.signal);
        let hysteresis = Arc::clone(&self.hysteresis);
        let alerts = Arc::clone(&self.alerts);

        TickOutcome::Started(tokio::spawn(async move {
            let outcome = match signal.poll(slot.token().clone()).await {
                Ok(captured) => PollOutcome::Condition(captured),
                Err(err) => {
                    debug!(key = slot.key(), error = %err, "poll failed");
                    PollOutcome::Error
                }
            };
            let transition = hysteresis
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(outcome);
            match transition {
                Some(AlertTransition::Raised) => {
                    info!(key = slot.key(), "alert raised");
                    alerts.send_replace(true);
                }
                Some(AlertTransition::Cleared) => {
                    info!(key = slot.key(), "alert cleared");
                    alerts.send_replace(false);
                }
                None => {}
            }
            drop(slot);
            outcome
        }))
    }

    /// Tick every `period`, replacing any running timer. The first tick fires immediately.
    pub fn start(self: &Arc<Self>, period: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                let _ = coordinator.tick();
            }
        });
        if let Some(previous) = self.timer().replace(handle) {
            previous.abort();
        }
        debug!(key = self.signal.key(), period_ms = period.as_millis(), "poller started");
    }

    /// Stop ticking. A poll already running is left to finish.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.timer().take() else {
            return false;
        };
        handle.abort();
        debug!(key = self.signal.key(), "poller stopped");
        true
    }

    /// Stop ticking and cancel the running poll.
    pub fn shutdown(&self) {
        self.stop();
        self.registry.cancel(self.signal.key());
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer().as_ref().is_some_and(|h| !h.is_finished())
    }

    #[must_use]
    pub fn is_alerted(&self) -> bool {
        *self.alerts.borrow()
    }

    /// Receives the alerted flag on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.alerts.subscribe()
    }

    #[must_use]
    pub fn poll_state(&self) -> PollState {
        self.hysteresis().state()
    }

    pub fn set_thresholds(&self, config: HysteresisConfig) {
        self.hysteresis().set_config(config);
    }
}

impl Drop for PollCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
        }
    }
}
