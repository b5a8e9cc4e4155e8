//! One activation of Lantern.
//!
//! A [`Session`] owns the command client, the correlator poller, and the
//! gates that decide whether polling runs. Nothing lives in globals: drop or
//! [`Session::dispose`] the session and every timer, in-flight poll, and
//! child process goes with it.
//!
//! Methods that may start the poller must be called inside a tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lantern_client::{CommandClient, ExitPolicy, HysteresisConfig, PollCoordinator};
use lantern_transport::{ProcessTransport, TokioTransport};
use lantern_types::{CapabilitySet, Feature, Settings};
use tokio::sync::watch;
use tracing::{debug, info};

/// Why the poller is or is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollGates {
    pub enabled: bool,
    pub correlator_enabled: bool,
    pub trusted: bool,
    pub capability: bool,
    pub disposed: bool,
}

impl PollGates {
    #[must_use]
    pub fn open(&self) -> bool {
        self.enabled && self.correlator_enabled && self.trusted && self.capability && !self.disposed
    }
}

pub struct Session {
    settings: Mutex<Settings>,
    client: Arc<CommandClient>,
    poller: Arc<PollCoordinator>,
    trusted: AtomicBool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("gates", &self.gates())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

fn exit_policy(settings: &Settings) -> ExitPolicy {
    ExitPolicy::default().extended(&settings.exit_codes)
}

impl Session {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self::with_transport(Arc::new(TokioTransport::new()), settings)
    }

    #[must_use]
    pub fn with_transport(transport: Arc<dyn ProcessTransport>, settings: Settings) -> Self {
        let client = Arc::new(CommandClient::with_transport(
            transport,
            settings.tool.clone(),
            exit_policy(&settings),
        ));
        let poller = Arc::new(PollCoordinator::correlator(
            Arc::clone(&client),
            HysteresisConfig::from(&settings.correlator),
        ));
        Self {
            settings: Mutex::new(settings),
            client,
            poller,
            trusted: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    fn settings_lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings_lock().clone()
    }

    #[must_use]
    pub fn client(&self) -> &Arc<CommandClient> {
        &self.client
    }

    /// Probe capabilities and start polling if every gate is open.
    pub async fn activate(&self) -> CapabilitySet {
        let caps = self.client.capabilities().await;
        info!(
            present = ?caps.present().map(Feature::as_str).collect::<Vec<_>>(),
            "session activated"
        );
        self.reconcile();
        caps
    }

    /// Last probed capabilities; empty before [`Session::activate`].
    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        self.client.cached_capabilities().unwrap_or_default()
    }

    pub fn set_workspace_trusted(&self, trusted: bool) {
        self.trusted.store(trusted, Ordering::SeqCst);
        self.reconcile();
    }

    /// Apply new settings. A changed executable re-probes before polling resumes.
    pub async fn update_settings(&self, settings: Settings) {
        let previous = std::mem::replace(&mut *self.settings_lock(), settings.clone());
        self.client.set_config(settings.tool.clone());
        self.client.set_exit_policy(exit_policy(&settings));
        self.poller
            .set_thresholds(HysteresisConfig::from(&settings.correlator));

        if previous.correlator.interval() != settings.correlator.interval() {
            // Restarted below with the new period.
            self.poller.stop();
        }
        if previous.tool.executable() != settings.tool.executable() {
            self.poller.stop();
            if !self.disposed.load(Ordering::SeqCst) {
                self.client.capabilities().await;
            }
        }
        self.reconcile();
    }

    #[must_use]
    pub fn gates(&self) -> PollGates {
        let settings = self.settings_lock();
        PollGates {
            enabled: settings.enabled,
            correlator_enabled: settings.correlator.enabled(),
            trusted: self.trusted.load(Ordering::SeqCst),
            capability: self.client.has_capability(Feature::Correlator),
            disposed: self.disposed.load(Ordering::SeqCst),
        }
    }

    /// Start or stop the poller to match the gates. Returns whether it runs.
    pub fn reconcile(&self) -> bool {
        let gates = self.gates();
        let running = self.poller.is_running();
        if gates.open() && !running {
            self.poller.start(self.settings_lock().correlator.interval());
            info!("correlator polling started");
        } else if !gates.open() && running {
            self.poller.stop();
            info!(?gates, "correlator polling stopped");
        }
        gates.open()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    #[must_use]
    pub fn is_alerted(&self) -> bool {
        self.poller.is_alerted()
    }

    #[must_use]
    pub fn subscribe_alerts(&self) -> watch::Receiver<bool> {
        self.poller.subscribe()
    }

    /// Stop polling, cancel in-flight work, and kill every child. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.poller.shutdown();
        self.client.dispose();
        debug!("session disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}
