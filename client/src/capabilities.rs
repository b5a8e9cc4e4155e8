//! Probe-once capability cache.
//!
//! The cache holds at most one pending probe. Every caller that arrives while
//! it runs awaits the same [`Shared`] future, so N concurrent callers cost one
//! probe set. A generation counter discards results from a probe that was
//! started against an executable that has since been replaced.
//!
//! The probe runs on its own task, so its timeout and disposal still apply
//! after every caller has given up waiting.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared, join_all};
use lantern_transport::ProcessTransport;
use lantern_types::{CapabilitySet, Feature, ToolSettings};
use tracing::{debug, warn};

use crate::client::build_request;
use crate::commands;

pub(crate) type PendingProbe = Shared<BoxFuture<'static, CapabilitySet>>;

#[derive(Default)]
pub(crate) struct CapabilityCache {
    generation: u64,
    cached: Option<CapabilitySet>,
    pending: Option<PendingProbe>,
}

/// What a caller should do after consulting the cache.
pub(crate) enum Lookup {
    Ready(CapabilitySet),
    Await { probe: PendingProbe, generation: u64 },
}

impl CapabilityCache {
    /// Return the cached set, or join (starting if needed) the pending probe.
    ///
    /// Runs entirely under the caller's lock so check-then-set is atomic.
    pub(crate) fn lookup(
        &mut self,
        start: impl FnOnce() -> BoxFuture<'static, CapabilitySet>,
    ) -> Lookup {
        if let Some(cached) = &self.cached {
            return Lookup::Ready(cached.clone());
        }
        let probe = match &self.pending {
            Some(pending) => pending.clone(),
            None => {
                let probe = start().shared();
                self.pending = Some(probe.clone());
                probe
            }
        };
        Lookup::Await {
            probe,
            generation: self.generation,
        }
    }

    /// Store a settled probe unless the cache was invalidated meanwhile.
    pub(crate) fn settle(&mut self, generation: u64, caps: &CapabilitySet) {
        if generation != self.generation {
            return;
        }
        self.cached = Some(caps.clone());
        self.pending = None;
    }

    pub(crate) fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.cached = None;
        self.pending = None;
    }

    pub(crate) fn cached(&self) -> Option<&CapabilitySet> {
        self.cached.as_ref()
    }
}

/// Start [`probe_all`] on a runtime task and return a handle to its result.
pub(crate) fn spawn_probe(
    transport: Arc<dyn ProcessTransport>,
    config: ToolSettings,
) -> BoxFuture<'static, CapabilitySet> {
    let task = tokio::spawn(probe_all(transport, config));
    async move {
        task.await.unwrap_or_else(|err| {
            warn!(error = %err, "capability probe task failed");
            CapabilitySet::new()
        })
    }
    .boxed()
}

/// Probe every optional feature concurrently.
///
/// Exit 0 means present. Any other exit, a spawn failure, or a timeout means
/// absent; probe failures never propagate.
pub(crate) async fn probe_all(
    transport: Arc<dyn ProcessTransport>,
    config: ToolSettings,
) -> CapabilitySet {
    let probes = Feature::ALL.into_iter().map(|feature| {
        let transport = Arc::clone(&transport);
        let request = build_request(&config, commands::probe(feature));
        async move {
            let present = match transport.execute(request).await {
                Ok(output) => output.success(),
                Err(err) => {
                    debug!(feature = feature.as_str(), error = %err, "capability probe failed");
                    false
                }
            };
            (feature, present)
        }
    });
    let caps: CapabilitySet = join_all(probes).await.into_iter().collect();
    debug!(
        present = ?caps.present().map(Feature::as_str).collect::<Vec<_>>(),
        "capabilities probed"
    );
    caps
}
