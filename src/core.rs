//! Top-level wiring: owns every shared component and the background
//! tasks that keep them running, and exposes the small surface a caller
//! needs — ingest, status query, silence/inhibit management, reload,
//! shutdown, stats.

use crate::config::{Config, ConfigHandle};
use crate::dispatcher::Dispatcher;
use crate::error::{CoreError, PutError};
use crate::inhibit::InhibitEngine;
use crate::label::Fingerprint;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::notify::log::NotifyLog;
use crate::provider::{Provider, ProviderConfig};
use crate::silence::{Silence, SilenceId, SilenceSet};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Background cadence for sweeping expired silences. Independent of GC:
/// silences carry their own `endsAt` and don't depend on alert traffic.
const SILENCE_SWEEP_INTERVAL: chrono::Duration = chrono::Duration::seconds(30);

/// Everything needed to construct a `Core`.
pub struct CoreConfig {
    pub initial: Config,
    pub provider: ProviderConfig,
}

/// One alert as returned by [`Core::query_alerts`], annotated with its
/// current firing/silenced/inhibited status the way spec.md §6's status
/// query describes.
#[derive(Clone, Debug)]
pub struct AlertView {
    pub alert: crate::alert::AlertRef,
    pub firing: bool,
    pub silenced_by: Option<SilenceId>,
    pub inhibited: bool,
}

/// A fully wired alert-management core: provider, dispatcher, inhibit
/// engine, silence set, notify log and metrics, plus the background
/// tasks (GC, silence sweep, dispatch loop) that keep state current.
pub struct Core {
    provider: Provider,
    config: ConfigHandle,
    inhibit: InhibitEngine,
    silences: SilenceSet,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    pub fn new(cfg: CoreConfig) -> Arc<Self> {
        let provider = Provider::new(cfg.provider);
        let config = ConfigHandle::new(cfg.initial.clone());
        let inhibit = InhibitEngine::new((*cfg.initial.inhibit_rules).clone());
        let silences = SilenceSet::new();
        let notify_log = Arc::new(NotifyLog::new());
        let metrics = Arc::new(Metrics::default());

        let dispatcher = Dispatcher::new(
            provider.clone(),
            config.clone(),
            inhibit.clone(),
            silences.clone(),
            notify_log,
            metrics.clone(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let core = Arc::new(Self {
            provider,
            config,
            inhibit,
            silences,
            dispatcher,
            metrics,
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();
        let gc_provider = core.provider.clone();
        let gc_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { gc_provider.run_gc(gc_shutdown).await }));

        let sweep_silences = core.silences.clone();
        let sweep_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            sweep_silences.run_sweeper(SILENCE_SWEEP_INTERVAL, sweep_shutdown).await
        }));

        tasks.push(tokio::spawn(core.dispatcher.clone().run(shutdown_rx)));
        *core.tasks.lock() = tasks;

        core
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn silences(&self) -> &SilenceSet {
        &self.silences
    }

    pub fn inhibit(&self) -> &InhibitEngine {
        &self.inhibit
    }

    pub fn ingest(&self, inputs: Vec<crate::alert::AlertInput>, now: DateTime<Utc>) -> Result<(), PutError> {
        self.provider.put(inputs, now)
    }

    pub fn set_silence(&self, silence: Silence) {
        self.silences.set(silence);
    }

    pub fn delete_silence(&self, id: &str) -> Result<(), CoreError> {
        self.silences.del(id)
    }

    pub fn get_silence(&self, id: &str) -> Result<Silence, CoreError> {
        self.silences.get(id)
    }

    pub fn list_silences(&self) -> Vec<Silence> {
        self.silences.list()
    }

    pub fn alert(&self, fp: Fingerprint) -> Result<crate::alert::AlertRef, CoreError> {
        self.provider.get(fp)
    }

    pub fn alerts(&self) -> Vec<crate::alert::AlertRef> {
        self.provider.get_all()
    }

    /// Backs the status-query interface (spec.md §6: `GET
    /// /alerts?filter=...`): every alert the provider currently holds,
    /// optionally restricted to those matching `filter`, annotated with
    /// whether it is presently silenced or inhibited. The filtering logic
    /// itself is core (the same [`InhibitEngine`]/[`SilenceSet`] the
    /// dispatcher's pipeline consults); only the HTTP binding around this
    /// call is out of scope.
    pub fn query_alerts(&self, filter: Option<&crate::matcher::MatcherSet>, now: DateTime<Utc>) -> Vec<AlertView> {
        let all = self.provider.get_all();
        let live_firing: Vec<crate::alert::AlertRef> =
            all.iter().filter(|a| a.is_firing(now)).cloned().collect();

        all.into_iter()
            .filter(|a| filter.map(|f| f.matches(&a.labels)).unwrap_or(true))
            .map(|alert| {
                let firing = alert.is_firing(now);
                let silenced_by = self.silences.matches(&alert, now);
                let inhibited = self.inhibit.is_inhibited(&alert, &live_firing);
                AlertView { alert, firing, silenced_by, inhibited }
            })
            .collect()
    }

    /// Validates and atomically installs a new configuration. The
    /// dispatcher drains every group from the superseded epoch; groups
    /// from the new epoch are created lazily as alerts route into them.
    /// Route tree and inhibit rules are swapped together by the
    /// dispatcher so a reader never observes one updated without the
    /// other.
    pub fn reload(&self, new_config: Config) {
        self.dispatcher.reload(new_config);
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load()
    }

    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn active_group_count(&self) -> usize {
        self.dispatcher.active_groups()
    }

    /// Signals every background task to stop and waits for them to exit.
    /// Idempotent: a second call is a no-op aside from re-joining already
    /// finished tasks.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("core shut down");
    }
}
