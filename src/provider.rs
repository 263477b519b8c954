//! The alert provider: authoritative in-memory store, fingerprint-keyed
//! dedup, GC of long-resolved alerts, and multicast fan-out to
//! subscribers.

use crate::alert::{Alert, AlertInput, AlertRef};
use crate::error::{CoreError, PutError};
use crate::label::Fingerprint;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-subscriber bounded queue capacity. A subscriber that falls this far
/// behind is disconnected rather than allowed to stall the publisher.
pub const SUBSCRIBER_CAPACITY: usize = 200;

pub struct ProviderConfig {
    pub resolve_timeout: chrono::Duration,
    pub gc_interval: chrono::Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: chrono::Duration::minutes(5),
            gc_interval: chrono::Duration::seconds(30),
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<AlertRef>,
}

/// The authoritative alert store. Cheap to clone (an `Arc` inside);
/// intended to be constructed once and shared between the ingest path,
/// the dispatcher, and the background GC task.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<Inner>,
}

struct Inner {
    store: RwLock<HashMap<Fingerprint, AlertRef>>,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_subscriber_id: AtomicU64,
    config: ProviderConfig,
}

/// Handle returned by [`Provider::subscribe`]; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    provider: Provider,
    pub receiver: mpsc::Receiver<AlertRef>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.provider.inner.subscribers.write().remove(&self.id);
    }
}

impl Provider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    pub fn resolve_timeout(&self) -> chrono::Duration {
        self.inner.config.resolve_timeout
    }

    /// Validate, default, merge and publish a batch of alerts. Invalid
    /// alerts are reported in the returned `PutError`; valid ones are
    /// still stored and published: one bad alert in a batch never rejects
    /// the rest.
    pub fn put(&self, inputs: Vec<AlertInput>, now: DateTime<Utc>) -> Result<(), PutError> {
        let mut err = PutError { total: inputs.len(), failures: Vec::new() };
        let mut accepted = Vec::new();

        for (idx, input) in inputs.into_iter().enumerate() {
            match Alert::from_input(input, now, self.inner.config.resolve_timeout) {
                Ok(alert) => accepted.push(alert),
                Err(e) => err.failures.push((idx, e)),
            }
        }

        if !accepted.is_empty() {
            let mut store = self.inner.store.write();
            let mut to_publish = Vec::with_capacity(accepted.len());
            for alert in accepted {
                let fp = alert.fingerprint();
                let should_store = match store.get(&fp) {
                    Some(existing) => Alert::should_replace(existing, &alert),
                    None => true,
                };
                if should_store {
                    let arc = Arc::new(alert);
                    store.insert(fp, arc.clone());
                    to_publish.push(arc);
                }
            }
            drop(store);
            for alert in to_publish {
                self.publish(alert);
            }
        }

        if err.is_empty() {
            Ok(())
        } else {
            Err(err)
        }
    }

    fn publish(&self, alert: AlertRef) {
        let mut dead = Vec::new();
        {
            let subs = self.inner.subscribers.read();
            for (id, sub) in subs.iter() {
                match sub.tx.try_send(alert.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subscriber = id, "subscriber buffer full, disconnecting");
                        dead.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(*id);
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut subs = self.inner.subscribers.write();
            for id in dead {
                subs.remove(&id);
            }
        }
    }

    pub fn get(&self, fp: Fingerprint) -> Result<AlertRef, CoreError> {
        self.inner
            .store
            .read()
            .get(&fp)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("alert {fp}")))
    }

    /// Snapshot semantics: the returned vec reflects the store at call
    /// time; subsequent mutations never alter it.
    pub fn get_all(&self) -> Vec<AlertRef> {
        self.inner.store.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to the alert stream. The channel is ordered per sender
    /// (i.e. per call to `put`) but not globally ordered across
    /// subscribers or across interleaved `put` calls from different
    /// callers running concurrently.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.inner.subscribers.write().insert(id, Subscriber { tx });
        Subscription { id, provider: self.clone(), receiver }
    }

    fn gc_once(&self, now: DateTime<Utc>) {
        let threshold = now - self.inner.config.gc_interval;
        let expired: Vec<Fingerprint> = self
            .inner
            .store
            .read()
            .iter()
            .filter_map(|(fp, alert)| match alert.ends_at {
                Some(ends_at) if ends_at < threshold => Some(*fp),
                _ => None,
            })
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut store = self.inner.store.write();
        for fp in &expired {
            store.remove(fp);
        }
        drop(store);
        debug!(count = expired.len(), "gc removed resolved alerts");
    }

    /// Runs the GC loop until the passed token is cancelled. Intended to
    /// be spawned as its own task; never blocks `put`.
    pub async fn run_gc(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(
            self.inner
                .config
                .gc_interval
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(30)),
        );
        loop {
            tokio::select! {
                _ = interval.tick() => self.gc_once(Utc::now()),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
