//! The dispatcher and aggregation groups — the concurrency core. One
//! task per group; the dispatcher itself is a single task consuming the
//! provider's alert stream and routing each alert to the groups its
//! matched routes resolve to.

use crate::alert::AlertRef;
use crate::config::{Config, ConfigHandle};
use crate::error::CoreError;
use crate::inhibit::InhibitEngine;
use crate::label::Fingerprint;
use crate::metrics::Metrics;
use crate::notify::integration::{Cancellation, Integration};
use crate::notify::log::NotifyLog;
use crate::notify::pipeline::{run_pipeline, FlushInput, PipelineDeps};
use crate::provider::Provider;
use crate::route::{GroupBy, MatchedRoute, RouteId};
use crate::silence::SilenceSet;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Identifies one aggregation group. Route ids are only unique within a
/// config epoch (see [`Config::epoch`]), so the epoch is part of
/// identity: a group belonging to a superseded epoch is never looked up
/// again and is drained on reload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupId {
    pub epoch: u64,
    pub route_id: RouteId,
    pub group_key: Fingerprint,
}

enum GroupCommand {
    Alert(AlertRef),
    Stop,
}

struct GroupHandle {
    tx: mpsc::UnboundedSender<GroupCommand>,
    cancel_tx: watch::Sender<bool>,
}

/// Sent by a group task as it exits, carrying its own sender half so the
/// dispatcher can tell whether the map entry it would remove still
/// belongs to this task — a fresh group can already have taken the same
/// [`GroupId`] by the time this arrives.
type Finished = (GroupId, mpsc::UnboundedSender<GroupCommand>);

#[derive(Default)]
struct GroupState {
    firing: HashMap<Fingerprint, AlertRef>,
    resolved: HashMap<Fingerprint, AlertRef>,
}

impl GroupState {
    fn is_empty(&self) -> bool {
        self.firing.is_empty() && self.resolved.is_empty()
    }
}

struct GroupTask {
    id: GroupId,
    receiver: String,
    group_wait: StdDuration,
    group_interval: StdDuration,
    repeat_interval: chrono::Duration,
    resolve_timeout: chrono::Duration,
    provider: Provider,
    inhibit: InhibitEngine,
    silences: SilenceSet,
    notify_log: Arc<NotifyLog>,
    integrations: Vec<Arc<dyn Integration>>,
    metrics: Arc<Metrics>,
    self_tx: mpsc::UnboundedSender<GroupCommand>,
}

impl GroupTask {
    fn insert_alert(&self, state: &mut GroupState, alert: AlertRef) {
        let fp = alert.fingerprint();
        let now = Utc::now();
        state.firing.remove(&fp);
        state.resolved.remove(&fp);
        if alert.is_firing(now) {
            state.firing.insert(fp, alert);
        } else {
            state.resolved.insert(fp, alert);
        }
    }

    /// Stage 1 of §4.5 plus the auto-resolve reclassification: move
    /// alerts whose `endsAt` has passed into `resolved`, then drop
    /// resolved alerts older than `resolve_timeout`.
    fn reclassify_and_prune(&self, state: &mut GroupState, now: chrono::DateTime<Utc>) {
        let newly_resolved: Vec<Fingerprint> = state
            .firing
            .iter()
            .filter(|(_, a)| a.is_resolved(now))
            .map(|(fp, _)| *fp)
            .collect();
        for fp in newly_resolved {
            if let Some(a) = state.firing.remove(&fp) {
                state.resolved.insert(fp, a);
            }
        }
        state.resolved.retain(|_, a| match a.ends_at {
            Some(ends_at) => now - ends_at <= self.resolve_timeout,
            None => true,
        });
    }

    async fn flush(&self, state: &mut GroupState, cancel: Cancellation) -> Result<(), CoreError> {
        let now = Utc::now();
        self.reclassify_and_prune(state, now);

        let live_firing: Vec<AlertRef> = self
            .provider
            .get_all()
            .into_iter()
            .filter(|a| a.is_firing(now))
            .collect();

        let outcome = run_pipeline(
            FlushInput {
                receiver: self.receiver.clone(),
                group_key: self.id.group_key,
                firing: state.firing.clone(),
                resolved: state.resolved.clone(),
                repeat_interval: self.repeat_interval,
                group_interval: self.group_interval,
                now,
            },
            PipelineDeps {
                inhibit: &self.inhibit,
                silences: &self.silences,
                notify_log: self.notify_log.as_ref(),
                live_firing: &live_firing,
                integrations: self.integrations.as_slice(),
                cancel,
            },
        )
        .await?;

        self.metrics.record_outcome(&outcome);
        debug!(group_key = %self.id.group_key, receiver = %self.receiver, ?outcome, "flush complete");
        Ok(())
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<GroupCommand>,
        mut cancel_rx: watch::Receiver<bool>,
        finished: mpsc::UnboundedSender<Finished>,
    ) {
        let mut state = GroupState::default();
        let mut deadline: Option<Instant> = Some(Instant::now() + self.group_wait);
        let cancellation = Cancellation::new(cancel_rx.clone());

        'outer: loop {
            tokio::select! {
                biased;
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        break 'outer;
                    }
                }
                cmd = rx.recv() => {
                    match cmd {
                        None | Some(GroupCommand::Stop) => break 'outer,
                        Some(GroupCommand::Alert(alert)) => {
                            self.insert_alert(&mut state, alert);
                            if deadline.is_none() {
                                deadline = Some(Instant::now());
                            }
                        }
                    }
                }
                _ = async { tokio::time::sleep_until(deadline.unwrap().into()).await }, if deadline.is_some() => {
                    match self.flush(&mut state, cancellation.clone()).await {
                        Err(CoreError::Shutdown) => break 'outer,
                        Err(e) => warn!(error = %e, "group flush failed"),
                        Ok(()) => {}
                    }
                    if state.is_empty() {
                        // Closing the mailbox here, before deciding to exit,
                        // turns the race with `Dispatcher::route_alert` into
                        // a send error instead of a silent drop: any alert
                        // already in flight is drained below, and anything
                        // sent after `close()` takes effect fails, which
                        // sends the dispatcher down its existing
                        // stale-channel retry path to spawn a fresh group.
                        rx.close();
                        while let Some(cmd) = rx.recv().await {
                            if let GroupCommand::Alert(alert) = cmd {
                                self.insert_alert(&mut state, alert);
                            }
                        }
                        if !state.is_empty() {
                            if let Err(e) = self.flush(&mut state, cancellation.clone()).await {
                                warn!(error = %e, "final group flush failed");
                            }
                        }
                        break 'outer;
                    }
                    deadline = Some(Instant::now() + self.group_interval);
                }
            }
        }
        let _ = finished.send((self.id, self.self_tx.clone()));
    }
}

/// Projects an alert's labels onto a route's effective groupBy,
/// producing the group identity.
pub fn compute_group_key(group_by: &GroupBy, alert: &AlertRef) -> Fingerprint {
    match group_by {
        GroupBy::Wildcard => alert.fingerprint(),
        GroupBy::Labels(names) => alert.labels.project(names).fingerprint(),
    }
}

/// Consumes the provider's alert stream, maps every alert to its
/// matching (route, group) pairs, and owns the group table.
pub struct Dispatcher {
    provider: Provider,
    config: ConfigHandle,
    inhibit: InhibitEngine,
    silences: SilenceSet,
    notify_log: Arc<NotifyLog>,
    metrics: Arc<Metrics>,
    groups: dashmap::DashMap<GroupId, GroupHandle>,
    finished_tx: mpsc::UnboundedSender<Finished>,
    finished_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Finished>>,
}

impl Dispatcher {
    pub fn new(
        provider: Provider,
        config: ConfigHandle,
        inhibit: InhibitEngine,
        silences: SilenceSet,
        notify_log: Arc<NotifyLog>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            provider,
            config,
            inhibit,
            silences,
            notify_log,
            metrics,
            groups: dashmap::DashMap::new(),
            finished_tx,
            finished_rx: tokio::sync::Mutex::new(finished_rx),
        })
    }

    pub fn active_groups(&self) -> usize {
        self.groups.len()
    }

    /// Atomically swaps the live configuration and drains every group
    /// belonging to a superseded epoch (see [`Config::epoch`]).
    pub fn reload(&self, new_config: Config) {
        self.config.reload(new_config.clone());
        self.inhibit.set_rules((*new_config.inhibit_rules).clone());
        let new_epoch = new_config.epoch;
        let stale: Vec<GroupId> = self
            .groups
            .iter()
            .filter(|entry| entry.key().epoch != new_epoch)
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            if let Some((_, handle)) = self.groups.remove(&id) {
                let _ = handle.tx.send(GroupCommand::Stop);
                let _ = handle.cancel_tx.send(true);
                self.metrics.group_destroyed();
            }
        }
    }

    fn spawn_group(self: &Arc<Self>, id: GroupId, matched: &MatchedRoute) -> GroupHandle {
        let cfg = self.config.load();
        let integrations: Vec<Arc<dyn Integration>> = cfg
            .receiver(&matched.receiver)
            .map(|r| r.integrations.iter().map(|spec| spec.build()).collect())
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = GroupTask {
            id,
            receiver: matched.receiver.clone(),
            group_wait: matched.group_wait.to_std().unwrap_or(StdDuration::ZERO),
            group_interval: matched.group_interval.to_std().unwrap_or(StdDuration::from_secs(1)),
            repeat_interval: matched.repeat_interval,
            resolve_timeout: cfg.resolve_timeout,
            provider: self.provider.clone(),
            inhibit: self.inhibit.clone(),
            silences: self.silences.clone(),
            notify_log: self.notify_log.clone(),
            integrations,
            metrics: self.metrics.clone(),
            self_tx: tx.clone(),
        };
        let finished_tx = self.finished_tx.clone();
        tokio::spawn(task.run(rx, cancel_rx, finished_tx));
        self.metrics.group_spawned();
        GroupHandle { tx, cancel_tx }
    }

    async fn route_alert(self: &Arc<Self>, alert: AlertRef) {
        let cfg = self.config.load();
        let matched_routes = cfg.route_tree.match_labels(&alert.labels);
        for matched in matched_routes {
            let group_key = compute_group_key(&matched.group_by, &alert);
            let id = GroupId { epoch: cfg.epoch, route_id: matched.route_id, group_key };

            loop {
                let existing = self.groups.get(&id).map(|h| h.tx.clone());
                let tx = match existing {
                    Some(tx) => tx,
                    None => {
                        let handle = self.spawn_group(id, &matched);
                        let tx = handle.tx.clone();
                        self.groups.insert(id, handle);
                        tx
                    }
                };
                match tx.send(GroupCommand::Alert(alert.clone())) {
                    Ok(()) => break,
                    Err(_) => {
                        // The group task already exited (destroyed); drop
                        // the stale entry and spawn a fresh one.
                        self.groups.remove_if(&id, |_, h| h.tx.same_channel(&tx));
                        continue;
                    }
                }
            }
        }
    }

    /// Drains the finished-group channel, removing map entries for
    /// groups that destroyed themselves after an empty flush.
    async fn reap_one(&self) -> Option<Finished> {
        self.finished_rx.lock().await.recv().await
    }

    /// Runs until `shutdown` fires `true`. Consumes alerts from the
    /// provider's subscription and feeds every group until told to stop,
    /// at which point every live group is asked to stop too.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut sub = self.provider.subscribe();
        loop {
            tokio::select! {
                maybe_alert = sub.receiver.recv() => {
                    match maybe_alert {
                        Some(alert) => self.route_alert(alert).await,
                        None => break,
                    }
                }
                Some((id, tx)) = self.reap_one() => {
                    // A fresh group can already occupy this id (spawned by
                    // `route_alert`'s stale-channel retry) by the time this
                    // arrives; only remove the entry if it's still the one
                    // that just exited.
                    if self.groups.remove_if(&id, |_, h| h.tx.same_channel(&tx)).is_some() {
                        self.metrics.group_destroyed();
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown_all().await;
    }

    async fn shutdown_all(&self) {
        for entry in self.groups.iter() {
            let _ = entry.value().tx.send(GroupCommand::Stop);
            let _ = entry.value().cancel_tx.send(true);
        }
        info!("dispatcher shut down, all groups signalled to stop");
    }
}
