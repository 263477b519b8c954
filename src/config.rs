//! Configuration: route tree, receivers, inhibit rules and scalar
//! defaults, plus atomic reload.
//!
//! Parsing YAML/JSON into these types is explicitly out of scope — this
//! module only validates and holds an already-constructed configuration,
//! and swaps it atomically on reload.

use crate::error::CoreError;
use crate::inhibit::InhibitRule;
use crate::notify::integration::IntegrationSpec;
use crate::route::{RouteDefaults, RouteSpec, RouteTree};
use arc_swap::ArcSwap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Debug)]
pub struct Receiver {
    pub name: String,
    pub integrations: Vec<IntegrationSpec>,
}

/// The not-yet-validated shape a config loader hands to the core.
pub struct RawConfig {
    pub route: RouteSpec,
    pub receivers: Vec<Receiver>,
    pub inhibit_rules: Vec<InhibitRule>,
    pub defaults: RouteDefaults,
    pub resolve_timeout: chrono::Duration,
}

/// A validated, immutable configuration snapshot.
///
/// `epoch` resolves the ambiguity around overlapping reloads: route node
/// ids are only unique *within* one
/// `Config` (a fresh tree reassigns ids from zero), so a group's
/// identity is `(epoch, route_id, group_key)`. Every reload mints a new
/// epoch, so every group belonging to a previous epoch is unconditionally
/// stale and gets drained — a conservative but race-free reading of
/// "drain and stop all groups whose route no longer exists".
#[derive(Clone)]
pub struct Config {
    pub epoch: u64,
    pub route_tree: Arc<RouteTree>,
    pub receivers: Arc<HashMap<String, Receiver>>,
    pub inhibit_rules: Arc<Vec<InhibitRule>>,
    pub resolve_timeout: chrono::Duration,
}

impl Config {
    pub fn build(raw: RawConfig) -> Result<Config, CoreError> {
        let mut names = HashSet::new();
        let mut receivers = HashMap::new();
        for r in raw.receivers {
            if !names.insert(r.name.clone()) {
                return Err(CoreError::config_invalid(format!("duplicate receiver name {:?}", r.name)));
            }
            receivers.insert(r.name.clone(), r);
        }
        let epoch = NEXT_EPOCH.fetch_add(1, Ordering::Relaxed);
        let route_tree = RouteTree::build(raw.route, &names, raw.defaults)?;
        Ok(Config {
            epoch,
            route_tree: Arc::new(route_tree),
            receivers: Arc::new(receivers),
            inhibit_rules: Arc::new(raw.inhibit_rules),
            resolve_timeout: raw.resolve_timeout,
        })
    }

    pub fn receiver(&self, name: &str) -> Option<&Receiver> {
        self.receivers.get(name)
    }
}

/// Pointer-swap config handle: the silence set, inhibit rules and route
/// tree all reload by swapping a pointer, never by mutating in place, so
/// readers take a reference once per operation and use it to completion.
/// Cloning is cheap; every reader
/// calls [`ConfigHandle::load`] once per logical operation and works
/// against that snapshot to completion, so a reload never tears a
/// read in progress.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
}

impl ConfigHandle {
    pub fn new(initial: Config) -> Self {
        Self { inner: Arc::new(ArcSwap::from(Arc::new(initial))) }
    }

    pub fn load(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Atomically swaps in a new, already-validated configuration.
    /// Callers that need fresh validation should run [`Config::build`]
    /// first; this never partially applies a config.
    pub fn reload(&self, new: Config) {
        self.inner.store(Arc::new(new));
    }
}
