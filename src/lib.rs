//! In-memory alert aggregation, routing, silencing and inhibition core.
//!
//! Config parsing (YAML/JSON), real notification transports, templating,
//! an HTTP admin API, clustering and persistent silence storage are all
//! out of scope here — this crate owns the in-process state machine that
//! sits between "an alert fired" and "a receiver was notified", and
//! expects a host process to supply configuration and wire up transports.

pub mod alert;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod error;
pub mod inhibit;
pub mod label;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod provider;
pub mod route;
pub mod silence;

pub use alert::{Alert, AlertInput, AlertRef};
pub use config::{Config, ConfigHandle, RawConfig, Receiver};
pub use core::{AlertView, Core, CoreConfig};
pub use error::{CoreError, PutError, Result};
pub use inhibit::{InhibitEngine, InhibitRule};
pub use label::{Fingerprint, LabelSet};
pub use matcher::{Matcher, MatcherSet};
pub use metrics::{Metrics, MetricsSnapshot};
pub use provider::{Provider, ProviderConfig};
pub use route::{GroupBy, GroupBySpec, Route, RouteDefaults, RouteSpec, RouteTree};
pub use silence::{Silence, SilenceId, SilenceSet};
