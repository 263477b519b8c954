//! Error taxonomy shared across every component boundary.
//!
//! Internal helpers return whatever `Result` type is convenient; once an
//! error crosses a component boundary (provider -> dispatcher, pipeline ->
//! integration, config loader -> core) it is wrapped into one of the
//! variants below.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Rejected at `put`: empty labels, bad timestamps, non-string values.
    #[error("invalid alert: {0}")]
    InvalidAlert(String),

    /// Lookup for a missing fingerprint or silence id.
    #[error("not found: {0}")]
    NotFound(String),

    /// `reload` was rejected; the previous configuration is still live.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An integration asked to be retried; the pipeline will retry within
    /// the current flush and otherwise defer to the next one.
    #[error("transient integration error (receiver={receiver}): {source}")]
    TransientIntegrationError {
        receiver: String,
        #[source]
        source: anyhow::Error,
    },

    /// An integration failed in a way that will not improve on retry.
    #[error("permanent integration error (receiver={receiver}): {source}")]
    PermanentIntegrationError {
        receiver: String,
        #[source]
        source: anyhow::Error,
    },

    /// Returned from any suspending operation when cancellation fires.
    /// Callers must unwind without partial notify-log writes.
    #[error("shutting down")]
    Shutdown,
}

impl CoreError {
    pub fn invalid_alert(msg: impl Into<String>) -> Self {
        CoreError::InvalidAlert(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        CoreError::ConfigInvalid(msg.into())
    }
}

/// Aggregate error returned by a batch `put`: one bad alert in a batch does
/// not reject the whole batch, so the caller gets back the list of per-alert
/// failures alongside however many alerts were accepted.
#[derive(Error, Debug, Default)]
#[error("{} of {} alerts rejected", .failures.len(), .total)]
pub struct PutError {
    pub total: usize,
    pub failures: Vec<(usize, CoreError)>,
}

impl PutError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
