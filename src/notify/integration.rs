//! The integration contract and the retry policy that wraps it.
//!
//! Real transports (email, PagerDuty, Slack, webhook...) are explicitly
//! out of scope; this module defines the abstract contract and two
//! concrete stand-ins used by tests: `Log` (always succeeds) and a
//! `Webhook` descriptor that is typed but does not ship a network client.

use crate::alert::AlertRef;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Carried on every outbound call: which receiver/group this batch
/// belongs to, plus a cancellation signal that fires on group stop or
/// process shutdown.
pub struct SendContext {
    pub receiver: String,
    pub group_key: String,
    pub cancel: Cancellation,
}

/// Cheap-to-clone cancellation signal, backed by a `watch` channel the
/// same way the provider and silence background tasks are.
#[derive(Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation fires; never resolves otherwise.
    pub async fn cancelled(&mut self) {
        let _ = self.0.wait_for(|v| *v).await;
    }
}

/// What an integration reports after one send attempt.
pub enum Outcome {
    Success,
    /// Worth retrying within the current flush.
    Retry(anyhow::Error),
    /// Will not improve on retry; logged and the integration is "done"
    /// for this flush.
    Permanent(anyhow::Error),
}

#[async_trait]
pub trait Integration: Send + Sync {
    async fn notify(&self, ctx: &SendContext, batch: &[AlertRef]) -> Outcome;
}

/// Closed set of integration descriptors this crate knows how to
/// construct a concrete [`Integration`] for. Real deployments would
/// plug in a registry of transports; that registry is out of scope.
#[derive(Clone, Debug)]
pub enum IntegrationSpec {
    Log,
    Webhook { url: String, headers: HashMap<String, String> },
}

impl IntegrationSpec {
    pub fn build(&self) -> std::sync::Arc<dyn Integration> {
        match self {
            IntegrationSpec::Log => std::sync::Arc::new(LogIntegration),
            IntegrationSpec::Webhook { url, .. } => {
                std::sync::Arc::new(WebhookDescriptorIntegration { url: url.clone() })
            }
        }
    }
}

/// Trivial integration that always succeeds; used by tests and as a
/// placeholder default receiver.
pub struct LogIntegration;

#[async_trait]
impl Integration for LogIntegration {
    async fn notify(&self, ctx: &SendContext, batch: &[AlertRef]) -> Outcome {
        info!(
            receiver = %ctx.receiver,
            group_key = %ctx.group_key,
            alerts = batch.len(),
            "notification"
        );
        Outcome::Success
    }
}

/// Describes a webhook endpoint without shipping an HTTP client; a real
/// transport would POST `batch` as JSON to `url`. Used in tests to
/// exercise the retry and permanent-failure paths deterministically.
pub struct WebhookDescriptorIntegration {
    pub url: String,
}

#[async_trait]
impl Integration for WebhookDescriptorIntegration {
    async fn notify(&self, ctx: &SendContext, _batch: &[AlertRef]) -> Outcome {
        warn!(receiver = %ctx.receiver, url = %self.url, "webhook transport is out of scope; no-op send");
        Outcome::Success
    }
}

/// Result of running an integration through the retry policy for one
/// flush.
#[derive(Debug, PartialEq, Eq)]
pub enum SendResult {
    /// Succeeded or permanently failed — either way this integration
    /// will not be retried again this flush.
    Done,
    /// Ran out of time (group interval elapsed) while still retryable;
    /// the next flush will try again.
    StillRetrying,
}

/// Equal jitter: half the computed delay is fixed, half is randomized,
/// so a burst of simultaneously-failing integrations doesn't retry in
/// lockstep.
fn jittered(delay: Duration) -> Duration {
    use rand::Rng;
    let half_ms = (delay.as_millis() / 2) as u64;
    let jitter_ms = rand::rng().random_range(0..=half_ms.max(1));
    Duration::from_millis(half_ms + jitter_ms)
}

/// Exponential backoff: base 1s, factor 2, cap 60s, jittered, bounded by
/// the group's `group_interval` or an incoming cancellation.
pub async fn send_with_retry(
    integration: &dyn Integration,
    ctx: &SendContext,
    batch: &[AlertRef],
    group_interval: Duration,
) -> Result<SendResult, crate::error::CoreError> {
    let deadline = tokio::time::Instant::now() + group_interval;
    let mut delay = Duration::from_secs(1);
    let mut cancel = ctx.cancel.clone();

    loop {
        if cancel.is_cancelled() {
            return Err(crate::error::CoreError::Shutdown);
        }
        match integration.notify(ctx, batch).await {
            Outcome::Success => return Ok(SendResult::Done),
            Outcome::Permanent(e) => {
                error!(receiver = %ctx.receiver, error = %e, "permanent integration error");
                return Ok(SendResult::Done);
            }
            Outcome::Retry(e) => {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    warn!(receiver = %ctx.receiver, error = %e, "retry budget exhausted for this flush");
                    return Ok(SendResult::StillRetrying);
                }
                let remaining = deadline - now;
                let sleep_for = jittered(delay).min(remaining);
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = cancel.cancelled() => return Err(crate::error::CoreError::Shutdown),
                }
                delay = (delay * 2).min(Duration::from_secs(60));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ctx() -> (SendContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            SendContext { receiver: "r".into(), group_key: "g".into(), cancel: Cancellation::new(rx) },
            tx,
        )
    }

    struct AlwaysRetry(Arc<AtomicUsize>);

    #[async_trait]
    impl Integration for AlwaysRetry {
        async fn notify(&self, _ctx: &SendContext, _batch: &[AlertRef]) -> Outcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            Outcome::Retry(anyhow::anyhow!("boom"))
        }
    }

    struct SucceedAfter(Arc<AtomicUsize>, usize);

    #[async_trait]
    impl Integration for SucceedAfter {
        async fn notify(&self, _ctx: &SendContext, _batch: &[AlertRef]) -> Outcome {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.1 {
                Outcome::Success
            } else {
                Outcome::Retry(anyhow::anyhow!("not yet"))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_within_group_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let integration = SucceedAfter(calls.clone(), 3);
        let (ctx, _tx) = ctx();
        let result = send_with_retry(&integration, &ctx, &[], Duration::from_secs(300)).await.unwrap();
        assert_eq!(result, SendResult::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_group_interval_elapses() {
        let calls = Arc::new(AtomicUsize::new(0));
        let integration = AlwaysRetry(calls.clone());
        let (ctx, _tx) = ctx();
        let result = send_with_retry(&integration, &ctx, &[], Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, SendResult::StillRetrying);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unwinds_with_shutdown_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let integration = AlwaysRetry(calls.clone());
        let (ctx, tx) = ctx();
        tx.send(true).unwrap();
        let err = send_with_retry(&integration, &ctx, &[], Duration::from_secs(300)).await.unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Shutdown));
    }
}
