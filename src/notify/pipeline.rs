//! The per-flush notification pipeline: snapshot, inhibit, silence, dedup,
//! send, record — in that fixed order.

use crate::alert::AlertRef;
use crate::error::CoreError;
use crate::inhibit::InhibitEngine;
use crate::label::Fingerprint;
use crate::notify::integration::{send_with_retry, Cancellation, Integration, SendContext, SendResult};
use crate::notify::log::{NotifyLog, NotifyLogEntry};
use crate::silence::SilenceSet;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info};

/// Everything one flush of one group needs. `firing`/`resolved` are
/// already-pruned snapshots (stage 1 of §4.5 is the caller's job: copy
/// out under the group lock and drop resolved fingerprints older than
/// `resolve_timeout` before calling this).
pub struct FlushInput {
    pub receiver: String,
    pub group_key: Fingerprint,
    pub firing: HashMap<Fingerprint, AlertRef>,
    pub resolved: HashMap<Fingerprint, AlertRef>,
    pub repeat_interval: chrono::Duration,
    pub group_interval: StdDuration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing survived inhibit+silence and there was no prior notify-log
    /// entry: nothing to send.
    NothingToSend,
    /// Survivors were identical to the last notification and the repeat
    /// interval has not elapsed.
    RepeatSuppressed,
    /// All configured integrations finished (succeeded or permanently
    /// failed); the notify-log was advanced.
    Sent,
    /// At least one integration is still retrying when the group
    /// interval elapsed; the notify-log was *not* advanced, so the next
    /// flush will retry.
    PartiallySent,
}

pub struct PipelineDeps<'a> {
    pub inhibit: &'a InhibitEngine,
    pub silences: &'a SilenceSet,
    pub notify_log: &'a NotifyLog,
    /// Every currently firing alert system-wide, used only by the
    /// inhibit filter to evaluate source matchers.
    pub live_firing: &'a [AlertRef],
    pub integrations: &'a [Arc<dyn Integration>],
    pub cancel: Cancellation,
}

pub async fn run_pipeline(input: FlushInput, deps: PipelineDeps<'_>) -> Result<FlushOutcome, CoreError> {
    // Stage 2: inhibit.
    let mut surviving_firing: HashMap<Fingerprint, AlertRef> = HashMap::new();
    for (fp, alert) in input.firing.iter() {
        if !deps.inhibit.is_inhibited(alert, deps.live_firing) {
            surviving_firing.insert(*fp, alert.clone());
        } else {
            debug!(fingerprint = %fp, "dropped by inhibit filter");
        }
    }
    let mut surviving_resolved: HashMap<Fingerprint, AlertRef> = HashMap::new();
    for (fp, alert) in input.resolved.iter() {
        if !deps.inhibit.is_inhibited(alert, deps.live_firing) {
            surviving_resolved.insert(*fp, alert.clone());
        }
    }

    // Stage 3: silence.
    surviving_firing.retain(|fp, alert| match deps.silences.matches(alert, input.now) {
        Some(_) => {
            debug!(fingerprint = %fp, "dropped by silence");
            false
        }
        None => true,
    });
    surviving_resolved.retain(|_, alert| deps.silences.matches(alert, input.now).is_none());

    let firing_hashes: HashSet<Fingerprint> = surviving_firing.keys().copied().collect();
    let resolved_hashes: HashSet<Fingerprint> = surviving_resolved.keys().copied().collect();

    // Stage 4: dedup.
    let prior = deps.notify_log.get(&input.receiver, input.group_key);
    let nothing_survives = firing_hashes.is_empty() && resolved_hashes.is_empty();

    // An empty surviving set means nothing to send regardless of what the
    // log last recorded — a resolved alert that ages out of the group
    // before ever reaching an empty notify-log entry must not fall through
    // to stage 5 with an empty batch.
    if nothing_survives {
        return Ok(FlushOutcome::NothingToSend);
    }

    if let Some(entry) = &prior {
        if entry.firing == firing_hashes
            && entry.resolved == resolved_hashes
            && (input.now - entry.last_notify) < input.repeat_interval
        {
            return Ok(FlushOutcome::RepeatSuppressed);
        }
    }

    // Stage 5: send.
    let mut batch: Vec<AlertRef> = surviving_firing.into_values().collect();
    batch.extend(surviving_resolved.into_values());

    let mut all_done = true;
    for integration in deps.integrations {
        let ctx = SendContext {
            receiver: input.receiver.clone(),
            group_key: input.group_key.to_string(),
            cancel: deps.cancel.clone(),
        };
        match send_with_retry(integration.as_ref(), &ctx, &batch, input.group_interval).await? {
            SendResult::Done => {}
            SendResult::StillRetrying => all_done = false,
        }
    }

    // Stage 6: record.
    if all_done {
        deps.notify_log.set(
            &input.receiver,
            input.group_key,
            NotifyLogEntry { firing: firing_hashes, resolved: resolved_hashes, last_notify: input.now },
        );
        info!(receiver = %input.receiver, group_key = %input.group_key, alerts = batch.len(), "flushed");
        Ok(FlushOutcome::Sent)
    } else {
        Ok(FlushOutcome::PartiallySent)
    }
}
