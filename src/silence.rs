//! Mutable silence set with timed expiry.

use crate::alert::Alert;
use crate::error::CoreError;
use crate::matcher::MatcherSet;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type SilenceId = String;

#[derive(Clone, Debug)]
pub struct Silence {
    pub id: SilenceId,
    pub matchers: MatcherSet,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: String,
}

impl Silence {
    /// `startsAt > now` is treated as "not yet active": a pending silence
    /// has no inhibiting effect.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.matchers.matches(&alert.labels)
    }
}

/// Safe for concurrent reads; every write is serialized behind the inner
/// lock so readers never observe a torn rule set.
#[derive(Clone, Default)]
pub struct SilenceSet {
    inner: Arc<RwLock<HashMap<SilenceId, Silence>>>,
}

impl SilenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, silence: Silence) {
        self.inner.write().insert(silence.id.clone(), silence);
    }

    pub fn del(&self, id: &str) -> Result<(), CoreError> {
        self.inner
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(format!("silence {id}")))
    }

    pub fn get(&self, id: &str) -> Result<Silence, CoreError> {
        self.inner
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("silence {id}")))
    }

    pub fn list(&self) -> Vec<Silence> {
        self.inner.read().values().cloned().collect()
    }

    /// `true` iff any currently-active silence matches the alert's labels.
    pub fn matches(&self, alert: &Alert, now: DateTime<Utc>) -> Option<SilenceId> {
        self.inner
            .read()
            .values()
            .find(|s| s.is_active(now) && s.matches(alert))
            .map(|s| s.id.clone())
    }

    /// Removes silences whose `endsAt <= now`. Intended to be called by a
    /// background sweeper at most `gc_interval` after expiry.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|_, s| s.ends_at > now);
        before - inner.len()
    }

    pub async fn run_sweeper(
        &self,
        interval: chrono::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(
            interval.to_std().unwrap_or(std::time::Duration::from_secs(30)),
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep_expired(Utc::now());
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired silences");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::LabelSet;
    use crate::matcher::Matcher;

    fn alert(alertname: &str) -> Alert {
        Alert {
            labels: LabelSet::from_pairs([("alertname", alertname)]),
            annotations: LabelSet::new(),
            starts_at: Utc::now(),
            ends_at: None,
            updated_at: Utc::now(),
            generator_url: String::new(),
        }
    }

    fn silence(id: &str, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Silence {
        Silence {
            id: id.to_string(),
            matchers: MatcherSet::new(vec![Matcher::equal("alertname", "Down")]),
            starts_at,
            ends_at,
            created_by: "tester".into(),
            comment: String::new(),
        }
    }

    #[test]
    fn active_silence_blocks_matching_alert() {
        let now = Utc::now();
        let set = SilenceSet::new();
        set.set(silence("s1", now - chrono::Duration::minutes(1), now + chrono::Duration::hours(1)));
        assert_eq!(set.matches(&alert("Down"), now), Some("s1".to_string()));
    }

    #[test]
    fn pending_silence_has_no_effect() {
        let now = Utc::now();
        let set = SilenceSet::new();
        set.set(silence("s1", now + chrono::Duration::minutes(1), now + chrono::Duration::hours(1)));
        assert_eq!(set.matches(&alert("Down"), now), None);
    }

    #[test]
    fn expired_silence_has_no_effect_and_is_swept() {
        let now = Utc::now();
        let set = SilenceSet::new();
        set.set(silence("s1", now - chrono::Duration::hours(2), now - chrono::Duration::hours(1)));
        assert_eq!(set.matches(&alert("Down"), now), None);
        assert_eq!(set.sweep_expired(now), 1);
        assert!(set.list().is_empty());
    }

    #[test]
    fn del_missing_is_not_found() {
        let set = SilenceSet::new();
        assert!(matches!(set.del("missing"), Err(CoreError::NotFound(_))));
    }
}
