//! The alert entity and its lifecycle rules.

use crate::error::CoreError;
use crate::label::{Fingerprint, LabelSet};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Alert {
    pub labels: LabelSet,
    pub annotations: LabelSet,
    pub starts_at: DateTime<Utc>,
    /// Zero value (`None`) means "still firing; auto-resolve after
    /// `resolve_timeout`".
    pub ends_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub generator_url: String,
}

/// An alert as accepted on ingest, before defaults (`updated_at`,
/// `ends_at`) are filled in by the provider.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct AlertInput {
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub generator_url: Option<String>,
}

impl Alert {
    pub fn fingerprint(&self) -> Fingerprint {
        self.labels.fingerprint()
    }

    pub fn is_firing(&self, now: DateTime<Utc>) -> bool {
        match self.ends_at {
            None => true,
            Some(ends_at) => ends_at > now,
        }
    }

    pub fn is_resolved(&self, now: DateTime<Utc>) -> bool {
        !self.is_firing(now)
    }

    /// Builds a validated, defaulted `Alert` from ingest input. Does not
    /// consult the store — merge-on-ingest is the provider's job.
    pub fn from_input(
        input: AlertInput,
        now: DateTime<Utc>,
        resolve_timeout: chrono::Duration,
    ) -> Result<Alert, CoreError> {
        if input.labels.is_empty() {
            return Err(CoreError::invalid_alert("labels must be non-empty"));
        }
        for (name, _) in input.labels.iter() {
            if !LabelSet::is_valid_name(name) {
                return Err(CoreError::invalid_alert(format!("invalid label name {name:?}")));
            }
        }
        let starts_at = input.starts_at.unwrap_or(now);
        if let Some(ends_at) = input.ends_at {
            if starts_at > ends_at {
                return Err(CoreError::invalid_alert("startsAt must be <= endsAt"));
            }
        }
        let updated_at = now;
        let ends_at = input
            .ends_at
            .or_else(|| Some(updated_at + resolve_timeout));
        Ok(Alert {
            labels: input.labels,
            annotations: input.annotations,
            starts_at,
            ends_at,
            updated_at,
            generator_url: input.generator_url.unwrap_or_default(),
        })
    }

    /// Last-writer-wins merge rule: `incoming` replaces `stored` iff
    /// `incoming.updated_at >= stored.updated_at`.
    pub fn should_replace(stored: &Alert, incoming: &Alert) -> bool {
        incoming.updated_at >= stored.updated_at
    }
}

pub type AlertRef = Arc<Alert>;

#[cfg(test)]
mod tests {
    use super::*;

    fn ls() -> LabelSet {
        LabelSet::from_pairs([("alertname", "Down")])
    }

    #[test]
    fn rejects_empty_labels() {
        let now = Utc::now();
        let input = AlertInput { labels: LabelSet::new(), ..Default::default() };
        let err = Alert::from_input(input, now, chrono::Duration::minutes(5)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidAlert(_)));
    }

    #[test]
    fn defaults_ends_at_from_resolve_timeout() {
        let now = Utc::now();
        let input = AlertInput { labels: ls(), ..Default::default() };
        let alert = Alert::from_input(input, now, chrono::Duration::minutes(5)).unwrap();
        assert_eq!(alert.ends_at, Some(now + chrono::Duration::minutes(5)));
        assert!(alert.is_firing(now));
    }

    #[test]
    fn rejects_starts_after_ends() {
        let now = Utc::now();
        let input = AlertInput {
            labels: ls(),
            starts_at: Some(now),
            ends_at: Some(now - chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(Alert::from_input(input, now, chrono::Duration::minutes(5)).is_err());
    }

    #[test]
    fn last_writer_wins() {
        let now = Utc::now();
        let stored = Alert {
            labels: ls(),
            annotations: LabelSet::new(),
            starts_at: now,
            ends_at: None,
            updated_at: now,
            generator_url: String::new(),
        };
        let mut older = stored.clone();
        older.updated_at = now - chrono::Duration::seconds(1);
        let mut newer = stored.clone();
        newer.updated_at = now + chrono::Duration::seconds(1);

        assert!(!Alert::should_replace(&stored, &older));
        assert!(Alert::should_replace(&stored, &newer));
    }
}
