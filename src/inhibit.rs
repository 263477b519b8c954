//! Inhibit rule evaluator.

use crate::alert::Alert;
use crate::matcher::MatcherSet;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct InhibitRule {
    pub source_matchers: MatcherSet,
    pub target_matchers: MatcherSet,
    pub equal_labels: Vec<String>,
}

impl InhibitRule {
    fn equal_on(&self, source: &Alert, target: &Alert) -> bool {
        self.equal_labels
            .iter()
            .all(|name| source.labels.get(name) == target.labels.get(name) && source.labels.get(name).is_some())
    }
}

/// Evaluated against the current live firing set on every flush, not a
/// snapshot older than one dispatcher tick. Safe for
/// concurrent reads; mutation (rule reload) is serialized with a writer
/// lock.
#[derive(Clone, Default)]
pub struct InhibitEngine {
    rules: Arc<RwLock<Vec<InhibitRule>>>,
}

impl InhibitEngine {
    pub fn new(rules: Vec<InhibitRule>) -> Self {
        Self { rules: Arc::new(RwLock::new(rules)) }
    }

    pub fn set_rules(&self, rules: Vec<InhibitRule>) {
        *self.rules.write() = rules;
    }

    /// `true` iff `target` is blocked by some firing alert in
    /// `firing_set` (which must never include `target` itself — a firing
    /// alert never inhibits itself).
    pub fn is_inhibited(&self, target: &Alert, firing_set: &[Arc<Alert>]) -> bool {
        let rules = self.rules.read();
        if rules.is_empty() {
            return false;
        }
        for rule in rules.iter() {
            if !rule.target_matchers.matches(&target.labels) {
                continue;
            }
            for source in firing_set {
                if source.fingerprint() == target.fingerprint() {
                    continue; // never self-inhibit
                }
                if rule.source_matchers.matches(&source.labels) && rule.equal_on(source, target) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::LabelSet;
    use crate::matcher::Matcher;

    fn alert(labels: &[(&str, &str)]) -> Alert {
        Alert {
            labels: LabelSet::from_pairs(labels.iter().map(|(k, v)| (*k, *v))),
            annotations: LabelSet::new(),
            starts_at: chrono::Utc::now(),
            ends_at: None,
            updated_at: chrono::Utc::now(),
            generator_url: String::new(),
        }
    }

    fn rule() -> InhibitRule {
        InhibitRule {
            source_matchers: MatcherSet::new(vec![Matcher::equal("severity", "critical")]),
            target_matchers: MatcherSet::new(vec![Matcher::equal("severity", "warning")]),
            equal_labels: vec!["cluster".into()],
        }
    }

    #[test]
    fn target_inhibited_when_source_firing_with_equal_labels() {
        let engine = InhibitEngine::new(vec![rule()]);
        let source = Arc::new(alert(&[("severity", "critical"), ("cluster", "A")]));
        let target = alert(&[("severity", "warning"), ("cluster", "A")]);
        assert!(engine.is_inhibited(&target, &[source]));
    }

    #[test]
    fn target_in_other_cluster_not_inhibited() {
        let engine = InhibitEngine::new(vec![rule()]);
        let source = Arc::new(alert(&[("severity", "critical"), ("cluster", "A")]));
        let target = alert(&[("severity", "warning"), ("cluster", "B")]);
        assert!(!engine.is_inhibited(&target, &[source]));
    }

    #[test]
    fn alert_never_self_inhibits() {
        let engine = InhibitEngine::new(vec![InhibitRule {
            source_matchers: MatcherSet::new(vec![]),
            target_matchers: MatcherSet::new(vec![]),
            equal_labels: vec![],
        }]);
        let a = Arc::new(alert(&[("alertname", "X")]));
        let same = (*a).clone();
        assert!(!engine.is_inhibited(&same, &[a]));
    }
}
