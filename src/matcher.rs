//! Matchers: literal equality or anchored full-match regex, composed into
//! unordered sets consulted by routes, inhibit rules and silences alike.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    #[error("invalid regex pattern {pattern:?} for label {name:?}: {source}")]
    BadRegex {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One matcher. The compiled regex form is kept side by side with its
/// source pattern so configuration can be round-tripped without
/// recompiling or losing the original text.
#[derive(Clone)]
pub enum Matcher {
    Equal { name: String, value: String },
    Regex { name: String, pattern: String, compiled: Arc<Regex> },
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Equal { name, value } => write!(f, "{name}={value:?}"),
            Matcher::Regex { name, pattern, .. } => write!(f, "{name}=~{pattern:?}"),
        }
    }
}

/// On-the-wire shape of a matcher: just the source pattern, never the
/// compiled form. A config loader round-trips through this, not through
/// `Matcher` directly, so a `Regex` matcher never needs to serialize (or
/// deserialize) a compiled `regex::Regex`.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum MatcherWire {
    Equal { name: String, value: String },
    Regex { name: String, pattern: String },
}

impl serde::Serialize for Matcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let wire = match self {
            Matcher::Equal { name, value } => {
                MatcherWire::Equal { name: name.clone(), value: value.clone() }
            }
            Matcher::Regex { name, pattern, .. } => {
                MatcherWire::Regex { name: name.clone(), pattern: pattern.clone() }
            }
        };
        wire.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Matcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match MatcherWire::deserialize(deserializer)? {
            MatcherWire::Equal { name, value } => Ok(Matcher::equal(name, value)),
            MatcherWire::Regex { name, pattern } => {
                Matcher::regex(name, pattern).map_err(serde::de::Error::custom)
            }
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Equal { name: n1, value: v1 }, Matcher::Equal { name: n2, value: v2 }) => {
                n1 == n2 && v1 == v2
            }
            (Matcher::Regex { name: n1, pattern: p1, .. }, Matcher::Regex { name: n2, pattern: p2, .. }) => {
                n1 == n2 && p1 == p2
            }
            _ => false,
        }
    }
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Matcher::Equal { name: name.into(), value: value.into() }
    }

    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Result<Self, MatcherError> {
        let name = name.into();
        let pattern = pattern.into();
        // Anchored full-match: `/^value$/`.
        let anchored = format!("^(?:{pattern})$");
        let compiled = Regex::new(&anchored).map_err(|source| MatcherError::BadRegex {
            name: name.clone(),
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Matcher::Regex { name, pattern, compiled: Arc::new(compiled) })
    }

    pub fn name(&self) -> &str {
        match self {
            Matcher::Equal { name, .. } => name,
            Matcher::Regex { name, .. } => name,
        }
    }

    pub fn matches_value(&self, value: &str) -> bool {
        match self {
            Matcher::Equal { value: expect, .. } => expect == value,
            Matcher::Regex { compiled, .. } => compiled.is_match(value),
        }
    }
}

/// An unordered set of matchers. Matches a label set iff every matcher in
/// the set matches; absence of the named label is never a match (neither
/// an equality nor a regex matcher matches a missing label — callers that
/// want "label absent or empty" must match `""` explicitly, as the source
/// systems this is grounded on do).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MatcherSet(Vec<Matcher>);

impl MatcherSet {
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Self(matchers)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Matcher> {
        self.0.iter()
    }

    pub fn matches(&self, labels: &crate::label::LabelSet) -> bool {
        self.0.iter().all(|m| match labels.get(m.name()) {
            Some(v) => m.matches_value(v),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::LabelSet;

    #[test]
    fn equal_matcher() {
        let m = Matcher::equal("severity", "critical");
        let ls = LabelSet::from_pairs([("severity", "critical")]);
        assert!(MatcherSet::new(vec![m]).matches(&ls));
    }

    #[test]
    fn regex_matcher_is_anchored_full_match() {
        let m = Matcher::regex("host", "h[0-9]+").unwrap();
        assert!(MatcherSet::new(vec![m.clone()]).matches(&LabelSet::from_pairs([("host", "h1")])));
        // Not a full match ("host is h10x"): anchoring must reject this.
        assert!(!MatcherSet::new(vec![m]).matches(&LabelSet::from_pairs([("host", "h10x")])));
    }

    #[test]
    fn missing_label_never_matches() {
        let m = Matcher::equal("team", "x");
        let ls = LabelSet::from_pairs([("other", "y")]);
        assert!(!MatcherSet::new(vec![m]).matches(&ls));
    }

    #[test]
    fn empty_set_matches_everything() {
        assert!(MatcherSet::default().matches(&LabelSet::new()));
    }

    /// Round-trip law (spec.md §8): a matcher set serialized then
    /// deserialized matches the same inputs the same way — the compiled
    /// regex form is rebuilt from its source pattern, never carried over
    /// the wire.
    #[test]
    fn matcher_set_round_trips_through_json() {
        let set = MatcherSet::new(vec![
            Matcher::equal("severity", "critical"),
            Matcher::regex("host", "h[0-9]+").unwrap(),
        ]);
        let json = serde_json::to_string(&set).unwrap();
        let restored: MatcherSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, restored);
        assert!(restored.matches(&LabelSet::from_pairs([("severity", "critical"), ("host", "h42")])));
        assert!(!restored.matches(&LabelSet::from_pairs([("severity", "critical"), ("host", "h42x")])));
    }
}
