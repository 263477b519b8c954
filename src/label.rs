//! Label sets and fingerprints — the identity layer everything else builds
//! on. A label set is a mapping from name to value with unique keys; a
//! fingerprint is a deterministic 64-bit hash of one, independent of
//! insertion order.

use std::collections::BTreeMap;
use std::fmt;

/// A label set. Backed by a `BTreeMap` so iteration is already
/// name-sorted, which both the fingerprint function and route-tree
/// projection rely on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LabelSet(BTreeMap<String, String>);

/// 64-bit identity of a label set. Immutable for the lifetime of whatever
/// it identifies (an alert, a group key).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl LabelSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Valid label name: `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn is_valid_name(name: &str) -> bool {
        let mut chars = name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    /// Project onto a subset of names, in the order given by `names`, but
    /// collected into a sorted set (fingerprinting is order-independent).
    pub fn project(&self, names: &[String]) -> LabelSet {
        let mut out = BTreeMap::new();
        for name in names {
            if let Some(v) = self.0.get(name) {
                out.insert(name.clone(), v.clone());
            }
        }
        LabelSet(out)
    }

    /// Deterministic fingerprint: keys sorted (guaranteed by `BTreeMap`
    /// iteration order), each `name\0value\0` fed into FNV-1a.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Fnv1a::new();
        for (k, v) in self.0.iter() {
            hasher.write(k.as_bytes());
            hasher.write(&[0]);
            hasher.write(v.as_bytes());
            hasher.write(&[0]);
        }
        Fingerprint(hasher.finish())
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// FNV-1a, 64-bit. Stable, non-cryptographic, and — unlike `ahash` or
/// `std`'s default hasher — not randomized per-process, which matters
/// because fingerprints must be reproducible across restarts and nodes.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Self(Self::OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_order_independent() {
        let a = LabelSet::from_pairs([("b", "2"), ("a", "1")]);
        let b = LabelSet::from_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_values() {
        let a = LabelSet::from_pairs([("a", "1")]);
        let b = LabelSet::from_pairs([("a", "2")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn project_keeps_only_requested_names() {
        let ls = LabelSet::from_pairs([("alertname", "Down"), ("host", "h1"), ("sev", "crit")]);
        let projected = ls.project(&["alertname".to_string(), "host".to_string()]);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected.get("alertname"), Some("Down"));
        assert_eq!(projected.get("sev"), None);
    }

    #[test]
    fn label_name_validation() {
        assert!(LabelSet::is_valid_name("alertname"));
        assert!(LabelSet::is_valid_name("_foo_123"));
        assert!(!LabelSet::is_valid_name("1foo"));
        assert!(!LabelSet::is_valid_name("foo-bar"));
        assert!(!LabelSet::is_valid_name(""));
    }
}
