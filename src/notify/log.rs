//! Notify-log: per-(receiver, groupKey) record of what was last sent,
//! used for repeat suppression. Sharded by receiver to reduce contention;
//! shard count and hash are an implementation choice this crate fixes.

use crate::label::Fingerprint;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

const SHARD_COUNT: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyLogEntry {
    pub firing: HashSet<Fingerprint>,
    pub resolved: HashSet<Fingerprint>,
    pub last_notify: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Key {
    receiver_fp: u64,
    group_key: Fingerprint,
}

pub struct NotifyLog {
    shards: Vec<Mutex<HashMap<Key, NotifyLogEntry>>>,
}

impl Default for NotifyLog {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyLog {
    pub fn new() -> Self {
        Self { shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect() }
    }

    fn shard_for(&self, receiver: &str) -> &Mutex<HashMap<Key, NotifyLogEntry>> {
        let fp = crate::label::LabelSet::from_pairs([("receiver", receiver)]).fingerprint();
        &self.shards[(fp.0 as usize) % SHARD_COUNT]
    }

    pub fn get(&self, receiver: &str, group_key: Fingerprint) -> Option<NotifyLogEntry> {
        let receiver_fp = receiver_fingerprint(receiver);
        self.shard_for(receiver).lock().get(&Key { receiver_fp, group_key }).cloned()
    }

    pub fn set(&self, receiver: &str, group_key: Fingerprint, entry: NotifyLogEntry) {
        let receiver_fp = receiver_fingerprint(receiver);
        self.shard_for(receiver).lock().insert(Key { receiver_fp, group_key }, entry);
    }
}

fn receiver_fingerprint(receiver: &str) -> u64 {
    crate::label::LabelSet::from_pairs([("receiver", receiver)]).fingerprint().0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let log = NotifyLog::new();
        let gk = Fingerprint(42);
        let entry = NotifyLogEntry { firing: HashSet::new(), resolved: HashSet::new(), last_notify: Utc::now() };
        log.set("receiver-a", gk, entry.clone());
        assert_eq!(log.get("receiver-a", gk), Some(entry));
    }

    #[test]
    fn different_receivers_do_not_collide() {
        let log = NotifyLog::new();
        let gk = Fingerprint(1);
        let e1 = NotifyLogEntry { firing: HashSet::new(), resolved: HashSet::new(), last_notify: Utc::now() };
        log.set("r1", gk, e1.clone());
        assert_eq!(log.get("r2", gk), None);
        assert_eq!(log.get("r1", gk), Some(e1));
    }
}
