use crate::types::OrgIdentity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Short-lived identity lookups keyed by access token.
///
/// Entries expire lazily on read and a full cache evicts its oldest entry on
/// insert. `sweep` drops every expired entry; the client's upkeep task runs it
/// on each tick.
pub struct IdentityCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, (Instant, OrgIdentity)>>,
}

impl IdentityCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, token: &str) -> Option<OrgIdentity> {
        let mut entries = self.entries.lock();
        let cached = entries
            .get(token)
            .map(|(inserted, identity)| (inserted.elapsed() < self.ttl, identity.clone()));
        match cached {
            Some((true, identity)) => Some(identity),
            Some((false, _)) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, token: &str, identity: OrgIdentity) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(token) {
            let ttl = self.ttl;
            entries.retain(|_, (inserted, _)| inserted.elapsed() < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (inserted, _))| *inserted)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(token.to_string(), (Instant::now(), identity));
    }

    /// Drops expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, (inserted, _)| inserted.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
