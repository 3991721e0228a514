//! In-memory caches backing the stream ingester.
//!
//! The two wallet sets are immutable snapshots swapped atomically on
//! refresh, never mutated in place, so the hot read path takes no
//! write-side hazards. The pending-orders mirror is a refreshable cache of
//! open outbound orders, not authoritative storage.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

#[derive(Default)]
pub struct WalletSets {
    follow: RwLock<Arc<HashSet<String>>>,
    target: RwLock<Arc<HashSet<String>>>,
}

impl WalletSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn swap_follow(&self, set: HashSet<String>) {
        *self.follow.write() = Arc::new(set);
    }

    pub fn swap_target(&self, set: HashSet<String>) {
        *self.target.write() = Arc::new(set);
    }

    /// Consistent point-in-time view of both sets.
    pub fn snapshot(&self) -> (Arc<HashSet<String>>, Arc<HashSet<String>>) {
        (self.follow.read().clone(), self.target.read().clone())
    }
}

#[derive(Default)]
pub struct PendingOrders {
    ids: DashMap<String, ()>,
}

impl PendingOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, ids: Vec<String>) {
        self.ids.clear();
        for id in ids {
            self.ids.insert(id, ());
        }
    }

    /// Evict-on-match: returns whether the id was present.
    pub fn remove(&self, id: &str) -> bool {
        self.ids.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_stable_across_a_swap() {
        let sets = WalletSets::new();
        sets.swap_follow(["0xa".to_string()].into_iter().collect());

        let (before, _) = sets.snapshot();
        sets.swap_follow(["0xb".to_string()].into_iter().collect());
        let (after, _) = sets.snapshot();

        assert!(before.contains("0xa"));
        assert!(!after.contains("0xa"));
        assert!(after.contains("0xb"));
    }

    #[test]
    fn pending_orders_evict_on_match() {
        let pending = PendingOrders::new();
        pending.replace(vec!["o1".into(), "o2".into()]);

        assert!(pending.remove("o1"));
        assert!(!pending.remove("o1"));
        assert_eq!(pending.len(), 1);

        pending.replace(vec!["o3".into()]);
        assert!(!pending.remove("o2"));
        assert!(pending.remove("o3"));
    }
}
