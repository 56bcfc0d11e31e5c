//! Tracks peers the health monitor has just evicted, so the reconciler,
//! route driver and probe loop can skip them for a cooldown window instead
//! of racing a just-removed peer back into existence.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
pub struct OfflineRegistry {
    inner: Arc<Mutex<HashMap<[u8; 32], Instant>>>,
}

impl OfflineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_offline(&self, pubkey: [u8; 32], cooldown: Duration) {
        self.inner.lock().expect("offline registry lock poisoned").insert(pubkey, Instant::now() + cooldown);
    }

    pub fn is_offline(&self, pubkey: &[u8; 32]) -> bool {
        let mut guard = self.inner.lock().expect("offline registry lock poisoned");
        match guard.get(pubkey) {
            Some(until) if Instant::now() < *until => true,
            Some(_) => {
                guard.remove(pubkey);
                false
            }
            None => false,
        }
    }

    /// Snapshot of everything still within its cooldown window, pruning
    /// anything expired along the way.
    pub fn snapshot(&self) -> HashSet<[u8; 32]> {
        let mut guard = self.inner.lock().expect("offline registry lock poisoned");
        let now = Instant::now();
        guard.retain(|_, until| *until > now);
        guard.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_expires() {
        let registry = OfflineRegistry::new();
        registry.mark_offline([1; 32], Duration::from_millis(10));
        assert!(registry.is_offline(&[1; 32]));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!registry.is_offline(&[1; 32]));
    }

    #[test]
    fn snapshot_excludes_expired() {
        let registry = OfflineRegistry::new();
        registry.mark_offline([1; 32], Duration::from_secs(60));
        registry.mark_offline([2; 32], Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        let snapshot = registry.snapshot();
        assert!(snapshot.contains(&[1; 32]));
        assert!(!snapshot.contains(&[2; 32]));
    }
}
