// ── Engram: Per-Item Locks ──────────────────────────────────────────────────
//
// Striped mutexes keyed by item id. Any operation that reads an item's tier
// and then writes it (store placement, promotion, pin, delete, archive) holds
// the stripe for that id, so two transitions on one item never interleave.
// Different ids usually land on different stripes.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const STRIPES: usize = 64;

pub struct ItemLocks {
    stripes: Vec<Mutex<()>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self { stripes: (0..STRIPES).map(|_| Mutex::new(())).collect() }
    }

    fn stripe(&self, id: &str) -> usize {
        let mut h = DefaultHasher::new();
        id.hash(&mut h);
        (h.finish() as usize) % self.stripes.len()
    }

    pub fn lock(&self, id: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(id)].lock()
    }
}

impl Default for ItemLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn same_id_is_serialized() {
        let locks = Arc::new(ItemLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (locks, inside, max_seen) = (locks.clone(), inside.clone(), max_seen.clone());
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let _g = locks.lock("item-1");
                        let n = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(n, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
