use crate::cache::clock;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Slot<V> {
    value: ArcSwap<V>,
    used_time: AtomicU64,
}

impl<V> Slot<V> {
    fn new(value: Arc<V>) -> Arc<Self> {
        Arc::new(Self {
            value: ArcSwap::new(value),
            used_time: AtomicU64::new(clock::steady_ms()),
        })
    }

    fn touch(&self) {
        self.used_time.store(clock::steady_ms(), Ordering::Release);
    }
}

type Snapshot<K, V> = HashMap<K, Arc<Slot<V>>>;

#[derive(Debug)]
struct Dirty<K, V> {
    map: Snapshot<K, V>,
    /// Read misses answered from the dirty map since the last promotion.
    miss_count: usize,
    /// True while the dirty map holds keys the read snapshot does not.
    amended: bool,
    retired_values: Vec<(u64, Arc<V>)>,
    retired_snapshots: Vec<(u64, Arc<Snapshot<K, V>>)>,
}

/// Double-buffered read-mostly concurrent map.
///
/// Reads go through a lock-free snapshot; writes mutate a dirty map under
/// one mutex. Once enough reads have had to fall through to the dirty map,
/// the dirty map is promoted to become the new read snapshot. Replaced
/// values and superseded snapshots are parked in retire lists until
/// [`sweep`] decides no reader can still hold them.
///
/// [`sweep`]: ReadMostlyMap::sweep
#[derive(Debug)]
pub struct ReadMostlyMap<K, V> {
    read: ArcSwap<Snapshot<K, V>>,
    dirty: Mutex<Dirty<K, V>>,
}

impl<K, V> Default for ReadMostlyMap<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ReadMostlyMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            read: ArcSwap::from_pointee(HashMap::new()),
            dirty: Mutex::new(Dirty {
                map: HashMap::new(),
                miss_count: 0,
                amended: false,
                retired_values: Vec::new(),
                retired_snapshots: Vec::new(),
            }),
        }
    }

    /// Lock-free on the read snapshot; falls back to the dirty map under the
    /// mutex, counting a miss toward promotion. Refreshes the entry's
    /// last-access time.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let read = self.read.load();
        if let Some(slot) = read.get(key) {
            slot.touch();
            return Some(slot.value.load_full());
        }
        drop(read);

        let mut dirty = self.dirty.lock().unwrap();
        if !dirty.amended {
            return None;
        }
        let value = match dirty.map.get(key) {
            Some(slot) => {
                slot.touch();
                slot.value.load_full()
            }
            None => return None,
        };
        dirty.miss_count += 1;
        self.promote_if_due(&mut dirty);
        Some(value)
    }

    /// Like [`get`] but without refreshing the last-access time or counting
    /// a promotion miss. Used by background inspection paths.
    ///
    /// [`get`]: ReadMostlyMap::get
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        if let Some(slot) = self.read.load().get(key) {
            return Some(slot.value.load_full());
        }
        let dirty = self.dirty.lock().unwrap();
        dirty.map.get(key).map(|slot| slot.value.load_full())
    }

    /// Insert-or-replace. The replaced value moves to the retire list.
    pub fn update(&self, key: K, value: Arc<V>) {
        let mut dirty = self.dirty.lock().unwrap();
        if let Some(slot) = dirty.map.get(&key) {
            let old = slot.value.swap(value);
            slot.touch();
            dirty.retired_values.push((clock::steady_ms(), old));
        } else {
            dirty.map.insert(key, Slot::new(value));
            dirty.amended = true;
        }
    }

    /// Returns the existing value or publishes the factory's value.
    pub fn create_or_get(&self, key: K, factory: impl FnOnce() -> Arc<V>) -> Arc<V> {
        let mut dirty = self.dirty.lock().unwrap();
        if let Some(slot) = dirty.map.get(&key) {
            slot.touch();
            return slot.value.load_full();
        }
        let value = factory();
        dirty.map.insert(key, Slot::new(Arc::clone(&value)));
        dirty.amended = true;
        value
    }

    /// Creates the entry when absent; otherwise replaces it only when the
    /// predicate holds for the current value. Returns the mapping's value
    /// after the call.
    pub fn conditional_update(
        &self,
        key: K,
        updater: impl FnOnce(Option<&Arc<V>>) -> Arc<V>,
        predicate: impl FnOnce(&Arc<V>) -> bool,
    ) -> Arc<V> {
        let mut dirty = self.dirty.lock().unwrap();
        match dirty.map.get(&key) {
            None => {
                let value = updater(None);
                dirty.map.insert(key, Slot::new(Arc::clone(&value)));
                dirty.amended = true;
                value
            }
            Some(slot) => {
                let current = slot.value.load_full();
                if predicate(&current) {
                    let value = updater(Some(&current));
                    let old = slot.value.swap(Arc::clone(&value));
                    slot.touch();
                    dirty.retired_values.push((clock::steady_ms(), old));
                    value
                } else {
                    current
                }
            }
        }
    }

    /// Removes keys from the dirty map, then rebuilds the read snapshot and
    /// swaps it in so deletions become visible to readers immediately.
    /// Idempotent for absent keys.
    pub fn delete(&self, keys: &[K]) {
        if keys.is_empty() {
            return;
        }
        let mut dirty = self.dirty.lock().unwrap();
        let mut changed = false;
        let now = clock::steady_ms();
        for key in keys {
            if let Some(slot) = dirty.map.remove(key) {
                dirty.retired_values.push((now, slot.value.load_full()));
                changed = true;
            }
        }
        if changed {
            let new_read = Arc::new(dirty.map.clone());
            let old_read = self.read.swap(new_read);
            dirty.retired_snapshots.push((now, old_read));
            dirty.miss_count = 0;
            dirty.amended = false;
        }
    }

    /// Drops retired values and snapshots whose retirement precedes
    /// `before_time` (normally the epoch tracker's minimum minus a margin).
    pub fn sweep(&self, before_time: u64) {
        let mut dirty = self.dirty.lock().unwrap();
        dirty.retired_values.retain(|(time, _)| *time >= before_time);
        dirty
            .retired_snapshots
            .retain(|(time, _)| *time >= before_time);
    }

    /// Keys whose last access is at or before the threshold.
    pub fn collect_expired(&self, idle_since: u64) -> Vec<K> {
        let dirty = self.dirty.lock().unwrap();
        dirty
            .map
            .iter()
            .filter(|(_, slot)| slot.used_time.load(Ordering::Acquire) <= idle_since)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn values(&self) -> Vec<Arc<V>> {
        let dirty = self.dirty.lock().unwrap();
        dirty
            .map
            .values()
            .map(|slot| slot.value.load_full())
            .collect()
    }

    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        let dirty = self.dirty.lock().unwrap();
        dirty
            .map
            .iter()
            .map(|(key, slot)| (key.clone(), slot.value.load_full()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.dirty.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn read_snapshot_contains(&self, key: &K) -> bool {
        self.read.load().contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn retired_len(&self) -> usize {
        let dirty = self.dirty.lock().unwrap();
        dirty.retired_values.len() + dirty.retired_snapshots.len()
    }

    fn promote_if_due(&self, dirty: &mut Dirty<K, V>) {
        if dirty.miss_count < dirty.map.len() {
            return;
        }
        let new_read = Arc::new(dirty.map.clone());
        let old_read = self.read.swap(new_read);
        dirty
            .retired_snapshots
            .push((clock::steady_ms(), old_read));
        dirty.miss_count = 0;
        dirty.amended = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_update_goes_through_dirty() {
        let map = ReadMostlyMap::new();
        map.update("a", Arc::new(1u32));
        assert!(!map.read_snapshot_contains(&"a"));
        assert_eq!(map.get(&"a").as_deref(), Some(&1));
    }

    #[test]
    fn test_promotion_after_enough_misses() {
        let map = ReadMostlyMap::new();
        map.update("a", Arc::new(1u32));
        map.update("b", Arc::new(2u32));
        // Two dirty entries: two misses are enough to trigger promotion.
        assert_eq!(map.get(&"a").as_deref(), Some(&1));
        assert_eq!(map.get(&"b").as_deref(), Some(&2));
        assert!(map.read_snapshot_contains(&"a"));
        assert!(map.read_snapshot_contains(&"b"));
    }

    #[test]
    fn test_replace_retires_old_value() {
        let map = ReadMostlyMap::new();
        map.update("a", Arc::new(1u32));
        map.update("a", Arc::new(2u32));
        assert_eq!(map.get(&"a").as_deref(), Some(&2));
        assert!(map.retired_len() >= 1);
        map.sweep(clock::steady_ms() + 1);
        assert_eq!(map.retired_len(), 0);
    }

    #[test]
    fn test_replacement_visible_through_read_snapshot() {
        let map = ReadMostlyMap::new();
        map.update("a", Arc::new(1u32));
        let _ = map.get(&"a"); // promote
        assert!(map.read_snapshot_contains(&"a"));
        map.update("a", Arc::new(5u32));
        // Slot is shared between read and dirty maps; no promotion needed.
        assert_eq!(map.get(&"a").as_deref(), Some(&5));
    }

    #[test]
    fn test_delete_rebuilds_read_snapshot() {
        let map = ReadMostlyMap::new();
        map.update("a", Arc::new(1u32));
        map.update("b", Arc::new(2u32));
        let _ = map.get(&"a");
        let _ = map.get(&"b");
        map.delete(&["a"]);
        assert_eq!(map.get(&"a"), None);
        assert_eq!(map.get(&"b").as_deref(), Some(&2));
        // Deleting an absent key is a no-op.
        map.delete(&["a"]);
    }

    #[test]
    fn test_create_or_get_returns_existing() {
        let map = ReadMostlyMap::new();
        let first = map.create_or_get("a", || Arc::new(1u32));
        let second = map.create_or_get("a", || Arc::new(2u32));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_conditional_update_respects_predicate() {
        let map = ReadMostlyMap::new();
        map.conditional_update("a", |_| Arc::new(1u32), |_| true);
        let kept = map.conditional_update("a", |_| Arc::new(9u32), |current| **current > 5);
        assert_eq!(*kept, 1);
        let replaced = map.conditional_update("a", |_| Arc::new(9u32), |current| **current < 5);
        assert_eq!(*replaced, 9);
    }

    #[test]
    fn test_concurrent_publish_get_and_sweep() {
        use crate::cache::EpochTracker;

        let map = Arc::new(ReadMostlyMap::new());
        let tracker = Arc::new(EpochTracker::new());
        let rounds = 20_000u32;

        let writer = {
            let map = Arc::clone(&map);
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || {
                for round in 0..rounds {
                    map.update("hot", Arc::new(round));
                    if round % 256 == 0 {
                        // Reclaim only what no reader can still hold.
                        map.sweep(tracker.min_time().saturating_sub(1));
                    }
                }
            })
        };

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let map = Arc::clone(&map);
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..rounds {
                        tracker.enter();
                        if let Some(value) = map.get(&"hot") {
                            assert!(*value < rounds);
                        }
                        tracker.exit();
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        map.sweep(clock::steady_ms() + 1);
        assert_eq!(map.retired_len(), 0);
        assert_eq!(map.get(&"hot").as_deref(), Some(&(rounds - 1)));
    }

    #[test]
    fn test_collect_expired_uses_access_time() {
        let map = ReadMostlyMap::new();
        map.update("a", Arc::new(1u32));
        let expired = map.collect_expired(clock::steady_ms());
        assert_eq!(expired, vec!["a"]);
        assert!(map.collect_expired(0).is_empty());
    }
}
