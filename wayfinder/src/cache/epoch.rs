use crate::cache::clock;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[derive(Debug)]
struct ThreadSlot {
    time: AtomicU64,
}

#[derive(Debug, Default)]
struct TrackerShared {
    slots: Mutex<Vec<Arc<ThreadSlot>>>,
}

/// Records, per thread, the time it entered a read-side critical section.
///
/// Reclaimers compare object retirement times against [`min_time`]: a
/// retirement time below the minimum means every thread either is outside or
/// entered after the object was retired, so the object is unreachable.
///
/// [`min_time`]: EpochTracker::min_time
#[derive(Debug)]
pub struct EpochTracker {
    id: u64,
    shared: Arc<TrackerShared>,
}

// Slot registrations are owned by the thread and unregistered on thread
// exit through the guard's Drop.
struct SlotGuard {
    shared: Weak<TrackerShared>,
    slot: Arc<ThreadSlot>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .slots
                .lock()
                .unwrap()
                .retain(|slot| !Arc::ptr_eq(slot, &self.slot));
        }
    }
}

thread_local! {
    static THREAD_SLOTS: RefCell<HashMap<u64, SlotGuard>> = RefCell::new(HashMap::new());
}

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

impl Default for EpochTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochTracker {
    pub fn new() -> Self {
        Self {
            id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
            shared: Arc::new(TrackerShared::default()),
        }
    }

    /// Marks the calling thread as inside a critical section. A single
    /// atomic store after the first call on this thread.
    pub fn enter(&self) {
        let now = clock::steady_ms();
        THREAD_SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(guard) = slots.get(&self.id) {
                guard.slot.time.store(now, Ordering::Release);
                return;
            }
            let slot = Arc::new(ThreadSlot {
                time: AtomicU64::new(now),
            });
            self.shared.slots.lock().unwrap().push(Arc::clone(&slot));
            slots.insert(
                self.id,
                SlotGuard {
                    shared: Arc::downgrade(&self.shared),
                    slot,
                },
            );
        });
    }

    /// Marks the calling thread as outside any critical section.
    pub fn exit(&self) {
        THREAD_SLOTS.with(|slots| {
            if let Some(guard) = slots.borrow().get(&self.id) {
                guard.slot.time.store(clock::MAX_TIME, Ordering::Release);
            }
        });
    }

    /// Minimum enter time over all registered threads, or "now" when every
    /// thread is outside.
    pub fn min_time(&self) -> u64 {
        let mut min = clock::steady_ms();
        let slots = self.shared.slots.lock().unwrap();
        for slot in slots.iter() {
            let time = slot.time.load(Ordering::Acquire);
            if time < min {
                min = time;
            }
        }
        min
    }
}

/// Enter/exit bracket for the extent of a public API call.
pub struct EpochGuard<'a> {
    tracker: &'a EpochTracker,
}

impl<'a> EpochGuard<'a> {
    pub fn new(tracker: &'a EpochTracker) -> Self {
        tracker.enter();
        Self { tracker }
    }
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        self.tracker.exit();
    }
}
