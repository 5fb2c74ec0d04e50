//! Bounded event queue (`spec.md` §4.1, component C1).
//!
//! A single mutex serializes both enqueue and dequeue; an associated counting
//! semaphore (built from a `Mutex<usize>` + `Condvar`, since `std` has no
//! semaphore of its own) tracks "at least one event may be available." This
//! mirrors the original's `k_mutex` + `k_sem` pair around a Zephyr
//! `ring_buf`, adapted from a byte ring to a ring of whole `EventRecord`s
//! since every record here is fixed-size and POD.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::error::{OcreError, Result};
use crate::types::EventRecord;

/// Counting semaphore used for the queue's "events may be available" signal.
///
/// `post` calls `release()` exactly once per successful enqueue; a worker
/// calls `acquire()` before attempting a drain. A drain that then finds the
/// queue empty is a legal spurious wakeup (`spec.md` §4.1 note) and the
/// worker simply loops back to `acquire()`.
struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Semaphore { count: Mutex::new(0), cond: Condvar::new() }
    }

    fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    /// Blocks until at least one permit is available, then consumes it.
    fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }
}

/// Bounded FIFO of [`EventRecord`]s with a blocking producer-side capacity
/// check and batch-draining consumers.
pub struct EventQueue {
    capacity: usize,
    ring: Mutex<VecDeque<EventRecord>>,
    available: Semaphore,
}

impl EventQueue {
    /// `capacity` is the number of whole records the queue can hold
    /// (`spec.md`'s `⌊Q/R⌋`, computed by the caller from the configured byte
    /// budget).
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Semaphore::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues one event. Fails with [`OcreError::OutOfMemory`] if the queue
    /// is at capacity; there is no blocking enqueue (`spec.md` §4.1
    /// Backpressure — loss is visible to the caller).
    pub fn post(&self, event: EventRecord) -> Result<()> {
        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() >= self.capacity {
                return Err(OcreError::OutOfMemory("event queue full"));
            }
            ring.push_back(event);
        }
        self.available.release();
        Ok(())
    }

    /// Blocks for at least one available permit, then drains up to
    /// `max_events` whole records into a freshly allocated batch. Returning
    /// an empty batch is legal (spurious wakeup).
    pub fn acquire_and_drain(&self, max_events: usize) -> Vec<EventRecord> {
        self.available.acquire();
        self.drain(max_events)
    }

    /// Blocks until at least one permit is available (or one is released by
    /// [`EventQueue::wake_n`] to unblock shutdown), without draining
    /// anything. Workers use this to implement "acquire a permit, then
    /// separately decide how much to drain" (`spec.md` §4.4 worker loop
    /// steps 1–3).
    pub fn wait_for_available(&self) {
        self.available.acquire();
    }

    /// Drains up to `max_events` records without waiting on the semaphore.
    /// Used by the guest-callable `get_event` path, which competes with
    /// workers for the same ring (`spec.md` §6, known ambiguity in §9).
    pub fn drain(&self, max_events: usize) -> Vec<EventRecord> {
        let mut ring = self.ring.lock().unwrap();
        let n = max_events.min(ring.len());
        ring.drain(..n).collect()
    }

    /// Pops exactly one record, or `None` if empty. Backs `get_event`.
    pub fn try_pop_one(&self) -> Option<EventRecord> {
        self.ring.lock().unwrap().pop_front()
    }

    /// Wakes up to `n` blocked workers without enqueuing anything, so they
    /// can observe a cleared running flag and exit (`spec.md` §5
    /// Cancellation: "releases one permit per worker").
    pub fn wake_n(&self, n: usize) {
        for _ in 0..n {
            self.available.release();
        }
    }

    /// Number of events currently queued. Diagnostic only.
    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModuleId, ResourceType};

    fn ev(id: u32) -> EventRecord {
        EventRecord {
            kind: ResourceType::Timer,
            owner: ModuleId::from_raw(1),
            id,
            port: 0,
            state: 0,
        }
    }

    #[test]
    fn post_then_drain_preserves_order() {
        let q = EventQueue::new(4);
        for i in 0..3 {
            q.post(ev(i)).unwrap();
        }
        let batch = q.acquire_and_drain(16);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn post_returns_full_once_capacity_reached() {
        let q = EventQueue::new(2);
        q.post(ev(0)).unwrap();
        q.post(ev(1)).unwrap();
        match q.post(ev(2)) {
            Err(OcreError::OutOfMemory(_)) => {}
            other => panic!("expected OutOfMemory, got {other:?}"),
        }
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_never_returns_more_than_requested() {
        let q = EventQueue::new(8);
        for i in 0..5 {
            q.post(ev(i)).unwrap();
        }
        let batch = q.acquire_and_drain(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn try_pop_one_drains_fifo() {
        let q = EventQueue::new(4);
        q.post(ev(10)).unwrap();
        q.post(ev(20)).unwrap();
        assert_eq!(q.try_pop_one().unwrap().id, 10);
        assert_eq!(q.try_pop_one().unwrap().id, 20);
        assert!(q.try_pop_one().is_none());
    }
}
