//! Lock-free "latest value" handoff between the engine's loops.
//!
//! The analysis thread, sync intake and tick loop only ever care about the
//! most recent band energies and beat signal: a stale beat phase is worse
//! than a dropped one, so this is an atomic swap of immutable snapshots,
//! not a queue.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Single-writer atomic publication of immutable snapshots.
///
/// Writers call [`publish`](Latest::publish); any number of readers call
/// [`get`](Latest::get) without blocking and receive the newest snapshot
/// (or `None` before the first publish).
#[derive(Default)]
pub struct Latest<T> {
    slot: ArcSwapOption<T>,
}

impl<T> Latest<T> {
    /// An empty slot
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }

    /// Replace the current snapshot
    pub fn publish(&self, value: T) {
        self.slot.store(Some(Arc::new(value)));
    }

    /// The newest snapshot, if any
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Drop the current snapshot
    pub fn clear(&self) {
        self.slot.store(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn publish_and_get() {
        let latest = Latest::new();
        assert!(latest.get().is_none());
        latest.publish(7u32);
        assert_eq!(*latest.get().unwrap(), 7);
        latest.publish(9u32);
        assert_eq!(*latest.get().unwrap(), 9);
        latest.clear();
        assert!(latest.get().is_none());
    }

    #[test]
    fn readers_see_monotonic_values() {
        let latest = Arc::new(Latest::new());
        let writer = {
            let latest = Arc::clone(&latest);
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    latest.publish(i);
                }
            })
        };

        let mut prev = 0u64;
        while !writer.is_finished() {
            if let Some(v) = latest.get() {
                assert!(*v >= prev, "went backward: {prev} -> {v}");
                prev = *v;
            }
        }
        writer.join().unwrap();
        assert_eq!(*latest.get().unwrap(), 9_999);
    }
}
