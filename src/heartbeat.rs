//! The global heartbeat counter: bumped on every enrollment HTTP call made by
//! any monitor, emitted as a [`CoreEvent::Heartbeat`] every 10 increments or every 5 seconds,
//! whichever comes first. Monotonic — the count never decreases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::events::{CoreEvent, EventSink};

const EMIT_EVERY_N: u64 = 10;
const EMIT_EVERY: Duration = Duration::from_secs(5);

pub struct HeartbeatCounter {
    count: AtomicU64,
    last_emitted_count: AtomicU64,
    last_emitted_at: Mutex<Instant>,
}

impl HeartbeatCounter {
    pub fn new() -> Self {
        HeartbeatCounter {
            count: AtomicU64::new(0),
            last_emitted_count: AtomicU64::new(0),
            last_emitted_at: Mutex::new(Instant::now()),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Bumps the counter and emits a heartbeat event if the 10-increment or 5-second threshold
    /// has been crossed since the last one.
    pub fn tick(&self, events: &dyn EventSink) {
        let new_count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let last_count = self.last_emitted_count.load(Ordering::SeqCst);

        let due_by_time = {
            let mut guard = self.last_emitted_at.lock().unwrap();
            if guard.elapsed() >= EMIT_EVERY {
                *guard = Instant::now();
                true
            } else {
                false
            }
        };

        if new_count - last_count >= EMIT_EVERY_N || due_by_time {
            self.last_emitted_count.store(new_count, Ordering::SeqCst);
            events.emit(CoreEvent::Heartbeat(new_count));
        }
    }
}

impl Default for HeartbeatCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;

    #[test]
    fn emits_every_ten_increments() {
        let counter = HeartbeatCounter::new();
        let sink = RecordingEventSink::new();
        for _ in 0..10 {
            counter.tick(&sink);
        }
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CoreEvent::Heartbeat(10)));
    }

    #[test]
    fn counter_is_monotonic() {
        let counter = HeartbeatCounter::new();
        let sink = RecordingEventSink::new();
        for _ in 0..25 {
            counter.tick(&sink);
        }
        assert_eq!(counter.count(), 25);
    }
}
