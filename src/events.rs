//! The narrow event-sink interface the core emits through. The desktop UI shell is an
//! external collaborator that adapts these events into whatever it needs; the core itself
//! only needs to know that *something* is listening, which makes it usable from a non-GUI
//! test harness.

use crate::types::TeachingClassRecord;

/// One event the core can emit.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A free-text status update, analogous to an `info!`/`println!` progress line,
    /// surfaced to the UI instead of (or in addition to) the log.
    Status(String),
    /// Whether the session is currently believed to be online, with a human-readable detail
    /// string.
    LoginStatus { online: bool, detail: String },
    /// The monotonic heartbeat counter, emitted roughly every 10 increments or 5 seconds.
    Heartbeat(u64),
    /// A wishlist entry was successfully acquired.
    GrabSuccess(TeachingClassRecord),
    /// A grab attempt failed for a non-terminal reason (still being retried).
    GrabFailed(String),
    /// The catalog query observed an opening for a course not yet targeted, or additional
    /// detail about a targeted one.
    AvailabilityDetected {
        course_name: String,
        teacher_name: String,
        remain: i64,
        capacity: i64,
    },
    /// The session was rotated; the new token/cookie set the UI shell may want to persist.
    SessionUpdated { token: String },
    /// Surfaced prominently: credentials are rejected and the user must supply new ones.
    NeedRelogin,
    /// Surfaced prominently: a swap's emergency rollback could not re-acquire the dropped
    /// course before the deadline. The student must reconcile manually.
    SwapDangling {
        dropped_course_name: String,
        target_course_name: String,
    },
}

/// The sink the core emits [`CoreEvent`]s through. Implemented by the UI shell in production
/// and by a simple recorder in tests.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CoreEvent);
}

/// An [`EventSink`] backed by an unbounded channel, the natural adapter for an embedding
/// process (UI shell or test harness) that wants to drain events on its own schedule.
pub struct ChannelEventSink {
    sender: tokio::sync::mpsc::UnboundedSender<CoreEvent>,
}

impl ChannelEventSink {
    /// Creates a new channel-backed sink, returning it paired with the receiving end.
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<CoreEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (ChannelEventSink { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: CoreEvent) {
        // The receiver may have been dropped (e.g. the UI shell shut down); that's not a core
        // concern, so a failed send is silently ignored.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
/// A recording sink used by tests that need to assert on what was emitted.
pub struct RecordingEventSink {
    pub events: std::sync::Mutex<Vec<CoreEvent>>,
}

#[cfg(test)]
impl RecordingEventSink {
    pub fn new() -> Self {
        RecordingEventSink {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl EventSink for RecordingEventSink {
    fn emit(&self, event: CoreEvent) {
        self.events.lock().unwrap().push(event);
    }
}
