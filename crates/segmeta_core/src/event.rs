//! Event scheduler contract.
//!
//! The metadata core never runs listener code inline from a hot path;
//! notifications (a segment became free, a checkpoint completed) are
//! handed to an [`EventScheduler`] as deferred units of work. No ordering
//! is guaranteed between two independently enqueued events.

use parking_lot::Mutex;

/// A deferred unit of work.
pub type Event = Box<dyn FnOnce() + Send>;

/// Schedules deferred work on behalf of the metadata core.
///
/// Implementations decide where and when events run; the core only
/// requires that enqueueing never blocks on the event's execution.
pub trait EventScheduler: Send + Sync {
    /// Enqueues an event for later execution.
    fn enqueue(&self, event: Event);
}

/// A scheduler that runs events immediately on the calling thread.
///
/// The default for embedders without their own executor. Events run
/// before `enqueue` returns, outside any core-internal lock.
#[derive(Debug, Default)]
pub struct InlineScheduler;

impl InlineScheduler {
    /// Creates a new inline scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventScheduler for InlineScheduler {
    fn enqueue(&self, event: Event) {
        event();
    }
}

/// A scheduler that collects events until explicitly drained.
///
/// Lets tests observe that a notification was deferred rather than run
/// synchronously, and control exactly when it runs.
#[derive(Default)]
pub struct QueuedScheduler {
    queue: Mutex<Vec<Event>>,
}

impl QueuedScheduler {
    /// Creates a new queued scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs all pending events, returning how many ran.
    ///
    /// Events enqueued while draining are picked up by the next drain.
    pub fn drain(&self) -> usize {
        let events: Vec<Event> = std::mem::take(&mut *self.queue.lock());
        let count = events.len();
        for event in events {
            event();
        }
        count
    }
}

impl EventScheduler for QueuedScheduler {
    fn enqueue(&self, event: Event) {
        self.queue.lock().push(event);
    }
}

impl std::fmt::Debug for QueuedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}
