//! Pending-event buffer.

use parking_lot::Mutex;

use super::events::EnrichedEvent;

/// Ordered buffer of enriched events awaiting the next flush.
///
/// `append` and `snapshot_and_clear` share one lock, so a snapshot contains
/// exactly the events appended before it and every later append lands in
/// the fresh buffer.
#[derive(Debug, Default)]
pub struct BatchQueue {
    events: Mutex<Vec<EnrichedEvent>>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: EnrichedEvent) {
        self.events.lock().push(event);
    }

    /// Take every queued event in arrival order, leaving the queue empty.
    pub fn snapshot_and_clear(&self) -> Vec<EnrichedEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}
