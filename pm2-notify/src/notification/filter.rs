//! Relevance filter for incoming bus events.

use std::collections::HashSet;

use pm2_bus::RawEvent;

/// Accepts events whose kind is watched and which were not triggered by an
/// operator.
#[derive(Debug, Clone)]
pub struct EventFilter {
    watched: HashSet<String>,
}

impl EventFilter {
    pub fn new<I, S>(watched: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            watched: watched.into_iter().map(Into::into).collect(),
        }
    }

    pub fn accept(&self, event: &RawEvent) -> bool {
        !event.manually && self.watched.contains(&event.kind)
    }
}
