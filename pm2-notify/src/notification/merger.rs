//! Folding a batch of events into one outbound message.

use std::collections::HashSet;

use super::enricher::validate_placeholders;
use super::events::{Attachment, EnrichedEvent, OutboundMessage};
use super::template::Template;
use crate::{Error, Result};

/// Separator between event bodies in a merged message.
pub const BODY_SEPARATOR: &str = "\n";

/// Builds the single message sent for a flushed batch.
#[derive(Debug, Clone)]
pub struct BatchMerger {
    subject: Template,
    from: String,
    to: String,
    attach_logs: bool,
}

impl BatchMerger {
    pub fn new(
        subject: Template,
        from: impl Into<String>,
        to: impl Into<String>,
        attach_logs: bool,
    ) -> Result<Self> {
        if subject.is_blank() {
            return Err(Error::config("subject template is empty"));
        }
        validate_placeholders("subject", &subject)?;

        let from = from.into();
        let to = to.into();
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(Error::config("mail.from and mail.to must both be set"));
        }

        Ok(Self {
            subject,
            from,
            to,
            attach_logs,
        })
    }

    /// Merge events, oldest first.
    ///
    /// The subject comes from the oldest event only. Bodies are joined in
    /// arrival order. Attachments are deduplicated by path, keeping the first
    /// occurrence, and only included when log attachment is enabled.
    pub fn merge(&self, events: &[EnrichedEvent]) -> Result<OutboundMessage> {
        let first = events.first().ok_or(Error::EmptyBatch)?;

        let subject = self.subject.render(first)?;
        if subject.trim().is_empty() {
            return Err(Error::config("subject rendered empty"));
        }

        let body = events
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join(BODY_SEPARATOR);
        if body.trim().is_empty() {
            return Err(Error::config("merged body is empty"));
        }

        let attachments = if self.attach_logs {
            dedup_attachments(events)
        } else {
            Vec::new()
        };

        Ok(OutboundMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            subject,
            body,
            attachments,
        })
    }
}

fn dedup_attachments(events: &[EnrichedEvent]) -> Vec<Attachment> {
    let mut seen = HashSet::new();
    events
        .iter()
        .flat_map(|e| e.attachments.iter())
        .filter(|a| seen.insert(a.path.as_str()))
        .cloned()
        .collect()
}
