//! Dry-run channel.

use async_trait::async_trait;
use tracing::{debug, info};

use super::NotificationChannel;
use crate::Result;
use crate::notification::events::OutboundMessage;

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn channel_type(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        info!(
            to = %message.to,
            attachments = message.attachments.len(),
            "Notification (dry run): {}",
            message.subject
        );
        debug!(from = %message.from, "{}", message.body);
        Ok(())
    }
}
