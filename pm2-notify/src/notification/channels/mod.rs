//! Delivery channels.
//!
//! Exactly one channel is active per process:
//! - SMTP (direct submission to a mail server)
//! - Sendmail (local MTA through a sendmail-compatible binary)
//! - Generic webhooks (HTTP POST of the merged message)
//! - Log (dry run, writes the message to the log)

mod dry_run;
mod email;
mod sendmail;
mod webhook;

pub use dry_run::LogChannel;
pub use email::{EmailChannel, EmailConfig, parse_recipients, parse_sender};
pub use sendmail::{SendmailChannel, SendmailConfig};
pub use webhook::{WebhookAuth, WebhookChannel, WebhookConfig};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::OutboundMessage;
use crate::Result;

/// Transport that delivers merged notifications.
///
/// Implementations must always complete: a send that can hang applies its
/// own timeout and reports it as a delivery error.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Send a merged notification.
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Send a synthetic notification to check the channel configuration.
    async fn test(&self, message: &OutboundMessage) -> Result<()> {
        self.send(message).await
    }
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Submit to an SMTP server.
    Smtp(EmailConfig),
    /// Pipe to a local sendmail-compatible binary.
    Sendmail(SendmailConfig),
    /// Generic webhook channel.
    Webhook(WebhookConfig),
    /// Log only, nothing is sent.
    Log,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::Sendmail(SendmailConfig::default())
    }
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Smtp(_) => "smtp",
            Self::Sendmail(_) => "sendmail",
            Self::Webhook(_) => "webhook",
            Self::Log => "log",
        }
    }

    /// Check the settings that would otherwise only fail on first send.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Smtp(c) if c.smtp_host.trim().is_empty() => {
                Err(crate::Error::config("channel.smtp_host must not be empty"))
            }
            Self::Smtp(c) if c.timeout_secs == 0 => {
                Err(crate::Error::config("channel.timeout_secs must be greater than 0"))
            }
            Self::Sendmail(c) if c.program.trim().is_empty() => {
                Err(crate::Error::config("channel.program must not be empty"))
            }
            Self::Sendmail(c) if c.timeout_secs == 0 => {
                Err(crate::Error::config("channel.timeout_secs must be greater than 0"))
            }
            Self::Webhook(c) if c.url.trim().is_empty() => {
                Err(crate::Error::config("channel.url must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Build the configured channel.
    pub fn build(&self) -> Result<Arc<dyn NotificationChannel>> {
        let channel: Arc<dyn NotificationChannel> = match self {
            Self::Smtp(c) => Arc::new(EmailChannel::new(c.clone())?),
            Self::Sendmail(c) => Arc::new(SendmailChannel::new(c.clone())),
            Self::Webhook(c) => Arc::new(WebhookChannel::new(c.clone())),
            Self::Log => Arc::new(LogChannel),
        };
        Ok(channel)
    }
}
