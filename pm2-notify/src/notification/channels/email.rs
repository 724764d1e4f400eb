//! Email notification channel using SMTP.
//!
//! Also builds the MIME message shared with the sendmail channel.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::{self, ContentType};
use lettre::message::{Attachment as MailAttachment, Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::NotificationChannel;
use crate::notification::events::{Attachment, OutboundMessage};
use crate::utils::fs::read_bytes;
use crate::{Error, Result};

/// Email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// SMTP server host.
    pub smtp_host: String,
    /// SMTP server port.
    pub smtp_port: u16,
    /// SMTP username.
    pub smtp_username: Option<String>,
    /// SMTP password.
    pub smtp_password: Option<String>,
    /// Use TLS. STARTTLS unless `implicit_tls` is set.
    pub use_tls: bool,
    /// Connect with TLS from the start (usually port 465).
    pub implicit_tls: bool,
    /// Connection and command timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            use_tls: true,
            implicit_tls: false,
            timeout_secs: 30,
        }
    }
}

/// Email notification channel.
pub struct EmailChannel {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    /// Create a new Email channel.
    pub fn new(config: EmailConfig) -> Result<Self> {
        let transport = build_transport(&config)?;
        Ok(Self { config, transport })
    }
}

fn build_transport(config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let host = config.smtp_host.as_str();
    let mut builder = if !config.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
    } else if config.implicit_tls {
        AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| Error::config(format!("Invalid SMTP relay {host}: {e}")))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| Error::config(format!("Invalid SMTP relay {host}: {e}")))?
    };

    builder = builder
        .port(config.smtp_port)
        .timeout(Some(Duration::from_secs(config.timeout_secs)));

    if let Some(username) = &config.smtp_username {
        builder = builder.credentials(Credentials::new(
            username.clone(),
            config.smtp_password.clone().unwrap_or_default(),
        ));
    }

    Ok(builder.build())
}

/// Parse the sender address.
pub fn parse_sender(from: &str) -> Result<Mailbox> {
    from.trim()
        .parse()
        .map_err(|e| Error::config(format!("invalid sender address {from:?}: {e}")))
}

/// Parse a comma separated recipient list.
pub fn parse_recipients(to: &str) -> Result<Mailboxes> {
    to.trim()
        .parse()
        .map_err(|e| Error::config(format!("invalid recipient address {to:?}: {e}")))
}

/// Read attachment contents. Unreadable files are left out.
async fn load_attachments(attachments: &[Attachment]) -> Vec<(String, Vec<u8>)> {
    let mut loaded = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        match read_bytes("reading attachment", Path::new(&attachment.path)).await {
            Ok(content) => loaded.push((attachment.filename.clone(), content)),
            Err(e) => warn!(error = %e, "Attachment skipped"),
        }
    }
    loaded
}

/// Build the mail for a merged notification, reading attached logs from disk.
pub(crate) async fn build_email(message: &OutboundMessage) -> Result<Message> {
    let attachments = load_attachments(&message.attachments).await;
    compose(message, attachments)
}

/// Assemble the MIME message.
///
/// The body is a `text/markdown` part. With attachments the message becomes
/// `multipart/mixed`.
pub(crate) fn compose(
    message: &OutboundMessage,
    attachments: Vec<(String, Vec<u8>)>,
) -> Result<Message> {
    let builder = Message::builder()
        .from(parse_sender(&message.from)?)
        .mailbox(header::To::from(parse_recipients(&message.to)?))
        .subject(message.subject.clone());

    let markdown = ContentType::parse("text/markdown; charset=utf-8")
        .map_err(|e| Error::Other(format!("invalid content type: {e}")))?;
    let body = SinglePart::builder()
        .header(markdown)
        .body(message.body.clone());

    let email = if attachments.is_empty() {
        builder.singlepart(body)
    } else {
        let mut multipart = MultiPart::mixed().singlepart(body);
        for (filename, content) in attachments {
            multipart = multipart
                .singlepart(MailAttachment::new(filename).body(content, ContentType::TEXT_PLAIN));
        }
        builder.multipart(multipart)
    };

    email.map_err(|e| Error::delivery(format!("Failed to build mail: {e}")))
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let email = build_email(message).await?;

        self.transport
            .send(email)
            .await
            .map_err(|e| Error::delivery(format!("SMTP delivery failed: {e}")))?;

        debug!(
            host = %self.config.smtp_host,
            to = %message.to,
            "Email notification sent: {}",
            message.subject
        );
        Ok(())
    }
}
