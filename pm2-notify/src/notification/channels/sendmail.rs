//! E-mail channel handing messages to a local sendmail binary.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{AsyncSendmailTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::NotificationChannel;
use super::email::build_email;
use crate::notification::events::OutboundMessage;
use crate::{Error, Result};

/// Sendmail channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendmailConfig {
    /// Sendmail-compatible program, called as `<program> -i -f <from> -- <to>...`.
    pub program: String,
    /// Give up when the program has not finished after this many seconds.
    pub timeout_secs: u64,
}

impl Default for SendmailConfig {
    fn default() -> Self {
        Self {
            program: "sendmail".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Delivers notifications through the local MTA.
pub struct SendmailChannel {
    config: SendmailConfig,
    transport: AsyncSendmailTransport<Tokio1Executor>,
}

impl SendmailChannel {
    pub fn new(config: SendmailConfig) -> Self {
        let transport = AsyncSendmailTransport::<Tokio1Executor>::new_with_command(&config.program);
        Self { config, transport }
    }
}

#[async_trait]
impl NotificationChannel for SendmailChannel {
    fn channel_type(&self) -> &'static str {
        "sendmail"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let email = build_email(message).await?;
        let program = &self.config.program;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        tokio::time::timeout(timeout, self.transport.send(email))
            .await
            .map_err(|_| {
                Error::delivery(format!(
                    "{program} did not finish within {}s",
                    self.config.timeout_secs
                ))
            })?
            .map_err(|e| Error::delivery(format!("{program} failed: {e}")))?;

        debug!(to = %message.to, "Mail handed to {}: {}", program, message.subject);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn message() -> OutboundMessage {
        OutboundMessage {
            from: "PM2 <pm2@example.com>".to_string(),
            to: "ops@example.com".to_string(),
            subject: "[web-1] api restart".to_string(),
            body: "api restart\nworker exit".to_string(),
            attachments: Vec::new(),
        }
    }

    /// Write an executable shell script standing in for sendmail.
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn channel(program: &Path, timeout_secs: u64) -> SendmailChannel {
        SendmailChannel::new(SendmailConfig {
            program: program.display().to_string(),
            timeout_secs,
        })
    }

    #[tokio::test]
    async fn test_message_is_piped_with_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let mail = dir.path().join("mail.eml");
        let argv = dir.path().join("argv");
        let program = script(
            dir.path(),
            "sendmail",
            &format!("echo \"$@\" > '{}'\ncat > '{}'", argv.display(), mail.display()),
        );

        channel(&program, 5).send(&message()).await.unwrap();

        let args = std::fs::read_to_string(&argv).unwrap();
        assert!(args.contains("-f pm2@example.com"));
        assert!(args.trim_end().ends_with("ops@example.com"));
        let raw = std::fs::read_to_string(&mail).unwrap();
        assert!(raw.contains("Subject: [web-1] api restart"));
    }

    #[tokio::test]
    async fn test_failures_are_delivery_errors() {
        let dir = tempfile::tempdir().unwrap();
        let failing = script(dir.path(), "failing", "cat > /dev/null\nexit 75");
        assert!(matches!(
            channel(&failing, 5).send(&message()).await,
            Err(Error::Delivery(_))
        ));

        let missing = dir.path().join("missing");
        assert!(matches!(
            channel(&missing, 5).send(&message()).await,
            Err(Error::Delivery(_))
        ));
    }

    #[tokio::test]
    async fn test_hung_program_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let hung = script(dir.path(), "hung", "sleep 10");
        let err = channel(&hung, 1).send(&message()).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }
}
