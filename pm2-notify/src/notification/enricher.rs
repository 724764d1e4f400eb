//! Typed construction of [`EnrichedEvent`]s from raw bus events.

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use pm2_bus::RawEvent;
use tracing::warn;

use super::events::{Attachment, EnrichedEvent, is_known_field};
use super::template::Template;
use crate::{Error, Result};

/// Display format for event and uptime timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp in the given zone, or host local time when `None`.
pub fn format_timestamp(timestamp: DateTime<Utc>, timezone: Option<Tz>) -> String {
    match timezone {
        Some(tz) => timestamp.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string(),
        None => timestamp
            .with_timezone(&Local)
            .format(TIMESTAMP_FORMAT)
            .to_string(),
    }
}

/// Name of the host this process runs on.
pub fn local_hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

/// Check that every placeholder of `template` can resolve against an event.
pub fn validate_placeholders(label: &str, template: &Template) -> Result<()> {
    if let Some(unknown) = template.placeholders().find(|name| !is_known_field(name)) {
        return Err(Error::config(format!(
            "{label} template references unknown placeholder {{{unknown}}}"
        )));
    }
    Ok(())
}

/// Derives display fields and attachments for accepted events.
#[derive(Debug, Clone)]
pub struct EventEnricher {
    hostname: String,
    timezone: Option<Tz>,
    body: Template,
    attach_logs: bool,
}

impl EventEnricher {
    /// Create an enricher around a preloaded body template.
    ///
    /// The template is validated here so a bad template fails at startup
    /// instead of on the first event.
    pub fn new(
        hostname: impl Into<String>,
        body: Template,
        attach_logs: bool,
        timezone: Option<Tz>,
    ) -> Result<Self> {
        if body.is_blank() {
            return Err(Error::config("body template is empty"));
        }
        validate_placeholders("body", &body)?;
        if body.placeholders().any(|name| name == "text") {
            return Err(Error::config(
                "body template cannot reference {text}, it is the rendered body itself",
            ));
        }

        Ok(Self {
            hostname: hostname.into(),
            timezone,
            body,
            attach_logs,
        })
    }

    /// Build the enriched event.
    ///
    /// Fails when the occurrence time is out of range or the body renders
    /// to nothing.
    pub fn enrich(&self, raw: RawEvent) -> Result<EnrichedEvent> {
        let occurred_at = raw
            .occurred_at()
            .ok_or_else(|| Error::Other(format!("event timestamp {} is out of range", raw.at)))?;

        let date = format_timestamp(occurred_at, self.timezone);
        let uptime = raw
            .process
            .started_at()
            .map(|started| format_timestamp(started, self.timezone));

        let attachments = if self.attach_logs {
            log_attachments(&raw)
        } else {
            Vec::new()
        };

        let mut event = EnrichedEvent {
            raw,
            hostname: self.hostname.clone(),
            date,
            uptime,
            text: String::new(),
            attachments,
        };

        let text = self.body.render(&event)?;
        if text.trim().is_empty() {
            return Err(Error::config(format!(
                "body rendered empty for {} {}",
                event.process_name(),
                event.kind()
            )));
        }
        event.text = text;

        Ok(event)
    }
}

/// Stdout log first, then stderr log.
fn log_attachments(raw: &RawEvent) -> Vec<Attachment> {
    let process = &raw.process;
    let mut attachments = Vec::with_capacity(2);

    for (label, path) in [
        ("stdout", process.pm_out_log_path.as_deref()),
        ("stderr", process.pm_err_log_path.as_deref()),
    ] {
        match path {
            Some(path) if !path.is_empty() => attachments.push(Attachment::from_path(path)),
            _ => warn!(
                process = %process.name,
                "No {} log path reported, attachment skipped", label
            ),
        }
    }

    attachments
}
