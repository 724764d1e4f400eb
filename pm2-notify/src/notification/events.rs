//! Notification data model.
//!
//! [`EnrichedEvent`] is a bus event with its display-ready fields attached;
//! [`OutboundMessage`] is what a flush hands to the delivery channel.

use pm2_bus::RawEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::template::TemplateFields;

/// Top-level placeholder names an event can resolve.
///
/// Anything under `process.` is also accepted since producers may attach
/// arbitrary process fields.
pub const EVENT_FIELDS: &[&str] = &[
    "event", "kind", "at", "date", "manually", "hostname", "uptime", "text",
];

/// Whether `name` can ever resolve against an [`EnrichedEvent`].
pub fn is_known_field(name: &str) -> bool {
    EVENT_FIELDS.contains(&name)
        || name
            .strip_prefix("process.")
            .is_some_and(|rest| !rest.is_empty())
}

/// A file attached to a notification.
///
/// Two attachments are the same attachment when their paths match; the
/// filename is display only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub path: String,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
        }
    }

    /// Build an attachment from a path, using its base name as filename.
    pub fn from_path(path: &str) -> Self {
        Self::new(crate::utils::fs::base_name(path), path)
    }
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Attachment {}

/// A bus event accepted for notification, with derived display fields.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    /// The event as received.
    pub raw: RawEvent,
    /// Host the notifier runs on.
    pub hostname: String,
    /// Occurrence time, `YYYY-MM-DD HH:mm:ss`.
    pub date: String,
    /// Process start time, `YYYY-MM-DD HH:mm:ss`, when known.
    pub uptime: Option<String>,
    /// Rendered body text.
    pub text: String,
    /// Log files to attach.
    pub attachments: Vec<Attachment>,
}

impl EnrichedEvent {
    pub fn kind(&self) -> &str {
        &self.raw.kind
    }

    pub fn process_name(&self) -> &str {
        &self.raw.process.name
    }

    fn process_field(&self, name: &str) -> Option<String> {
        let process = &self.raw.process;
        match name {
            "name" => Some(process.name.clone()),
            "pm_id" => process.pm_id.map(|v| v.to_string()),
            "pid" => process.pid.map(|v| v.to_string()),
            // Displayed formatted, like the top-level `uptime`.
            "pm_uptime" => self.uptime.clone(),
            "pm_out_log_path" => process.pm_out_log_path.clone(),
            "pm_err_log_path" => process.pm_err_log_path.clone(),
            other => process.extra.get(other).and_then(display_value),
        }
    }
}

impl TemplateFields for EnrichedEvent {
    fn field(&self, name: &str) -> Option<String> {
        if let Some(rest) = name.strip_prefix("process.") {
            return self.process_field(rest);
        }
        match name {
            "event" | "kind" => Some(self.raw.kind.clone()),
            "at" => Some(self.raw.at.to_string()),
            "date" => Some(self.date.clone()),
            "manually" => Some(self.raw.manually.to_string()),
            "hostname" => Some(self.hostname.clone()),
            "uptime" => self.uptime.clone(),
            // Not available while the body itself is being rendered.
            "text" if !self.text.is_empty() => Some(self.text.clone()),
            _ => None,
        }
    }
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A merged notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Markdown-capable body.
    pub body: String,
    pub attachments: Vec<Attachment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pm2_bus::ProcessInfo;

    fn event() -> EnrichedEvent {
        let mut process = ProcessInfo::named("api");
        process.pm_id = Some(2);
        process.extra.insert("restart_time".into(), Value::from(5));
        process.extra.insert("status".into(), Value::from("errored"));
        process.extra.insert("versioning".into(), Value::Null);
        EnrichedEvent {
            raw: RawEvent::new("exit", 1_700_000_000_000, process),
            hostname: "web-1".to_string(),
            date: "2023-11-14 22:13:20".to_string(),
            uptime: None,
            text: String::new(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_attachment_equality_is_by_path() {
        let a = Attachment::new("out.log", "/logs/api-out.log");
        let b = Attachment::new("renamed.log", "/logs/api-out.log");
        let c = Attachment::new("out.log", "/other/api-out.log");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_attachment_from_path() {
        let a = Attachment::from_path("/home/app/.pm2/logs/api-error.log");
        assert_eq!(a.filename, "api-error.log");
        assert_eq!(a.path, "/home/app/.pm2/logs/api-error.log");
    }

    #[test]
    fn test_field_lookup() {
        let event = event();
        assert_eq!(event.field("event").as_deref(), Some("exit"));
        assert_eq!(event.field("kind").as_deref(), Some("exit"));
        assert_eq!(event.field("manually").as_deref(), Some("false"));
        assert_eq!(event.field("process.name").as_deref(), Some("api"));
        assert_eq!(event.field("process.pm_id").as_deref(), Some("2"));
        assert_eq!(event.field("process.restart_time").as_deref(), Some("5"));
        assert_eq!(event.field("process.status").as_deref(), Some("errored"));
        assert_eq!(event.field("process.versioning"), None);
        assert_eq!(event.field("process.pid"), None);
        assert_eq!(event.field("uptime"), None);
        assert_eq!(event.field("text"), None);
        assert_eq!(event.field("unknown"), None);
    }

    #[test]
    fn test_known_fields() {
        assert!(is_known_field("date"));
        assert!(is_known_field("process.anything"));
        assert!(!is_known_field("process."));
        assert!(!is_known_field("proces.name"));
    }
}
