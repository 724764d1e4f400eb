//! Typed bus packets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Topic carrying process lifecycle events.
pub const PROCESS_EVENT_TOPIC: &str = "process:event";

/// Topic published when the process manager itself is being killed.
pub const KILL_TOPIC: &str = "pm2:kill";

/// Metadata about the managed process an event refers to.
///
/// Only the fields used for notifications are typed; everything else the
/// producer sends is kept in `extra` so templates can still reference it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Application name.
    pub name: String,
    /// Process manager id.
    #[serde(default)]
    pub pm_id: Option<u64>,
    /// OS process id.
    #[serde(default)]
    pub pid: Option<u64>,
    /// Time the process was (re)started, epoch milliseconds.
    #[serde(default)]
    pub pm_uptime: Option<i64>,
    /// Path of the stdout log file.
    #[serde(default)]
    pub pm_out_log_path: Option<String>,
    /// Path of the stderr log file.
    #[serde(default)]
    pub pm_err_log_path: Option<String>,
    /// Any other producer-supplied field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProcessInfo {
    /// Create process metadata with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pm_id: None,
            pid: None,
            pm_uptime: None,
            pm_out_log_path: None,
            pm_err_log_path: None,
            extra: Map::new(),
        }
    }

    /// Process start time as a UTC timestamp.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.pm_uptime.and_then(DateTime::from_timestamp_millis)
    }
}

/// A process lifecycle event as published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event kind (`start`, `stop`, `exit`, `restart`, ...).
    #[serde(rename = "event")]
    pub kind: String,
    /// Occurrence time, epoch milliseconds.
    pub at: i64,
    /// Whether the event was triggered by an operator command.
    #[serde(default)]
    pub manually: bool,
    /// The process the event refers to.
    pub process: ProcessInfo,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>, at: i64, process: ProcessInfo) -> Self {
        Self {
            kind: kind.into(),
            at,
            manually: false,
            process,
        }
    }

    /// Occurrence time as a UTC timestamp.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.at)
    }
}

/// A decoded bus packet.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// A process lifecycle event.
    ProcessEvent(RawEvent),
    /// The process manager is shutting down.
    Kill { message: Option<String> },
    /// Any topic this crate does not model.
    Other { topic: String },
}

impl BusMessage {
    pub fn topic(&self) -> &str {
        match self {
            Self::ProcessEvent(_) => PROCESS_EVENT_TOPIC,
            Self::Kill { .. } => KILL_TOPIC,
            Self::Other { topic } => topic,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    topic: String,
    #[serde(default)]
    data: Value,
}

/// Decode one line of the bus feed.
pub fn decode_line(line: &str) -> Result<BusMessage> {
    let envelope: Envelope = serde_json::from_str(line)?;

    let message = match envelope.topic.as_str() {
        PROCESS_EVENT_TOPIC => BusMessage::ProcessEvent(serde_json::from_value(envelope.data)?),
        KILL_TOPIC => BusMessage::Kill {
            message: envelope
                .data
                .get("msg")
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        _ => BusMessage::Other {
            topic: envelope.topic,
        },
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_process_event() {
        let line = r#"{"topic":"process:event","data":{"event":"restart","at":1700000000000,"manually":false,"process":{"name":"api","pm_id":3,"pid":4242,"pm_uptime":1699999990000,"pm_out_log_path":"/logs/api-out.log","pm_err_log_path":"/logs/api-error.log","restart_time":7}}}"#;

        let BusMessage::ProcessEvent(event) = decode_line(line).unwrap() else {
            panic!("expected a process event");
        };

        assert_eq!(event.kind, "restart");
        assert!(!event.manually);
        assert_eq!(event.process.name, "api");
        assert_eq!(event.process.pm_id, Some(3));
        assert_eq!(event.process.pid, Some(4242));
        assert_eq!(
            event.process.pm_out_log_path.as_deref(),
            Some("/logs/api-out.log")
        );
        assert_eq!(event.process.extra.get("restart_time"), Some(&Value::from(7)));
        assert_eq!(
            event.occurred_at().unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_decode_defaults_manually_to_false() {
        let line = r#"{"topic":"process:event","data":{"event":"exit","at":0,"process":{"name":"worker"}}}"#;
        let BusMessage::ProcessEvent(event) = decode_line(line).unwrap() else {
            panic!("expected a process event");
        };
        assert!(!event.manually);
        assert_eq!(event.process.pm_uptime, None);
        assert!(event.process.extra.is_empty());
    }

    #[test]
    fn test_decode_kill() {
        let line = r#"{"topic":"pm2:kill","data":{"msg":"pm2 has been killed"}}"#;
        assert_eq!(
            decode_line(line).unwrap(),
            BusMessage::Kill {
                message: Some("pm2 has been killed".to_string())
            }
        );

        let bare = r#"{"topic":"pm2:kill"}"#;
        assert_eq!(decode_line(bare).unwrap(), BusMessage::Kill { message: None });
    }

    #[test]
    fn test_decode_other_topic() {
        let line = r#"{"topic":"log:out","data":{"data":"hello"}}"#;
        let message = decode_line(line).unwrap();
        assert_eq!(message.topic(), "log:out");
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_line("not json").is_err());
        // A process event without the process block is malformed.
        assert!(decode_line(r#"{"topic":"process:event","data":{"event":"exit","at":0}}"#).is_err());
    }
}
