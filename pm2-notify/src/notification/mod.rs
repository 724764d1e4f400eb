//! Notification batching module.
//!
//! Turns a stream of process lifecycle events into consolidated e-mail
//! notifications instead of one message per event.
//!
//! # Pipeline
//!
//! - [`EventFilter`] drops manual and unwatched events
//! - [`EventEnricher`] formats timestamps, renders the body and collects log
//!   attachments
//! - [`BatchQueue`] buffers enriched events between flushes
//! - [`BatchNotifier::start_flush_task`] flushes on a fixed interval
//! - [`DeliveryGate`] keeps at most one delivery in flight
//! - [`BatchMerger`] folds a batch into one [`OutboundMessage`]
//! - a [`NotificationChannel`] sends it
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pm2_notify::notification::*;
//!
//! let notifier = Arc::new(BatchNotifier::new(
//!     EventFilter::new(["restart", "exit"]),
//!     EventEnricher::new(local_hostname(), Template::parse("{process.name} {event}")?, true, None)?,
//!     BatchMerger::new(Template::parse("{process.name} {event}")?, "pm2@example.com", "ops@example.com", true)?,
//!     ChannelConfig::Log.build()?,
//!     NotifierSettings::default(),
//! ));
//! notifier.start_flush_task();
//! notifier.listen_for_bus_events(pm2_bus::BusReader::new(tokio::io::stdin()));
//! ```

pub mod channels;
pub mod enricher;
pub mod events;
pub mod filter;
pub mod gate;
pub mod merger;
pub mod queue;
pub mod service;
pub mod template;

pub use channels::{ChannelConfig, EmailConfig, NotificationChannel, SendmailConfig, WebhookConfig};
pub use enricher::{EventEnricher, local_hostname};
pub use events::{Attachment, EnrichedEvent, OutboundMessage};
pub use filter::EventFilter;
pub use gate::{DeliveryGate, GatePermit};
pub use merger::BatchMerger;
pub use queue::BatchQueue;
pub use service::{BatchNotifier, FlushOutcome, NotificationStats, NotifierSettings};
pub use template::{Template, TemplateFields};
