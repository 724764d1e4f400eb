//! Process manager event bus messages.
//!
//! The process manager publishes lifecycle events (start, stop, crash,
//! restart...) on its bus. A bridge forwards every packet as one JSON
//! object per line:
//!
//! ```text
//! {"topic":"process:event","data":{"event":"restart","at":1700000000000,"manually":false,"process":{"name":"api","pm_id":0}}}
//! {"topic":"pm2:kill","data":{"msg":"pm2 has been killed"}}
//! ```
//!
//! This crate owns the typed model of those packets ([`BusMessage`],
//! [`RawEvent`], [`ProcessInfo`]) and an async line reader ([`BusReader`])
//! that turns any `AsyncRead` into a sequence of decoded messages.
//!
//! # Example
//!
//! ```no_run
//! use pm2_bus::{BusMessage, BusReader};
//!
//! # async fn run() {
//! let mut reader = BusReader::new(tokio::io::stdin());
//! while let Some(message) = reader.next_message().await {
//!     match message {
//!         Ok(BusMessage::ProcessEvent(event)) => println!("{} {}", event.process.name, event.kind),
//!         Ok(_) => {}
//!         Err(e) => eprintln!("bad packet: {e}"),
//!     }
//! }
//! # }
//! ```

mod error;
mod message;
mod reader;

pub use error::{BusError, Result};
pub use message::{BusMessage, KILL_TOPIC, PROCESS_EVENT_TOPIC, ProcessInfo, RawEvent, decode_line};
pub use reader::{BoxedBusReader, BusReader, MAX_LINE_LENGTH};
