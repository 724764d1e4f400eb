//! pm2-notify library crate.
//!
//! Batches process manager lifecycle events into consolidated e-mail
//! notifications. The binary wires these modules together; they are exposed
//! here for integration testing.

pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod source;
pub mod utils;

pub use error::{Error, Result};
