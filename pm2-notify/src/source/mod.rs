//! Event feed sources.
//!
//! The process manager bus is reached through a bridge that writes one JSON
//! packet per line. The bridge output can be piped to stdin, served on a
//! Unix socket, or spawned as a child process.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use pm2_bus::BoxedBusReader;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::{Error, Result};

/// Where bus packets are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Packets piped to standard input.
    #[default]
    Stdin,
    /// A Unix domain socket served by the bridge.
    Unix { path: PathBuf },
    /// A bridge command whose stdout is the feed.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl fmt::Display for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
            Self::Command { program, args } if args.is_empty() => write!(f, "command:{program}"),
            Self::Command { program, args } => write!(f, "command:{program} {}", args.join(" ")),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Unix { path } if path.as_os_str().is_empty() => {
                Err(Error::config("source.path must not be empty"))
            }
            Self::Command { program, .. } if program.trim().is_empty() => {
                Err(Error::config("source.program must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Open the configured feed.
pub async fn connect(config: &SourceConfig) -> Result<BoxedBusReader> {
    let reader = match config {
        SourceConfig::Stdin => BoxedBusReader::from_source(tokio::io::stdin()),
        SourceConfig::Unix { path } => connect_unix(path).await?,
        SourceConfig::Command { program, args } => spawn_bridge(program, args)?,
    };

    info!(source = %config, "Subscribed to process events");
    Ok(reader)
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<BoxedBusReader> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| Error::io_path("connecting to bus socket", path, e))?;
    Ok(BoxedBusReader::from_source(stream))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path) -> Result<BoxedBusReader> {
    Err(Error::config("unix sources are only supported on Unix platforms"))
}

/// Spawn the bridge and read its stdout.
///
/// The child is owned by a reaper task; it is killed when the runtime shuts
/// down, and its exit ends the feed.
fn spawn_bridge(program: &str, args: &[String]) -> Result<BoxedBusReader> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Subscription(format!("Failed to spawn bridge {program}: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Subscription(format!("Bridge {program} has no stdout")))?;

    let program = program.to_string();
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => info!(program = %program, "Bridge exited"),
            Ok(status) => warn!(program = %program, %status, "Bridge exited with failure"),
            Err(e) => warn!(program = %program, error = %e, "Failed to wait for bridge"),
        }
    });

    Ok(BoxedBusReader::from_source(stdout))
}
