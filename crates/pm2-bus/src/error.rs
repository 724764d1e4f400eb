use thiserror::Error;

/// Result type for bus decoding.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors produced while reading the bus feed.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Malformed bus packet: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Bus packet exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Whether the reader can keep going after this error.
    ///
    /// Malformed or oversized packets only affect a single line; IO errors
    /// mean the underlying feed is gone.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
