//! Line-oriented reader over an async byte stream.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::trace;

use crate::{BusError, BusMessage, Result, decode_line};

/// Longest accepted packet. Longer lines are skipped and reported.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Reader over a type-erased byte source (stdin, socket, child stdout).
pub type BoxedBusReader = BusReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Decodes bus packets from newline-delimited JSON.
pub struct BusReader<R> {
    inner: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin> BusReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        }
    }

    /// Read the next packet.
    ///
    /// Blank lines are skipped. Returns `None` once the source reaches end of
    /// stream. A decode error only concerns the offending line; callers may
    /// keep reading after it.
    pub async fn next_message(&mut self) -> Option<Result<BusMessage>> {
        loop {
            let line = match self.inner.next().await? {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    return Some(Err(BusError::LineTooLong {
                        max: MAX_LINE_LENGTH,
                    }));
                }
                Err(LinesCodecError::Io(e)) => return Some(Err(BusError::Io(e))),
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            trace!(len = line.len(), "Decoding bus packet");
            return Some(decode_line(line));
        }
    }
}

impl BoxedBusReader {
    /// Build a reader over any owned byte source, erasing its type.
    pub fn from_source(source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let source: Box<dyn AsyncRead + Send + Unpin> = Box::new(source);
        Self::new(source)
    }
}
