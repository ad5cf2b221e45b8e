//! Newline-delimited JSON framing.
//!
//! Both the MCP stdio channel and the TCP bridge exchange one UTF-8 JSON
//! message per line:
//!
//! - Messages are delimited by `\n` (a trailing `\r` is tolerated)
//! - Messages must not contain embedded newlines
//! - Blank lines are left to the caller to skip
//! - Lines that are not UTF-8 or exceed [`MAX_LINE_BYTES`] are reported as
//!   `InvalidData` without ending the stream

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest line accepted before it is discarded.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Reads newline-delimited messages.
///
/// A partially read line survives cancellation, so `read_line` may be used
/// as a `select!` branch.
pub struct LineReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    oversized: bool,
    max_line: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wraps a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            line: Vec::new(),
            oversized: false,
            max_line: MAX_LINE_BYTES,
        }
    }

    /// Replaces the [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// Reads the next line without its terminator.
    ///
    /// Returns `None` once the stream is closed (EOF).
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidData`] for a line that is not UTF-8 or
    /// exceeds the length limit. The line is consumed, so the caller may log
    /// it and keep reading. Any other error comes from the stream itself.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.line.is_empty() && !self.oversized {
                    return Ok(None);
                }
                break;
            }

            let (used, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            if !self.oversized {
                if self.line.len() + used > self.max_line + 1 {
                    self.oversized = true;
                    self.line = Vec::new();
                } else {
                    self.line.extend_from_slice(&available[..used]);
                }
            }
            self.reader.consume(used);

            if complete {
                break;
            }
        }

        if std::mem::take(&mut self.oversized) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line longer than {} bytes discarded", self.max_line),
            ));
        }

        let mut line = std::mem::take(&mut self.line);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }

        String::from_utf8(line)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Writes newline-delimited messages, flushing after each one.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wraps a byte sink.
    pub const fn new(inner: W) -> Self {
        Self { writer: inner }
    }

    /// Writes one message followed by `\n`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub async fn write_line(&mut self, message: &str) -> io::Result<()> {
        debug_assert!(
            !message.contains('\n'),
            "framed message must not contain embedded newlines"
        );

        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Serialises a value to compact JSON and writes it as one line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_json<T: Serialize + ?Sized>(&mut self, value: &T) -> io::Result<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_line(&json).await
    }
}
