//! Byte stream to line reassembly
//!
//! The sensor emits CR+LF terminated ASCII lines, but a single transport read
//! may return half a line, several lines, or a fixed-size buffer padded with
//! NUL bytes. [`LineBuffer`] carries the partial remainder between reads and
//! [`read_lines`] drives the transport until at least one line is complete.

use std::io::{self, Read};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{DriverError, LINE_DELIMITER, READ_CHUNK_SIZE};

/// Bytes received but not yet forming a complete line
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer seeded with previously received bytes
    pub fn from_remainder(remainder: impl Into<Vec<u8>>) -> Self {
        Self {
            partial: remainder.into(),
        }
    }

    /// Current remainder, decoded lossily
    pub fn remainder(&self) -> String {
        String::from_utf8_lossy(&self.partial).into_owned()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.partial.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    /// Append a raw chunk, dropping NUL padding, and return completed lines
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial
            .extend(chunk.iter().copied().filter(|&b| b != 0));
        self.take_lines()
    }

    /// Remove and return every complete line currently buffered
    pub fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_delimiter(&self.partial[start..]) {
            let line = &self.partial[start..start + pos];
            lines.push(String::from_utf8_lossy(line).into_owned());
            start += pos + LINE_DELIMITER.len();
        }
        if start > 0 {
            self.partial.drain(..start);
        }
        lines
    }

    /// Put complete lines back in front of the remainder
    ///
    /// They are returned again, in order, by the next [`take_lines`](Self::take_lines).
    pub fn unread<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut restored = Vec::new();
        for line in lines {
            restored.extend_from_slice(line.as_bytes());
            restored.extend_from_slice(LINE_DELIMITER);
        }
        if restored.is_empty() {
            return;
        }
        restored.append(&mut self.partial);
        self.partial = restored;
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(LINE_DELIMITER.len())
        .position(|w| w == LINE_DELIMITER)
}

/// Cancellation signal for blocking reads
///
/// Triggers when its token is cancelled or, if set, when its deadline passes.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// Interrupt driven by a cancellation token only
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Additionally trigger once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// The underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the reader should give up waiting
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Read from `port` until at least one complete line is available
///
/// Returns an empty list when `interrupt` fires first; buffered bytes are
/// kept in `buffer` either way. Read timeouts and zero-length reads are
/// retried, any other I/O error is fatal.
pub fn read_lines<R>(
    port: &mut R,
    buffer: &mut LineBuffer,
    interrupt: &Interrupt,
) -> Result<Vec<String>, DriverError>
where
    R: Read + ?Sized,
{
    read_lines_with(buffer, interrupt, |chunk| port.read(chunk))
}

/// [`read_lines`] with a caller-supplied chunk source
///
/// Lets the caller take and release a lock around each individual read.
pub fn read_lines_with<F>(
    buffer: &mut LineBuffer,
    interrupt: &Interrupt,
    mut read_chunk: F,
) -> Result<Vec<String>, DriverError>
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    let pending = buffer.take_lines();
    if !pending.is_empty() {
        return Ok(pending);
    }

    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        if interrupt.is_triggered() {
            return Ok(Vec::new());
        }

        let n = match read_chunk(&mut chunk) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => 0,
            Err(e) => return Err(DriverError::TransportRead(e)),
        };
        if n == 0 {
            continue;
        }

        trace!(
            fragment = %String::from_utf8_lossy(&chunk[..n]).escape_debug(),
            "received fragment"
        );

        let lines = buffer.push_chunk(&chunk[..n]);
        if !lines.is_empty() {
            return Ok(lines);
        }
    }
}
