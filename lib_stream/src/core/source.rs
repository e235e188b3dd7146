//! # Line Source
//!
//! The collaborator boundary to the network. A `LineTransport` opens one
//! connection per call and pushes `LineEvent`s into the supplied channel: an
//! optional `Connected`, any number of `Line`s, then exactly one of `Completed`
//! or `Failed`. Cancelling the returned handle aborts the connection; a second
//! cancel is a no-op.
//!
//! `LineFramer` is the only transformation applied to the body: it splits raw
//! bytes on `\n` and strips a trailing `\r`. Empty lines are skipped; a line
//! that is not UTF-8 ends the source with a read failure.

use bytes::{Buf, BytesMut};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::request::StreamRequest;

/// Events emitted by an open line source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Response headers arrived with a success status.
    Connected,
    Line(String),
    Completed,
    Failed(TransportError),
}

/// Sending half handed to a transport.
pub type LineSink = mpsc::Sender<LineEvent>;

/// # Line Source Handle
///
/// Owns the cancellation of one open connection.
#[derive(Debug, Clone)]
pub struct LineSourceHandle {
    token: CancellationToken,
}

impl LineSourceHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Aborts the connection. Idempotent.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token the transport task should watch.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Opens line sources. Implementations must not block: spawn the I/O and return.
pub trait LineTransport: Send + Sync + 'static {
    fn open(&self, request: &StreamRequest, sink: LineSink) -> LineSourceHandle;
}

/// # Line Framer
///
/// Incremental splitter. Bytes are buffered until a newline arrives, so a UTF-8
/// sequence split across two chunks is reassembled before conversion. A line
/// that is not valid UTF-8 is reported as a `TransportError::Read`.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: BytesMut,
    /// Bytes of `pending` already known to hold no newline.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every complete, non-empty line in it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, TransportError>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let raw = self.pending.split_to(self.scanned + offset);
            self.pending.advance(1);
            self.scanned = 0;
            if let Some(line) = Self::finish(&raw) {
                lines.push(line);
            }
        }
        self.scanned = self.pending.len();
        lines
    }

    /// End of body: returns the trailing unterminated line, if any.
    pub fn flush(&mut self) -> Option<Result<String, TransportError>> {
        let raw = self.pending.split();
        self.scanned = 0;
        Self::finish(&raw)
    }

    fn finish(raw: &[u8]) -> Option<Result<String, TransportError>> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return None;
        }
        Some(
            std::str::from_utf8(raw)
                .map(str::to_owned)
                .map_err(|e| TransportError::Read(format!("line is not valid UTF-8: {}", e))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_lines(lines: Vec<Result<String, TransportError>>) -> Vec<String> {
        lines.into_iter().map(|line| line.unwrap()).collect()
    }

    #[test]
    fn splits_and_strips_carriage_returns() {
        let mut framer = LineFramer::new();
        let lines = ok_lines(framer.push(b"data:a\r\ndata:b\n\ndata:c"));
        assert_eq!(lines, vec!["data:a".to_string(), "data:b".to_string()]);
        assert_eq!(framer.flush(), Some(Ok("data:c".to_string())));
        assert_eq!(framer.flush(), None);
    }

    #[test]
    fn reassembles_lines_across_chunks() {
        let mut framer = LineFramer::new();
        let text = "data:{\"id\":\"café\"}\n".as_bytes();
        // Split inside the two-byte 'é'.
        let cut = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        assert!(framer.push(&text[..cut]).is_empty());
        assert_eq!(ok_lines(framer.push(&text[cut..])), vec!["data:{\"id\":\"café\"}".to_string()]);
    }

    #[test]
    fn long_line_over_many_chunks() {
        let mut framer = LineFramer::new();
        let line = format!("data:{}", "x".repeat(4096));
        for chunk in line.as_bytes().chunks(7) {
            assert!(framer.push(chunk).is_empty());
        }
        assert_eq!(ok_lines(framer.push(b"\ndata:y\n")), vec![line, "data:y".to_string()]);
        assert_eq!(framer.flush(), None);
    }

    #[test]
    fn invalid_utf8_is_a_read_error_not_a_rewrite() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"data:ok\ndata:\xff\xfe\ndata:after\n");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Ok("data:ok".to_string()));
        assert!(matches!(&lines[1], Err(TransportError::Read(msg)) if msg.contains("UTF-8")));
        assert_eq!(lines[2], Ok("data:after".to_string()));

        framer.push(b"data:\xc3");
        assert!(matches!(framer.flush(), Some(Err(TransportError::Read(_)))));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"\n\r\n\n").is_empty());
    }

    #[test]
    fn handle_cancel_is_idempotent() {
        let handle = LineSourceHandle::new(CancellationToken::new());
        let watcher = handle.token();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(watcher.is_cancelled());
    }
}
