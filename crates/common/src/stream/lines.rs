use bytes::{Bytes, BytesMut};
use futures_util::{Stream, ready, stream::BoxStream};
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// Longest line accepted before the stream is cut off.
pub const MAX_LINE_LEN: usize = 8 * 1024 * 1024;

/// Upstream body of a streamed chat completion, split into lines.
pub type UpstreamLines = LineStream<BoxStream<'static, reqwest::Result<Bytes>>>;

/// Re-frames a byte stream into newline-terminated lines.
///
/// Each item is one non-empty line of the inner stream followed by exactly one
/// `\n`. Blank lines are skipped, `\r\n` endings are normalized, and a final
/// line without a terminator is still yielded. An error from the inner stream,
/// or a line growing past the length limit, ends the sequence; the partial line
/// is discarded.
///
/// Nothing is read ahead: the inner stream is polled only when no complete
/// line is buffered, and dropping the `LineStream` drops the inner stream.
pub struct LineStream<S> {
    inner:    S,
    buf:      BytesMut,
    // bytes of `buf` already known to hold no newline
    scanned:  usize,
    max_line: usize,
    done:     bool,
}

impl<S> LineStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_max_line(inner, MAX_LINE_LEN)
    }

    pub fn with_max_line(inner: S, max_line: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scanned: 0,
            max_line,
            done: false,
        }
    }

    fn next_line(&mut self) -> Option<Bytes> {
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if let Some(line) = terminate(line) {
                return Some(line);
            }
        }
        self.scanned = self.buf.len();
        None
    }

    fn finish(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.done = true;
    }
}

fn terminate(mut line: BytesMut) -> Option<Bytes> {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    if line.is_empty() {
        return None;
    }
    line.extend_from_slice(b"\n");
    Some(line.freeze())
}

impl<S, E> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(line) = this.next_line() {
                return Poll::Ready(Some(line));
            }
            if this.done {
                this.scanned = 0;
                let rest = this.buf.split();
                return Poll::Ready(terminate(rest));
            }
            if this.buf.len() > this.max_line {
                warn!(len = this.buf.len(), "upstream line exceeds {} bytes", this.max_line);
                this.finish();
                continue;
            }
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => this.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("upstream stream interrupted: {e}");
                    this.finish();
                }
                None => {
                    debug!("upstream stream ended");
                    this.done = true;
                }
            }
        }
    }
}
