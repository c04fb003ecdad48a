//! Transport collaborator seam.
//!
//! The context owns response *state*; committing that state to the wire is
//! delegated to a [`Transport`]. Keeping the two apart is what makes the
//! state machine testable without a live connection — integration tests
//! implement `Transport` over an in-memory buffer.
//!
//! [`TcpTransport`] is the production implementation: raw HTTP/1.1 emission
//! over a `tokio::net::TcpStream`, closed after exactly one response.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};

use crate::headers::Headers;
use crate::middleware::BoxFuture;

/// What the pipeline needs from the underlying connection: write the status
/// line + headers, write body bytes, close, arm a deadline, and observe
/// whether the connection is already gone.
///
/// Implementations must make `close` and deadline expiry monotonic:
/// once [`is_closed`](Transport::is_closed) reports `true` it never reverts,
/// and every later write fails.
pub trait Transport: Send + 'static {
    /// Writes the status line, a `content-length` header for `content_length`,
    /// and every entry of `headers` as its own line, in iteration order.
    fn write_head<'a>(
        &'a mut self,
        status: u16,
        reason: &'a str,
        headers: &'a Headers,
        content_length: usize,
    ) -> BoxFuture<'a, io::Result<()>>;

    /// Writes a chunk of body bytes.
    fn write_body<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Flushes and closes the connection.
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>>;

    /// Arms a deadline. On expiry the transport force-closes the connection
    /// and the returned handle resolves. Arming twice re-arms independently;
    /// the earliest expiry wins.
    fn arm_timeout(&mut self, after: Duration) -> TimeoutHandle;

    /// Whether the connection has been closed, by [`close`](Transport::close)
    /// or by deadline expiry.
    fn is_closed(&self) -> bool;
}

/// Asynchronous completion notification for [`Transport::arm_timeout`].
///
/// Resolves when the armed deadline expires. If the response is finalized
/// first, the deadline still expires later and the handle still resolves —
/// by then the closure it forces is a no-op.
pub struct TimeoutHandle {
    rx: oneshot::Receiver<()>,
}

impl TimeoutHandle {
    /// Wraps the notification channel a transport implementation signals
    /// from its deadline task.
    pub fn new(rx: oneshot::Receiver<()>) -> Self {
        Self { rx }
    }
}

impl Future for TimeoutHandle {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        // A dropped sender (runtime teardown) resolves the handle too; there
        // is nothing left to wait for in that case.
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|_| ())
    }
}

// ── TcpTransport ──────────────────────────────────────────────────────────────

/// HTTP/1.1 transport over a TCP stream.
///
/// The stream lives behind `Arc<Mutex<Option<…>>>` so a deadline task can
/// seize and close it while a middleware walk is still running. Whoever
/// `take`s the stream first — `close` or the deadline — wins; the loser
/// observes a closed transport.
pub struct TcpTransport {
    stream: Arc<Mutex<Option<TcpStream>>>,
    closed: Arc<AtomicBool>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(Some(stream))),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn gone() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "connection is closed")
    }
}

impl Transport for TcpTransport {
    fn write_head<'a>(
        &'a mut self,
        status: u16,
        reason: &'a str,
        headers: &'a Headers,
        content_length: usize,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.stream.lock().await;
            let stream = guard.as_mut().ok_or_else(Self::gone)?;

            let mut head = format!("HTTP/1.1 {status} {reason}\r\n");
            head.push_str(&format!("content-length: {content_length}\r\n"));
            for (name, value) in headers.iter() {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            stream.write_all(head.as_bytes()).await
        })
    }

    fn write_body<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.stream.lock().await;
            let stream = guard.as_mut().ok_or_else(Self::gone)?;
            stream.write_all(chunk).await
        })
    }

    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.stream.lock().await;
            let stream = guard.take();
            // Closed is observable the moment the stream is seized, even if
            // the flush below fails.
            self.closed.store(true, Ordering::Release);
            if let Some(mut stream) = stream {
                stream.flush().await?;
                stream.shutdown().await?;
            }
            Ok(())
        })
    }

    fn arm_timeout(&mut self, after: Duration) -> TimeoutHandle {
        let stream = Arc::clone(&self.stream);
        let closed = Arc::clone(&self.closed);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let mut guard = stream.lock().await;
            if let Some(mut stream) = guard.take() {
                let _ = stream.shutdown().await;
            }
            closed.store(true, Ordering::Release);
            drop(guard);
            let _ = tx.send(());
        });

        TimeoutHandle::new(rx)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ── Status reason phrases ─────────────────────────────────────────────────────

/// Canonical reason phrase for a status code, used when the context carries
/// no explicit status message.
pub(crate) fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Content",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}
