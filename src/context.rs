//! Per-request response context and its lifecycle state machine.
//!
//! A [`Context`] wraps one request/response pair. Middleware mutate it —
//! status, headers, body — while it is open; nothing touches the wire until
//! [`finish`](Context::finish) or [`terminate`](Context::terminate) commits
//! the accumulated state to the transport, exactly once.
//!
//! ```text
//!   set_header / set_body / set_status while Open only
//!
//!   ┌────────┐   head emitted   ┌─────────┐   body + close   ┌────────┐
//!   │  Open  │ ───────────────► │ Written │ ───────────────► │ Closed │
//!   └────────┘                  └─────────┘                  └────────┘
//!       │                                                        ▲
//!       └────────────────────────────────────────────────────────┘
//!              terminate / empty-body finish / timeout expiry
//! ```
//!
//! `Closed` is terminal and monotonic. Every mutation attempted past it
//! fails with an error; it never silently succeeds, because a context that
//! believes it is open while the socket is gone would desynchronize the
//! state machine from the physical connection.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::Error;
use crate::headers::Headers;
use crate::request::RequestHead;
use crate::transport::{TimeoutHandle, Transport, reason_phrase};
use crate::upstream::{self, RedirectOptions};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Open,
    Written,
    Closed,
}

/// The per-request mutable record of response state and finalization status.
///
/// Created by the pipeline when a connection arrives, borrowed by each
/// middleware in turn, dropped when the walk for that request completes.
pub struct Context {
    created_on: Instant,
    request: RequestHead,
    state: State,
    status: u16,
    status_message: Option<String>,
    headers: Headers,
    body: Option<Bytes>,
    transport: Box<dyn Transport>,
}

impl Context {
    pub fn new(request: RequestHead, transport: Box<dyn Transport>) -> Self {
        Self {
            created_on: Instant::now(),
            request,
            state: State::Open,
            status: 200,
            status_message: None,
            headers: Headers::new(),
            body: None,
            transport,
        }
    }

    // ── Read-only projections ─────────────────────────────────────────────────

    /// When this context was constructed. Diagnostics only.
    pub fn created_on(&self) -> Instant {
        self.created_on
    }

    /// Inbound request method, e.g. `"GET"`.
    pub fn method(&self) -> &str {
        self.request.method()
    }

    /// Inbound request target, e.g. `"/users/42?full=1"`.
    pub fn url(&self) -> &str {
        self.request.target()
    }

    /// The full inbound request head.
    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether the response has been flushed and the connection closed — by
    /// `finish`, `terminate`, or a timeout force-close. Monotonic.
    pub fn finished(&self) -> bool {
        self.state == State::Closed || self.transport.is_closed()
    }

    // ── Response state mutation (Open only) ───────────────────────────────────

    /// Sets the response status code.
    pub fn set_status(&mut self, status: u16) -> Result<(), Error> {
        self.open("set_status")?;
        self.status = status;
        Ok(())
    }

    /// Overrides the status line's reason phrase.
    pub fn set_status_message(&mut self, message: impl Into<String>) -> Result<(), Error> {
        self.open("set_status_message")?;
        self.status_message = Some(message.into());
        Ok(())
    }

    /// Sets the response body. Last writer wins.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> Result<(), Error> {
        self.open("set_body")?;
        self.body = Some(body.into());
        Ok(())
    }

    /// Sets a response header, replacing any existing values for the name.
    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), Error> {
        self.open("set_header")?;
        self.headers.set(name, value);
        Ok(())
    }

    /// Adds another value for a response header name.
    pub fn append_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), Error> {
        self.open("append_header")?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Removes a response header. Returns whether it existed.
    pub fn remove_header(&mut self, name: &str) -> Result<bool, Error> {
        self.open("remove_header")?;
        Ok(self.headers.remove(name))
    }

    pub fn has_header(&self, name: &str) -> Result<bool, Error> {
        self.open("has_header")?;
        Ok(self.headers.contains(name))
    }

    pub fn get_header(&self, name: &str) -> Result<Option<&str>, Error> {
        self.open("get_header")?;
        Ok(self.headers.get(name))
    }

    /// The response headers as they stand. What `finish` emits is exactly
    /// this mapping at the moment of the call.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    // ── Finalization ──────────────────────────────────────────────────────────

    /// Commits the response and closes the connection.
    ///
    /// Applies the optional body/status overrides, writes the status line and
    /// headers, writes the body if non-empty, then closes the transport.
    /// Legal exactly once: a second call fails with
    /// [`Error::AlreadyFinished`] and does not alter the already-sent
    /// response.
    pub async fn finish(&mut self, body: Option<Bytes>, status: Option<u16>) -> Result<(), Error> {
        if self.finished() || self.state != State::Open {
            return Err(Error::AlreadyFinished);
        }

        if let Some(body) = body {
            self.body = Some(body);
        }
        if let Some(status) = status {
            self.status = status;
        }

        self.state = State::Written;
        let content_length = self.body.as_ref().map(Bytes::len).unwrap_or(0);
        self.write_head(content_length).await?;
        if let Some(body) = self.body.clone() {
            if !body.is_empty() {
                self.transport.write_body(&body).await?;
            }
        }

        self.state = State::Closed;
        self.transport.close().await?;
        Ok(())
    }

    /// Closes the response without emitting a body.
    ///
    /// From `Open` this still writes the status line and headers (HEAD-style
    /// empty finalize); once the head has been written it only closes. Fails
    /// with [`Error::AlreadyFinished`] on an already-closed context.
    pub async fn terminate(&mut self, status: Option<u16>) -> Result<(), Error> {
        if self.finished() {
            return Err(Error::AlreadyFinished);
        }

        if let Some(status) = status {
            self.status = status;
        }

        if self.state == State::Open {
            self.state = State::Written;
            // No body follows, whatever `set_body` may have stored.
            self.write_head(0).await?;
        }

        self.state = State::Closed;
        self.transport.close().await?;
        Ok(())
    }

    /// Arms a deadline on the underlying connection.
    ///
    /// On expiry the transport forces the connection closed wherever the
    /// middleware walk currently is; later mutations fail cleanly. The
    /// returned handle resolves when the deadline fires. If `finish` or
    /// `terminate` reaches `Closed` first, the forced closure is a no-op —
    /// whichever side gets there first wins.
    pub fn set_timeout(&mut self, after: Duration) -> Result<TimeoutHandle, Error> {
        self.open("set_timeout")?;
        Ok(self.transport.arm_timeout(after))
    }

    /// Finishes the response with the body of a dependent request to `path`.
    ///
    /// Issues an outbound HTTP request (per `options`), buffers the full
    /// upstream body, then calls [`finish`](Context::finish) with that body.
    /// The sent status is `status` unless
    /// [`use_target_status`](RedirectOptions::use_target_status) adopts the
    /// upstream's own. A non-2xx upstream response is not a failure.
    ///
    /// If the outbound request fails at the transport level, the context is
    /// left `Open` so the caller can recover or finalize with an error
    /// status explicitly.
    pub async fn redirect(
        &mut self,
        path: &str,
        status: u16,
        options: RedirectOptions,
    ) -> Result<(), Error> {
        if self.finished() || self.state != State::Open {
            return Err(Error::AlreadyFinished);
        }

        let method = options
            .method
            .clone()
            .unwrap_or_else(|| self.request.method().to_owned());
        let headers = options
            .headers
            .clone()
            .unwrap_or_else(|| self.headers.clone());

        let upstream = upstream::fetch(&options, &method, path, &headers)
            .await
            .map_err(Error::UpstreamRedirect)?;

        let status = if options.use_target_status {
            upstream.status
        } else {
            status
        };
        self.finish(Some(upstream.body), Some(status)).await
    }

    /// [`redirect`](Context::redirect) with the conventional `301` status.
    pub async fn redirect_default(
        &mut self,
        path: &str,
        options: RedirectOptions,
    ) -> Result<(), Error> {
        self.redirect(path, 301, options).await
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn open(&self, operation: &'static str) -> Result<(), Error> {
        if self.state == State::Open && !self.transport.is_closed() {
            Ok(())
        } else {
            Err(Error::InvalidState { operation })
        }
    }

    async fn write_head(&mut self, content_length: usize) -> Result<(), Error> {
        let reason = match &self.status_message {
            Some(message) => message.clone(),
            None => reason_phrase(self.status).to_owned(),
        };
        self.transport
            .write_head(self.status, &reason, &self.headers, content_length)
            .await?;
        Ok(())
    }
}
