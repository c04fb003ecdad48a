//! Shared test support: an in-memory transport that records everything the
//! context commits, so the state machine is exercised without sockets.

// Each integration test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use weft::{BoxFuture, Connection, Headers, RequestHead, TimeoutHandle, Transport};

/// Everything a [`MockTransport`] saw, inspectable after the walk.
#[derive(Debug, Default)]
pub struct Recorded {
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub headers: Vec<(String, String)>,
    pub content_length: Option<usize>,
    pub body: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct Recorder {
    recorded: Arc<Mutex<Recorded>>,
    closed: Arc<AtomicBool>,
}

impl Recorder {
    pub fn snapshot(&self) -> Recorded {
        let r = self.recorded.lock().unwrap();
        Recorded {
            status: r.status,
            reason: r.reason.clone(),
            headers: r.headers.clone(),
            content_length: r.content_length,
            body: r.body.clone(),
        }
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.recorded
            .lock()
            .unwrap()
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

pub struct MockTransport {
    recorder: Recorder,
}

impl MockTransport {
    pub fn new() -> (Self, Recorder) {
        let recorder = Recorder::default();
        (Self { recorder: recorder.clone() }, recorder)
    }
}

impl Transport for MockTransport {
    fn write_head<'a>(
        &'a mut self,
        status: u16,
        reason: &'a str,
        headers: &'a Headers,
        content_length: usize,
    ) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "connection is closed",
                ));
            }
            let mut r = self.recorder.recorded.lock().unwrap();
            r.status = Some(status);
            r.reason = Some(reason.to_owned());
            r.headers = headers
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            r.content_length = Some(content_length);
            Ok(())
        })
    }

    fn write_body<'a>(&'a mut self, chunk: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "connection is closed",
                ));
            }
            self.recorder.recorded.lock().unwrap().body.extend_from_slice(chunk);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
        Box::pin(async move {
            self.recorder.closed.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn arm_timeout(&mut self, after: Duration) -> TimeoutHandle {
        let closed = Arc::clone(&self.recorder.closed);
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            closed.store(true, Ordering::Release);
            let _ = tx.send(());
        });
        TimeoutHandle::new(rx)
    }

    fn is_closed(&self) -> bool {
        self.recorder.closed.load(Ordering::Acquire)
    }
}

/// A GET request head for tests.
pub fn head(method: &str, target: &str) -> RequestHead {
    RequestHead::new(method, target, Vec::new(), Vec::<u8>::new())
}

/// A ready-to-serve connection plus its recorder.
pub fn connection(method: &str, target: &str) -> (Connection, Recorder) {
    let (transport, recorder) = MockTransport::new();
    (Connection::new(head(method, target), Box::new(transport)), recorder)
}
