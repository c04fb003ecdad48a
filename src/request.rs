//! Incoming request head.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Hard cap on the request head; anything larger is rejected before parsing
/// completes.
const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Hard cap on the declared request body. The declared length is
/// peer-controlled and backs an allocation, so it is checked before any
/// body byte is buffered.
const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 4096;

/// An incoming HTTP request, parsed from the raw stream.
///
/// The listener side of the crate produces these; middleware reach them
/// through [`Context::request`](crate::Context::request). Method and target
/// are never mutated after construction.
#[derive(Debug)]
pub struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl RequestHead {
    /// Builds a head directly. Listener collaborators that do their own
    /// parsing use this to enter the pipeline.
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers,
            body: body.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Case-insensitive request header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Reads one request (head + content-length body) off `stream`.
    ///
    /// Loops reading into a buffer and re-parsing until the head is complete,
    /// then drains the declared body. `Ok(None)` means the peer closed before
    /// sending anything. Malformed or oversized input is an
    /// `InvalidData`-kind error — the caller answers `400` and closes.
    pub async fn read_from<R>(stream: &mut R) -> io::Result<Option<Self>>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        let (head, consumed) = loop {
            if !buf.is_empty() {
                match Self::parse(&buf)? {
                    Some(parsed) => break parsed,
                    None => {
                        if buf.len() > MAX_HEAD_BYTES {
                            return Err(malformed("request head too large"));
                        }
                    }
                }
            }

            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(malformed("connection closed mid-request"));
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let content_length = head
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .map(|(_, v)| v.trim().parse::<usize>())
            .transpose()
            .map_err(|_| malformed("invalid content-length"))?
            .unwrap_or(0);
        if content_length > MAX_BODY_BYTES {
            return Err(malformed("request body too large"));
        }

        let mut body = buf.split_off(consumed);
        while body.len() < content_length {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(malformed("connection closed mid-body"));
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(content_length);

        Ok(Some(Self {
            method: head.method,
            target: head.target,
            headers: head.headers,
            body: Bytes::from(body),
        }))
    }

    /// One parse attempt over the buffered bytes. `Ok(None)` means the head
    /// is not complete yet.
    fn parse(buf: &[u8]) -> io::Result<Option<(ParsedHead, usize)>> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buf) {
            Ok(httparse::Status::Complete(consumed)) => {
                let method = req
                    .method
                    .ok_or_else(|| malformed("missing method"))?
                    .to_owned();
                let target = req
                    .path
                    .ok_or_else(|| malformed("missing request target"))?
                    .to_owned();
                let headers = req
                    .headers
                    .iter()
                    .map(|h| -> io::Result<(String, String)> {
                        let value = std::str::from_utf8(h.value)
                            .map_err(|_| malformed("non-utf8 header value"))?;
                        Ok((h.name.to_owned(), value.to_owned()))
                    })
                    .collect::<io::Result<Vec<_>>>()?;

                Ok(Some((ParsedHead { method, target, headers }, consumed)))
            }
            Ok(httparse::Status::Partial) => Ok(None),
            Err(e) => Err(malformed(&format!("bad request head: {e}"))),
        }
    }
}

struct ParsedHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

fn malformed(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_owned())
}
