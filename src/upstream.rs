//! Dependent outbound request used by [`Context::redirect`](crate::Context::redirect).
//!
//! Connects to the target, serializes a request head, and buffers the full
//! response. Deliberately minimal: HTTP/1.1, `content-length` or
//! read-to-EOF bodies, no TLS — the redirect target is expected to be a
//! nearby plain-HTTP service.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::headers::Headers;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 8192;

/// Options for the dependent request behind `Context::redirect`.
///
/// Defaults mirror the inbound request where they can: the method defaults
/// to the inbound method and the headers to the response headers
/// accumulated so far (`None` here means "inherit from the context").
#[derive(Clone, Debug)]
pub struct RedirectOptions {
    /// Target host. Defaults to localhost.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Method override; `None` inherits the inbound request's method.
    pub method: Option<String>,
    /// Header override; `None` sends the context's current response headers.
    pub headers: Option<Headers>,
    /// When `true`, the finalized status code is the upstream response's own
    /// rather than the caller-specified redirect status.
    pub use_target_status: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RedirectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 80,
            method: None,
            headers: None,
            use_target_status: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A buffered upstream response.
pub(crate) struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Sends one request to `options.host:options.port` and buffers the full
/// response. Every failure is an `io::Error`; the caller maps it to
/// [`Error::UpstreamRedirect`](crate::Error::UpstreamRedirect).
pub(crate) async fn fetch(
    options: &RedirectOptions,
    method: &str,
    path: &str,
    headers: &Headers,
) -> io::Result<UpstreamResponse> {
    let addr = format!("{}:{}", options.host, options.port);

    let stream = timeout(options.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;

    debug!(addr = %addr, method, path, "redirect upstream connected");

    timeout(options.request_timeout, exchange(stream, options, method, path, headers))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream request timeout"))?
}

async fn exchange(
    mut stream: TcpStream,
    options: &RedirectOptions,
    method: &str,
    path: &str,
    headers: &Headers,
) -> io::Result<UpstreamResponse> {
    let mut head = format!("{method} {path} HTTP/1.1\r\n");
    head.push_str(&format!("host: {}:{}\r\n", options.host, options.port));
    head.push_str("connection: close\r\n");
    for (name, value) in headers.iter() {
        // Host, connection and framing belong to this client, not the caller.
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("content-length: 0\r\n\r\n");

    stream.write_all(head.as_bytes()).await?;
    stream.flush().await?;

    read_response(&mut stream).await
}

/// Reads and parses a full response: head first (re-parsing as bytes
/// arrive), then a `content-length` body or everything until EOF.
async fn read_response(stream: &mut TcpStream) -> io::Result<UpstreamResponse> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let (status, content_length, consumed) = loop {
        if !buf.is_empty() {
            if let Some(parsed) = parse_head(&buf)? {
                break parsed;
            }
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upstream closed before response head",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let mut body = BytesMut::from(&buf[consumed..]);
    match content_length {
        Some(len) => {
            while body.len() < len {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "upstream closed mid-body",
                    ));
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(len);
        }
        None => loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        },
    }

    Ok(UpstreamResponse { status, body: body.freeze() })
}

fn parse_head(buf: &[u8]) -> io::Result<Option<(u16, Option<usize>, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut headers);

    match res.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => {
            let status = res.code.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "upstream response missing status")
            })?;
            let content_length = res
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                .map(|h| {
                    std::str::from_utf8(h.value)
                        .ok()
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .ok_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                "upstream sent invalid content-length",
                            )
                        })
                })
                .transpose()?;
            Ok(Some((status, content_length, consumed)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad upstream response head: {e}"),
        )),
    }
}
