//! Unified error type.

use std::fmt;
use std::io;

/// The error type returned by weft's fallible operations.
///
/// Two of the variants are contract violations surfaced to the middleware
/// that committed them: mutating a context that is no longer open
/// ([`InvalidState`](Error::InvalidState)) and finalizing a context twice
/// ([`AlreadyFinished`](Error::AlreadyFinished)). Swallowing either would let
/// the state machine drift away from the physical connection, so they are
/// returned, never logged-and-ignored.
#[derive(Debug)]
pub enum Error {
    /// A mutation or query was attempted on a context that is not open.
    InvalidState {
        /// The operation that was refused, e.g. `"set_header"`.
        operation: &'static str,
    },
    /// `finish` or `terminate` was called on an already-finalized context.
    AlreadyFinished,
    /// A middleware unit failed; the walk for that request was aborted.
    Middleware(Box<dyn std::error::Error + Send + Sync + 'static>),
    /// The dependent request issued by [`Context::redirect`](crate::Context::redirect)
    /// failed at the transport level. The context is left open.
    UpstreamRedirect(io::Error),
    /// Transport-level failure while reading a request or committing a response.
    Io(io::Error),
}

impl Error {
    /// Wraps any error into an [`Error::Middleware`] failure.
    ///
    /// Convenience for middleware that propagate their own error types:
    ///
    /// ```rust
    /// use weft::Error;
    ///
    /// let err = Error::middleware("token validation failed");
    /// assert!(matches!(err, Error::Middleware(_)));
    /// ```
    pub fn middleware(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Middleware(err.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { operation } => {
                write!(f, "{operation}: context is no longer open")
            }
            Self::AlreadyFinished => write!(f, "response is already finished"),
            Self::Middleware(e) => write!(f, "middleware: {e}"),
            Self::UpstreamRedirect(e) => write!(f, "redirect upstream: {e}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Middleware(e) => Some(e.as_ref()),
            Self::UpstreamRedirect(e) | Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
