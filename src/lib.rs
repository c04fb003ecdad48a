//! # weft
//!
//! The narrow execution core beneath an HTTP framework. Nothing more.
//! Nothing less.
//!
//! ## The contract
//!
//! Per inbound connection, weft creates one mutable [`Context`], drives an
//! ordered chain of [`Middleware`] over it, and finalizes exactly one
//! response. That is the whole job: the context lifecycle state machine and
//! the middleware execution protocol, done carefully.
//!
//! What a full framework adds — routing DSLs, templating, sessions, static
//! files, TLS — weft intentionally leaves to the layers above and below it.
//! Concrete middleware (logging, compression, auth) are yours to write; they
//! only need to satisfy the one-method [`Middleware`] contract.
//!
//! The guarantees the core does make:
//!
//! - **Registration order** — within a request, units run strictly in the
//!   order they were registered, each awaited before the next.
//! - **Exactly-once finalization** — a response is committed once; a second
//!   `finish` is an error, never a silent no-op, and an unhandled walk still
//!   ends in a response. The peer never gets a hanging connection.
//! - **Short-circuit** — a unit that finalizes early stops the walk.
//! - **Isolation** — concurrent requests share the chain read-only and can
//!   never observe each other's walk position.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use weft::{BoxFuture, Context, Error, Pipeline, Server};
//!
//! fn stamp(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
//!     Box::pin(async move {
//!         ctx.set_header("server", "weft")?;
//!         Ok(())
//!     })
//! }
//!
//! fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
//!     Box::pin(async move {
//!         ctx.finish(Some("hello".into()), Some(200)).await
//!     })
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Pipeline::new()
//!         .handle(stamp)
//!         .handle(hello);
//!
//!     Server::bind("0.0.0.0:3000").serve(pipeline).await.unwrap();
//! }
//! ```

mod context;
mod error;
mod headers;
mod middleware;
mod pipeline;
mod request;
mod server;
mod transport;
mod upstream;

pub use context::Context;
pub use error::Error;
pub use headers::Headers;
pub use middleware::{BoxFuture, FnMiddleware, Middleware};
pub use pipeline::{Connection, Pipeline};
pub use request::RequestHead;
pub use server::Server;
pub use transport::{TcpTransport, TimeoutHandle, Transport};
pub use upstream::RedirectOptions;
