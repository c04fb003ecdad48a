//! Middleware pipeline and its execution protocol.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::context::Context;
use crate::error::Error;
use crate::middleware::{BoxFuture, FnMiddleware, Middleware};
use crate::request::RequestHead;
use crate::transport::Transport;

/// One accepted connection, ready to be served: the parsed request head
/// plus the transport the response will be committed to.
///
/// Produced by the listener side ([`Server`](crate::Server) in this crate,
/// or any external collaborator with its own accept loop).
pub struct Connection {
    pub(crate) head: RequestHead,
    pub(crate) transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(head: RequestHead, transport: Box<dyn Transport>) -> Self {
        Self { head, transport }
    }
}

/// An ordered chain of middleware driven over per-request contexts.
///
/// Built once at startup, then shared read-only across every in-flight
/// request. The pipeline itself carries no per-request state; each
/// [`serve`](Pipeline::serve) call owns its own walk.
///
/// ```rust,no_run
/// use weft::{BoxFuture, Context, Error, Pipeline, Server};
///
/// fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
///     Box::pin(async move { ctx.finish(Some("hi".into()), Some(200)).await })
/// }
///
/// # async fn run() -> Result<(), Error> {
/// let pipeline = Pipeline::new().handle(hello);
/// Server::bind("0.0.0.0:3000").serve(pipeline).await
/// # }
/// ```
pub struct Pipeline {
    chain: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { chain: Vec::new() }
    }

    /// Appends a middleware unit to the chain. Returns `self` so
    /// registrations chain naturally. Units execute in registration order.
    pub fn with(mut self, unit: impl Middleware) -> Self {
        self.chain.push(Arc::new(unit));
        self
    }

    /// Appends a plain function as a middleware unit.
    ///
    /// Sugar over [`with`](Pipeline::with) + [`FnMiddleware`]; ordering and
    /// failure semantics are unchanged.
    pub fn handle<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), Error>>
            + Send
            + Sync
            + 'static,
    {
        self.with(FnMiddleware::new(f))
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Drives one request through the chain and guarantees finalization.
    ///
    /// Units run strictly in registration order, each awaited to completion
    /// before the next begins. A unit that finalizes the context
    /// short-circuits the rest of the chain. A unit that errors aborts the
    /// walk; the connection is then force-finalized with a generic `500`
    /// rather than left hanging, and the error is returned to the caller.
    /// If the whole chain runs without finalizing, the pipeline calls
    /// `finish` itself — a request never goes unanswered.
    ///
    /// The walk cursor is local to this call: concurrent `serve` calls on
    /// the same pipeline progress independently and can never observe each
    /// other's position.
    pub async fn serve(&self, conn: Connection) -> Result<(), Error> {
        let mut ctx = Context::new(conn.head, conn.transport);
        debug!(method = %ctx.method(), url = %ctx.url(), units = self.chain.len(), "walk started");

        for unit in &self.chain {
            if let Err(e) = unit.main(&mut ctx).await {
                error!(method = %ctx.method(), url = %ctx.url(), error = %e, "middleware failed");
                Self::force_finalize(&mut ctx).await;
                return Err(e);
            }
            if ctx.finished() {
                break;
            }
        }

        if !ctx.finished() {
            if let Err(e) = ctx.finish(None, None).await {
                // Same guarantee as the failure path: even a broken write
                // must not leave the peer with a hanging connection.
                let _ = ctx.terminate(None).await;
                return Err(e);
            }
        }

        info!(
            method = %ctx.method(),
            url = %ctx.url(),
            status = ctx.status(),
            elapsed_ms = ctx.created_on().elapsed().as_millis() as u64,
            "request finalized"
        );
        Ok(())
    }

    /// Failure path: never leave the peer with a hanging connection.
    ///
    /// A still-open context gets a generic server-error response; a context
    /// whose head already went out is closed as-is (appending anything now
    /// would garble the body).
    async fn force_finalize(ctx: &mut Context) {
        if ctx.finished() {
            return;
        }
        // Empty body override: whatever the failed unit half-built must not
        // go out on the wire.
        if ctx.finish(Some(bytes::Bytes::new()), Some(500)).await.is_err() {
            // Head already written, or the write itself failed: close raw.
            let _ = ctx.terminate(None).await;
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
