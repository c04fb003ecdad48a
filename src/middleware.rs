//! Middleware contract and function adapter.
//!
//! # How middleware are stored
//!
//! The pipeline holds units of *different* types in a single `Vec`. Rust
//! collections can only hold one concrete type, so units are kept as
//! **trait objects** (`Arc<dyn Middleware>`) behind a common single-method
//! interface:
//!
//! ```text
//! struct Auth { … }  impl Middleware for Auth { … }   ← user writes this
//!        ↓ pipeline.with(Auth { … })
//! Arc::new(Auth { … })                                ← stored type-erased
//!        ↓
//! unit.main(&mut ctx).await  at request time          ← one vtable dispatch
//! ```
//!
//! Plain functions join the chain through
//! [`Pipeline::handle`](crate::Pipeline::handle), which wraps them in the lightweight
//! [`FnMiddleware`] adapter — no subclassing, just a struct holding the
//! function and forwarding the call.
//!
//! The only per-request cost is one virtual call per unit — negligible
//! compared to network I/O.

use std::future::Future;
use std::pin::Pin;

use crate::context::Context;
use crate::error::Error;

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` is required because the async runtime must be able to poll
/// the future in-place — it cannot move it in memory after the first poll.
/// The lifetime ties the future to the `&mut Context` it captures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of the request-processing chain.
///
/// One capability: [`main`](Middleware::main) receives the request's context,
/// observes and mutates response state, and either returns `Ok(())` to let
/// the walk proceed or an error to abort it. Returning *after* calling
/// [`Context::finish`]/[`Context::terminate`] is also legal — the pipeline
/// notices the finalized context and short-circuits the rest of the chain.
///
/// The contract guarantees each unit:
/// - sees the same context every other unit in the chain sees;
/// - runs only after the previous unit has fully completed;
/// - must not assume headers have been flushed when it starts.
///
/// A unit must await all of its own work before returning; spawning
/// background work against the borrowed context is impossible by
/// construction (the borrow ends when `main`'s future resolves).
///
/// # Example
///
/// ```rust
/// use weft::{BoxFuture, Context, Error, Middleware};
///
/// struct ServerHeader;
///
/// impl Middleware for ServerHeader {
///     fn main<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), Error>> {
///         Box::pin(async move {
///             ctx.set_header("server", "weft")?;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Where execution of the unit begins.
    fn main<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), Error>>;
}

/// Adapter that lets a plain async function participate in the chain.
///
/// Holds the function and forwards [`main`](Middleware::main) to it; ordering
/// and failure semantics are exactly those of a hand-written unit. Usually
/// constructed through [`Pipeline::handle`](crate::Pipeline::handle).
pub struct FnMiddleware<F>(F);

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
{
    fn main<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(ctx)
    }
}
