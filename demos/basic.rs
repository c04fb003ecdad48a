//! Minimal weft example — a three-unit chain with an early-exit guard.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/admin          # guarded, 403 short-circuit
//!   curl -i -X POST http://localhost:3000/ -d hi

use weft::{BoxFuture, Context, Error, Pipeline, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let pipeline = Pipeline::new()
        .handle(stamp)
        .handle(guard)
        .handle(respond);

    Server::bind("0.0.0.0:3000")
        .serve(pipeline)
        .await
        .expect("server error");
}

// Runs first for every request: decorate, don't finalize.
fn stamp(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
    Box::pin(async move {
        ctx.set_header("server", "weft")?;
        Ok(())
    })
}

// A finalizing unit short-circuits the chain: /admin never reaches `respond`.
fn guard(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
    Box::pin(async move {
        if ctx.url().starts_with("/admin") {
            ctx.finish(Some("forbidden\n".into()), Some(403)).await?;
        }
        Ok(())
    })
}

fn respond(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
    Box::pin(async move {
        let body = format!("{} {} -> hello from weft\n", ctx.method(), ctx.url());
        ctx.set_header("content-type", "text/plain; charset=utf-8")?;
        ctx.finish(Some(body.into()), Some(200)).await
    })
}
