mod common;

use std::sync::{Arc, Mutex};

use weft::{BoxFuture, Context, Error, Middleware, Pipeline};

/// A unit that records its label into a shared log, keyed by request url so
/// concurrent walks can be told apart.
struct Record {
    label: usize,
    log: Arc<Mutex<Vec<(String, usize)>>>,
}

impl Middleware for Record {
    fn main<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            // Yield so interleaved walks actually interleave.
            tokio::task::yield_now().await;
            self.log
                .lock()
                .unwrap()
                .push((ctx.url().to_owned(), self.label));
            Ok(())
        })
    }
}

fn recording_pipeline(units: usize) -> (Pipeline, Arc<Mutex<Vec<(String, usize)>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new();
    for label in 1..=units {
        pipeline = pipeline.with(Record { label, log: Arc::clone(&log) });
    }
    (pipeline, log)
}

#[tokio::test]
async fn units_run_in_registration_order_exactly_once() {
    let (pipeline, log) = recording_pipeline(4);
    let (conn, recorder) = common::connection("GET", "/");

    pipeline.serve(conn).await.unwrap();

    let order: Vec<_> = log.lock().unwrap().iter().map(|(_, l)| *l).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    // The walk ended without an explicit finalize, so the pipeline finished
    // the response itself.
    assert!(recorder.closed());
    assert_eq!(recorder.snapshot().status, Some(200));
}

#[tokio::test]
async fn set_header_then_finish_scenario() {
    fn tag(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            ctx.set_header("X-A", "1")?;
            Ok(())
        })
    }
    fn respond(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move { ctx.finish(Some("hi".into()), Some(200)).await })
    }

    let pipeline = Pipeline::new().handle(tag).handle(respond);

    let (conn, recorder) = common::connection("GET", "/");
    pipeline.serve(conn).await.unwrap();

    let sent = recorder.snapshot();
    assert_eq!(sent.status, Some(200));
    assert_eq!(recorder.header("x-a").as_deref(), Some("1"));
    assert_eq!(sent.body, b"hi");
    assert!(recorder.closed());
}

#[tokio::test]
async fn early_finalize_short_circuits_later_units() {
    fn not_found(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move { ctx.terminate(Some(404)).await })
    }
    fn never_runs(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            ctx.set_header("x-should-not-exist", "1")?;
            Ok(())
        })
    }

    let pipeline = Pipeline::new().handle(not_found).handle(never_runs);
    let (conn, recorder) = common::connection("GET", "/missing");

    pipeline.serve(conn).await.unwrap();

    let sent = recorder.snapshot();
    assert_eq!(sent.status, Some(404));
    assert_eq!(recorder.header("x-should-not-exist"), None);
}

#[tokio::test]
async fn failing_unit_aborts_walk_and_answers_500() {
    struct Witness {
        ran: Arc<Mutex<bool>>,
    }
    impl Middleware for Witness {
        fn main<'a>(&'a self, _ctx: &'a mut Context) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async move {
                *self.ran.lock().unwrap() = true;
                Ok(())
            })
        }
    }

    fn half_build(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            ctx.set_body("half-built partial output")?;
            Ok(())
        })
    }
    fn boom(_ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move { Err(Error::middleware("boom")) })
    }

    let ran_after = Arc::new(Mutex::new(false));
    let pipeline = Pipeline::new()
        .handle(half_build)
        .handle(boom)
        .with(Witness { ran: Arc::clone(&ran_after) });

    let (conn, recorder) = common::connection("GET", "/");
    let err = pipeline.serve(conn).await.unwrap_err();

    assert!(matches!(err, Error::Middleware(_)));
    assert!(!*ran_after.lock().unwrap());
    // The peer got a clean generic failure, not the half-built body.
    let sent = recorder.snapshot();
    assert_eq!(sent.status, Some(500));
    assert!(sent.body.is_empty());
    assert!(recorder.closed());
}

#[tokio::test]
async fn concurrent_walks_are_independent() {
    let (pipeline, log) = recording_pipeline(5);
    let pipeline = Arc::new(pipeline);

    let (conn_a, rec_a) = common::connection("GET", "/a");
    let (conn_b, rec_b) = common::connection("GET", "/b");

    let pa = Arc::clone(&pipeline);
    let pb = Arc::clone(&pipeline);
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { pa.serve(conn_a).await }),
        tokio::spawn(async move { pb.serve(conn_b).await }),
    );
    ra.unwrap().unwrap();
    rb.unwrap().unwrap();

    // Both requests executed the full chain, in order, regardless of how the
    // two walks interleaved.
    let log = log.lock().unwrap();
    let seq = |url: &str| -> Vec<usize> {
        log.iter()
            .filter(|(u, _)| u == url)
            .map(|(_, l)| *l)
            .collect()
    };
    assert_eq!(seq("/a"), vec![1, 2, 3, 4, 5]);
    assert_eq!(seq("/b"), vec![1, 2, 3, 4, 5]);
    assert!(rec_a.closed());
    assert!(rec_b.closed());
}

#[tokio::test]
async fn empty_chain_still_answers() {
    let pipeline = Pipeline::new();
    assert!(pipeline.is_empty());

    let (conn, recorder) = common::connection("GET", "/");
    pipeline.serve(conn).await.unwrap();

    assert_eq!(recorder.snapshot().status, Some(200));
    assert!(recorder.closed());
}

#[tokio::test]
async fn broken_transport_on_finish_fallback_still_closes() {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use weft::{BoxFuture as Fut, Connection, Headers, TimeoutHandle, Transport};

    /// Every write fails; only `close` works. Lets the walk end without a
    /// finalize and the pipeline's own `finish` hit a dead connection.
    struct BrokenWrites {
        closed: Arc<AtomicBool>,
    }

    impl Transport for BrokenWrites {
        fn write_head<'a>(
            &'a mut self,
            _status: u16,
            _reason: &'a str,
            _headers: &'a Headers,
            _content_length: usize,
        ) -> Fut<'a, io::Result<()>> {
            Box::pin(async { Err(io::ErrorKind::BrokenPipe.into()) })
        }

        fn write_body<'a>(&'a mut self, _chunk: &'a [u8]) -> Fut<'a, io::Result<()>> {
            Box::pin(async { Err(io::ErrorKind::BrokenPipe.into()) })
        }

        fn close(&mut self) -> Fut<'_, io::Result<()>> {
            self.closed.store(true, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn arm_timeout(&mut self, _after: Duration) -> TimeoutHandle {
            let (_tx, rx) = tokio::sync::oneshot::channel();
            TimeoutHandle::new(rx)
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    let closed = Arc::new(AtomicBool::new(false));
    let conn = Connection::new(
        common::head("GET", "/"),
        Box::new(BrokenWrites { closed: Arc::clone(&closed) }),
    );

    let err = Pipeline::new().serve(conn).await.unwrap_err();

    assert!(matches!(err, Error::Io(_)));
    // The write failure surfaced, but the connection was not left hanging.
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn unit_finalizing_mid_chain_does_not_double_finish() {
    // The short-circuit must kick in immediately; the pipeline's own
    // finish fallback must notice the context is already closed.
    fn finalize(ctx: &mut Context) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move { ctx.finish(Some("done".into()), Some(200)).await })
    }

    let pipeline = Pipeline::new().handle(finalize);
    let (conn, recorder) = common::connection("GET", "/");

    pipeline.serve(conn).await.unwrap();
    assert_eq!(recorder.snapshot().body, b"done");
}
