//! End-to-end traversals through the public API.
//!
//! Covers:
//! - each page fetched at most once regardless of how often it is requested
//! - boundary discovery from a short page, with later fetches cancelled
//! - every item delivered exactly once at its canonical index
//! - failures isolated to their page and reported together
//! - lifecycle hooks and caller-side page requests

#![allow(missing_docs)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use depaginate::{
    depaginate, CancellationToken, DepaginateOptions, EngineConfig, FetchError, HandlerFn, Hint,
    HookFn, PageMeta, PageRequest, PageSource, PageSourceFn, PageState,
};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("depaginate=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Pages over `len` numbered items, requesting every page up to
/// `page_ahead` from each fetch.
struct Numbered {
    len: usize,
    per_page: usize,
    page_ahead: usize,
    fail_page: Option<usize>,
    calls: Mutex<HashMap<usize, usize>>,
}

impl Numbered {
    fn new(len: usize, per_page: usize, page_ahead: usize) -> Self {
        Self {
            len,
            per_page,
            page_ahead,
            fail_page: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn slice(&self, page: usize) -> Vec<usize> {
        let start = (page * self.per_page).min(self.len);
        let end = (start + self.per_page).min(self.len);
        (start..end).collect()
    }
}

impl PageSource<usize, String> for Numbered {
    fn get_page(
        &self,
        _ctx: CancellationToken,
        state: PageState<usize, String>,
        req: PageRequest<String>,
    ) -> impl Future<Output = Result<Vec<usize>, FetchError>> + Send {
        async move {
            *self.calls.lock().entry(req.index).or_default() += 1;
            state.update([Hint::PerPage(self.per_page)]).await;
            for page in req.index + 1..=self.page_ahead.max(1) {
                state.request(page, format!("cursor-{page}")).await;
            }
            if self.fail_page == Some(req.index) {
                return Err(FetchError::failed(format!("no page {}", req.index)));
            }
            Ok(self.slice(req.index))
        }
    }
}

type Seen = Arc<Mutex<Vec<(usize, usize)>>>;

fn collector() -> (Seen, HandlerFn<impl Fn(&CancellationToken, usize, usize) + Send + Sync + 'static>) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = HandlerFn(move |_: &CancellationToken, idx: usize, item: usize| {
        sink.lock().push((idx, item));
    });
    (seen, handler)
}

fn sorted(seen: &Seen) -> Vec<(usize, usize)> {
    let mut items = seen.lock().clone();
    items.sort_unstable();
    items
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_item_delivered_once_in_place() {
    init_tracing();
    let source = Arc::new(Numbered::new(11, 3, 5));
    let (seen, handler) = collector();
    let pager = depaginate(
        CancellationToken::new(),
        Arc::clone(&source),
        handler,
        DepaginateOptions::<String>::new(),
    )
    .unwrap();

    let meta = pager.wait().await.unwrap();
    assert_eq!(meta, PageMeta::new(11, 4, 3));
    assert_eq!(sorted(&seen), (0..11).map(|i| (i, i)).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_requests_fetch_once() {
    init_tracing();
    let source = Arc::new(Numbered::new(40, 4, 12));
    let (_seen, handler) = collector();
    let pager = depaginate(
        CancellationToken::new(),
        Arc::clone(&source),
        handler,
        DepaginateOptions::<String>::new(),
    )
    .unwrap();
    let report = pager.finish().await;
    assert!(report.failures.is_empty());

    let calls = source.calls.lock();
    assert!(calls.values().all(|&n| n == 1), "duplicate fetch: {calls:?}");
    // Fetches past the end may be cancelled before the source runs.
    assert!(calls.len() <= report.pages_requested);
    assert!((0..=10).all(|page| calls.contains_key(&page)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_page_cancels_speculative_fetches() {
    init_tracing();
    let completed_beyond = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&completed_beyond);
    let source = PageSourceFn(move |ctx: CancellationToken, state: PageState<usize, ()>, req: PageRequest<()>| {
        let flag = Arc::clone(&flag);
        async move {
            state.update([Hint::PerPage(3)]).await;
            if req.index == 0 {
                for page in 1..=4 {
                    state.request(page, ()).await;
                }
            }
            if req.index >= 4 {
                return tokio::select! {
                    _ = ctx.cancelled() => Err(FetchError::Canceled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        flag.fetch_add(1, Ordering::SeqCst);
                        Ok(Vec::new())
                    }
                };
            }
            let start = req.index * 3;
            let items: Vec<usize> = (start..(start + 3).min(11)).collect();
            Ok(items)
        }
    });
    let (seen, handler) = collector();
    let started = Instant::now();
    let pager = depaginate(
        CancellationToken::new(),
        source,
        handler,
        DepaginateOptions::<()>::new(),
    )
    .unwrap();

    let report = pager.finish().await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(completed_beyond.load(Ordering::SeqCst), 0);
    assert!(report.failures.is_empty(), "cancellation must not be reported");
    assert_eq!(report.meta, PageMeta::new(11, 4, 3));
    assert_eq!(report.cancelers_left, 0);
    assert_eq!(sorted(&seen).len(), 11);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_page_is_isolated() {
    init_tracing();
    let mut source = Numbered::new(11, 3, 5);
    source.fail_page = Some(2);
    let (seen, handler) = collector();
    let pager = depaginate(
        CancellationToken::new(),
        source,
        handler,
        DepaginateOptions::<String>::new().request("cursor-0".to_string()),
    )
    .unwrap();

    let err = pager.wait().await.unwrap_err();
    assert_eq!(err.failed_pages(), vec![2]);
    let failure = &err.failures()[0];
    assert_eq!(failure.request.payload, "cursor-2");
    assert_eq!(failure.error.to_string(), "no page 2");
    assert!(err.to_string().contains("page 2: no page 2"));

    let delivered: Vec<usize> = sorted(&seen).into_iter().map(|(idx, _)| idx).collect();
    assert_eq!(delivered, vec![0, 1, 2, 3, 4, 5, 9, 10]);
}

#[tokio::test]
async fn first_request_carries_configured_payload() {
    init_tracing();
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&payloads);
    let source = PageSourceFn(move |_: CancellationToken, _: PageState<u8, &'static str>, req: PageRequest<&'static str>| {
        sink.lock().push(req.payload);
        async { Ok::<_, FetchError>(Vec::new()) }
    });
    let pager = depaginate(
        CancellationToken::new(),
        source,
        HandlerFn(|_: &CancellationToken, _: usize, _: u8| {}),
        DepaginateOptions::<&'static str>::new().request("start-here"),
    )
    .unwrap();
    pager.wait().await.unwrap();
    assert_eq!(*payloads.lock(), vec!["start-here"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hooks_bracket_the_traversal() {
    init_tracing();
    let events = Arc::new(Mutex::new(Vec::new()));
    let handled = Arc::new(AtomicUsize::new(0));

    let (start_log, update_log, done_log) = (Arc::clone(&events), Arc::clone(&events), Arc::clone(&events));
    let handled_at_done = Arc::clone(&handled);
    let counter = Arc::clone(&handled);
    let pager = depaginate(
        CancellationToken::new(),
        Numbered::new(7, 2, 4),
        HandlerFn(move |_: &CancellationToken, _: usize, _: usize| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        DepaginateOptions::<String>::new()
            .total_items(7)
            .with_starter(HookFn(move |meta: &PageMeta| start_log.lock().push(("start", *meta))))
            .with_updater(HookFn(move |meta: &PageMeta| update_log.lock().push(("update", *meta))))
            .with_doner(HookFn(move |meta: &PageMeta| {
                assert_eq!(handled_at_done.load(Ordering::SeqCst), 7);
                done_log.lock().push(("done", *meta));
            })),
    )
    .unwrap();
    let meta = pager.wait().await.unwrap();
    assert_eq!(meta, PageMeta::new(7, 4, 2));

    let events = events.lock();
    assert_eq!(events.first(), Some(&("start", PageMeta::new(7, 0, 0))));
    assert_eq!(events.last(), Some(&("done", meta)));
    assert_eq!(events.iter().filter(|(kind, _)| *kind == "start").count(), 1);
    assert_eq!(events.iter().filter(|(kind, _)| *kind == "done").count(), 1);
    assert!(events.iter().any(|e| *e == ("update", PageMeta::new(7, 0, 2))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_can_request_pages() {
    init_tracing();
    let gate = Arc::new(Notify::new());
    let wait_gate = Arc::clone(&gate);
    let source = PageSourceFn(move |_: CancellationToken, _: PageState<usize, usize>, req: PageRequest<usize>| {
        let gate = Arc::clone(&wait_gate);
        async move {
            if req.index == 0 {
                gate.notified().await;
            }
            Ok::<_, FetchError>(vec![req.payload; 2])
        }
    });
    let (seen, handler) = collector();
    let pager = depaginate(
        CancellationToken::new(),
        source,
        handler,
        DepaginateOptions::<usize>::new().per_page(2).request(100),
    )
    .unwrap();

    let state = pager.state();
    state.request(1, 101).await;
    state.request(2, 102).await;
    state.request(1, 999).await;
    gate.notify_one();

    let report = pager.finish().await;
    assert_eq!(report.pages_requested, 3);
    assert_eq!(
        sorted(&seen),
        vec![(0, 100), (1, 100), (2, 101), (3, 101), (4, 102), (5, 102)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn root_cancellation_ends_traversal_quietly() {
    init_tracing();
    let root = CancellationToken::new();
    let source = PageSourceFn(|ctx: CancellationToken, state: PageState<usize, ()>, req: PageRequest<()>| async move {
        if req.index == 0 {
            for page in 1..4 {
                state.request(page, ()).await;
            }
            return Ok::<Vec<usize>, FetchError>(vec![0, 1]);
        }
        ctx.cancelled().await;
        Err(FetchError::Canceled)
    });
    let (seen, handler) = collector();
    let pager = depaginate(
        root.clone(),
        source,
        handler,
        DepaginateOptions::<()>::new().per_page(2),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    root.cancel();
    let report = pager.finish().await;
    assert!(report.failures.is_empty());
    assert_eq!(report.cancelers_left, 0);
    assert!(report.queue_closed);
    assert_eq!(sorted(&seen), vec![(0, 0), (1, 1)]);
}

#[tokio::test]
async fn deadlines_are_not_failures() {
    init_tracing();
    let source = PageSourceFn(|_: CancellationToken, state: PageState<u8, ()>, req: PageRequest<()>| async move {
        if req.index == 0 {
            state.request(1, ()).await;
            return Ok::<Vec<u8>, FetchError>(vec![1, 2]);
        }
        tokio::time::timeout(Duration::from_millis(10), std::future::pending::<()>()).await?;
        Ok(Vec::new())
    });
    let pager = depaginate(
        CancellationToken::new(),
        source,
        HandlerFn(|_: &CancellationToken, _: usize, _: u8| {}),
        DepaginateOptions::<()>::new().per_page(2),
    )
    .unwrap();
    let report = pager.finish().await;
    assert!(report.failures.is_empty());
    assert_eq!(report.pages_requested, 2);
}

#[tokio::test]
async fn panicking_source_is_reported() {
    init_tracing();
    let source = PageSourceFn(|_: CancellationToken, state: PageState<u8, ()>, req: PageRequest<()>| async move {
        if req.index == 0 {
            state.request(1, ()).await;
            return Ok::<Vec<u8>, FetchError>(vec![1, 2]);
        }
        panic!("source bug on page {}", req.index);
    });
    let pager = depaginate(
        CancellationToken::new(),
        source,
        HandlerFn(|_: &CancellationToken, _: usize, _: u8| {}),
        DepaginateOptions::<()>::new().per_page(2),
    )
    .unwrap();
    let err = pager.wait().await.unwrap_err();
    assert_eq!(err.failed_pages(), vec![1]);
    assert!(matches!(
        &err.failures()[0].error,
        FetchError::Panicked(msg) if msg == "source bug on page 1"
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tiny_queue_still_completes() {
    init_tracing();
    let config = EngineConfig::from_toml_str("capacity = 1\nper_page = 5\n").unwrap();
    let source = Arc::new(Numbered::new(103, 5, 25));
    let (seen, handler) = collector();
    let pager = depaginate(
        CancellationToken::new(),
        Arc::clone(&source),
        handler,
        DepaginateOptions::<String>::from_config(config),
    )
    .unwrap();
    let meta = pager.wait().await.unwrap();
    assert_eq!(meta, PageMeta::new(103, 21, 5));
    assert_eq!(sorted(&seen), (0..103).map(|i| (i, i)).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn canceled_sources_are_released_before_wait_returns() {
    init_tracing();
    for _ in 0..50 {
        let guard = Arc::new(());
        let held = Arc::downgrade(&guard);
        let source = PageSourceFn(move |_: CancellationToken, state: PageState<usize, ()>, req: PageRequest<()>| {
            let held = if req.index == 0 { None } else { held.upgrade() };
            async move {
                if req.index == 0 {
                    state.update([Hint::PerPage(3)]).await;
                    for page in 1..=4 {
                        state.request(page, ()).await;
                    }
                    return Ok(vec![0]);
                }
                let _held = held;
                std::future::pending::<()>().await;
                Ok::<Vec<usize>, FetchError>(Vec::new())
            }
        });
        let pager = depaginate(
            CancellationToken::new(),
            source,
            HandlerFn(|_: &CancellationToken, _: usize, _: usize| {}),
            DepaginateOptions::<()>::new(),
        )
        .unwrap();

        let meta = pager.wait().await.unwrap();
        assert_eq!(meta, PageMeta::new(1, 1, 3));
        assert_eq!(Arc::strong_count(&guard), 1, "page source outlived the traversal");
    }
}

/// Opaque cursor with no sensible default value.
#[derive(Clone, Debug, PartialEq)]
struct Cursor(String);

#[tokio::test]
async fn payload_without_default_can_seed_the_traversal() {
    init_tracing();
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&payloads);
    let source = PageSourceFn(move |_: CancellationToken, state: PageState<u8, Cursor>, req: PageRequest<Cursor>| {
        sink.lock().push(req.payload.clone());
        async move {
            if req.index == 0 {
                state.request(1, Cursor(format!("{}/next", req.payload.0))).await;
                return Ok::<_, FetchError>(vec![1, 2]);
            }
            Ok(vec![3])
        }
    });
    let pager = depaginate(
        CancellationToken::new(),
        source,
        HandlerFn(|_: &CancellationToken, _: usize, _: u8| {}),
        DepaginateOptions::with_request(Cursor("/items".to_string())).per_page(2),
    )
    .unwrap();

    let meta = pager.wait().await.unwrap();
    assert_eq!(meta, PageMeta::new(3, 2, 2));
    assert_eq!(
        *payloads.lock(),
        vec![Cursor("/items".to_string()), Cursor("/items/next".to_string())]
    );
}
