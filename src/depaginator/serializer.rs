use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::fetch::FetchTask;
use crate::error::{FetchError, PageFailure};
use crate::handler::{ItemHandler, PageSource, Updater};
use crate::mutation::Mutation;
use crate::page::{Hint, PageMeta, PageRequest};
use crate::page_map::{PageMap, MAX_PAGE_INDEX};

/// Mutable traversal state. Owned by the serializer task alone.
pub(crate) struct StateRecord<R: fmt::Debug> {
    pub(crate) meta: PageMeta,
    pub(crate) outstanding: usize,
    pub(crate) cancelers: HashMap<usize, CancellationToken>,
    pub(crate) failures: Vec<PageFailure<R>>,
    pub(crate) pages: PageMap,
}

impl<R: fmt::Debug> StateRecord<R> {
    fn new(meta: PageMeta) -> Self {
        Self {
            meta,
            outstanding: 0,
            cancelers: HashMap::new(),
            failures: Vec::new(),
            pages: PageMap::new(),
        }
    }
}

/// State left behind once the serializer has drained its queue.
pub(crate) struct Finished<R: fmt::Debug> {
    pub(crate) meta: PageMeta,
    pub(crate) failures: Vec<PageFailure<R>>,
    pub(crate) pages_requested: usize,
    pub(crate) cancelers_left: usize,
}

/// Single writer for a traversal: applies mutations one at a time in the
/// order they were queued, launching fetches and item deliveries as it goes.
pub(crate) struct Serializer<S, H, T, R: fmt::Debug> {
    root: CancellationToken,
    source: Arc<S>,
    handler: Arc<H>,
    updater: Option<Arc<dyn Updater>>,
    queue: mpsc::Sender<Mutation<T, R>>,
    per_page_hint: usize,
    record: StateRecord<R>,
    deliveries: JoinSet<()>,
    draining: bool,
}

impl<S, H, T, R> Serializer<S, H, T, R>
where
    S: PageSource<T, R>,
    H: ItemHandler<T>,
    T: Send + 'static,
    R: Clone + Send + Sync + fmt::Debug + 'static,
{
    pub(crate) fn new(
        root: CancellationToken,
        source: Arc<S>,
        handler: Arc<H>,
        updater: Option<Arc<dyn Updater>>,
        queue: mpsc::Sender<Mutation<T, R>>,
        meta: PageMeta,
    ) -> Self {
        Self {
            root,
            source,
            handler,
            updater,
            queue,
            per_page_hint: meta.per_page,
            record: StateRecord::new(meta),
            deliveries: JoinSet::new(),
            draining: false,
        }
    }

    /// Requests `first`, then applies mutations until no fetch is outstanding.
    /// The queue is then closed and drained, item deliveries are joined, and
    /// the final state is returned.
    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Mutation<T, R>>,
        first: PageRequest<R>,
    ) -> Finished<R> {
        self.request_page(first);
        while self.record.outstanding > 0 {
            let Some(mutation) = inbox.recv().await else {
                break;
            };
            self.apply(mutation);
        }

        self.draining = true;
        inbox.close();
        while let Ok(mutation) = inbox.try_recv() {
            self.apply(mutation);
        }
        drop(inbox);

        while let Some(joined) = self.deliveries.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
                warn!(error = %err, "depaginate.serializer.delivery_aborted");
            }
        }

        debug!(
            meta = %self.record.meta,
            pages = self.record.pages.len(),
            failures = self.record.failures.len(),
            "depaginate.serializer.finished"
        );
        self.finish()
    }

    pub(crate) fn apply(&mut self, mutation: Mutation<T, R>) {
        trace!(kind = mutation.kind(), outstanding = self.record.outstanding, "depaginate.serializer.apply");
        match mutation {
            Mutation::RegisterCanceler { page, token } => self.register_canceler(page, token),
            Mutation::WithdrawCanceler { page } => {
                self.record.cancelers.remove(&page);
            }
            Mutation::RecordError { request, error } => self.record_error(request, error),
            Mutation::DeliverItems { page, items } => self.deliver(page, items),
            Mutation::MergeMetadata(hints) => self.merge(hints),
            Mutation::RequestPage(req) => self.request_page(req),
            Mutation::FetchFinished { page } => {
                debug_assert!(self.record.outstanding > 0, "fetch finished twice");
                self.record.outstanding = self.record.outstanding.saturating_sub(1);
                trace!(page, outstanding = self.record.outstanding, "depaginate.serializer.fetch_finished");
            }
        }
    }

    fn register_canceler(&mut self, page: usize, token: CancellationToken) {
        let total_pages = self.record.meta.total_pages;
        if total_pages > 0 && page >= total_pages {
            trace!(page, total_pages, "depaginate.serializer.cancel_on_register");
            token.cancel();
            return;
        }
        self.record.cancelers.insert(page, token);
    }

    fn record_error(&mut self, request: PageRequest<R>, error: FetchError) {
        if error.is_cancellation() {
            return;
        }
        debug!(page = request.index, error = %error, "depaginate.serializer.failure_recorded");
        self.record.failures.push(PageFailure { request, error });
    }

    fn merge(&mut self, hints: Vec<Hint>) {
        let mut changed = false;
        for hint in hints {
            changed |= self.record.meta.apply(hint);
        }
        if changed {
            self.notify_update();
        }
    }

    /// Applies the last-page check, then hands the items to the handler.
    fn deliver(&mut self, page: usize, items: Vec<T>) {
        let meta = &mut self.record.meta;
        let beyond_end = meta.total_pages > 0 && page >= meta.total_pages;
        let short = meta.per_page > 0 && items.len() < meta.per_page;
        let last_known = meta.total_pages > 0 && page + 1 == meta.total_pages;
        if !beyond_end && (short || last_known) {
            let mut changed = meta.clamp_pages(page + 1);
            if meta.per_page > 0 || page == 0 {
                changed |= meta.clamp_items(meta.per_page.saturating_mul(page) + items.len());
            }
            self.cancel_beyond(page);
            if changed {
                self.notify_update();
            }
        }

        if items.is_empty() {
            return;
        }
        let base = self.record.meta.per_page.saturating_mul(page);
        let handler = Arc::clone(&self.handler);
        let ctx = self.root.clone();
        trace!(page, base, items = items.len(), "depaginate.serializer.deliver");
        self.deliveries.spawn_blocking(move || {
            for (offset, item) in items.into_iter().enumerate() {
                handler.handle(&ctx, base + offset, item);
            }
        });
    }

    fn cancel_beyond(&mut self, page: usize) {
        let mut canceled = 0usize;
        self.record.cancelers.retain(|&idx, token| {
            if idx > page {
                token.cancel();
                canceled += 1;
                false
            } else {
                true
            }
        });
        if canceled > 0 {
            debug!(last_page = page, canceled, "depaginate.serializer.canceled_beyond_end");
        }
    }

    fn request_page(&mut self, req: PageRequest<R>) {
        let page = req.index;
        if self.draining {
            trace!(page, "depaginate.serializer.request_after_completion");
            return;
        }
        if page > MAX_PAGE_INDEX {
            warn!(page, max = MAX_PAGE_INDEX, "depaginate.serializer.request_out_of_range");
            return;
        }
        let total_pages = self.record.meta.total_pages;
        if total_pages > 0 && page >= total_pages {
            trace!(page, total_pages, "depaginate.serializer.request_beyond_end");
            return;
        }
        if self.record.pages.check_and_set(page) {
            trace!(page, "depaginate.serializer.request_duplicate");
            return;
        }

        self.record.outstanding += 1;
        trace!(page, outstanding = self.record.outstanding, "depaginate.serializer.fetch_started");
        let task = FetchTask {
            source: Arc::clone(&self.source),
            queue: self.queue.clone(),
            root: self.root.clone(),
            per_page: self.per_page_hint,
        };
        tokio::spawn(task.run(req));
    }

    fn notify_update(&self) {
        trace!(meta = %self.record.meta, "depaginate.serializer.meta_changed");
        if let Some(updater) = &self.updater {
            updater.update(&self.record.meta);
        }
    }

    fn finish(self) -> Finished<R> {
        Finished {
            meta: self.record.meta,
            pages_requested: self.record.pages.len(),
            cancelers_left: self.record.cancelers.len(),
            failures: self.record.failures,
        }
    }

    #[cfg(test)]
    pub(crate) fn record(&self) -> &StateRecord<R> {
        &self.record
    }
}
