//! Traversal driver: validates options, starts the serializer, and collects
//! the outcome.

mod fetch;
mod serializer;

use std::fmt;
use std::panic;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ConfigError, DepaginateError, PageFailure};
use crate::handler::{Doner, ItemHandler, PageSource};
use crate::mutation::Mutation;
use crate::options::DepaginateOptions;
use crate::page::{PageMeta, PageRequest};
use crate::state::PageState;

use self::serializer::{Finished, Serializer};

/// Starts traversing a paginated collection.
///
/// Page 0 is requested with the payload from `options`; further pages are
/// requested by the page source or through [`Depaginator::state`]. Items are
/// handed to `handler` concurrently as pages arrive. The traversal runs until
/// no fetch is outstanding; call [`Depaginator::wait`] to learn how it ended.
///
/// Must be called from within a Tokio runtime. Cancelling `ctx` cancels every
/// in-flight fetch.
pub fn depaginate<T, R, S, H>(
    ctx: CancellationToken,
    source: S,
    handler: H,
    options: DepaginateOptions<R>,
) -> Result<Depaginator<T, R>, ConfigError>
where
    S: PageSource<T, R>,
    H: ItemHandler<T>,
    T: Send + 'static,
    R: Clone + Send + Sync + fmt::Debug + 'static,
{
    let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
    let DepaginateOptions {
        config,
        request,
        starter,
        updater,
        doner,
    } = options;
    let config = config.validate()?;
    let meta = config.initial_meta();

    if let Some(starter) = &starter {
        starter.start(&meta);
    }

    let (queue, inbox) = mpsc::channel(config.capacity);
    let serializer = Serializer::new(
        ctx,
        Arc::new(source),
        Arc::new(handler),
        updater,
        queue.clone(),
        meta,
    );
    debug!(meta = %meta, capacity = config.capacity, "depaginate.start");
    let serializer = runtime.spawn(serializer.run(inbox, PageRequest::new(0, request)));

    Ok(Depaginator {
        queue,
        initial: meta,
        serializer,
        doner,
    })
}

/// A running traversal.
///
/// Dropping it without waiting leaves the traversal running to completion in
/// the background, minus the done hook.
pub struct Depaginator<T, R: fmt::Debug> {
    queue: mpsc::Sender<Mutation<T, R>>,
    initial: PageMeta,
    serializer: JoinHandle<Finished<R>>,
    doner: Option<Arc<dyn Doner>>,
}

impl<T, R> Depaginator<T, R>
where
    T: Send + 'static,
    R: Send + fmt::Debug + 'static,
{
    /// A handle for requesting pages or reporting metadata from outside any
    /// page source. Ignored once the traversal has completed.
    pub fn state(&self) -> PageState<T, R> {
        PageState::new(self.queue.clone(), self.initial.per_page)
    }

    /// Waits for completion and returns the full outcome, then runs the done
    /// hook.
    ///
    /// Panics raised by the item handler or a hook are resumed here.
    pub async fn finish(self) -> Report<R> {
        let Depaginator {
            queue,
            initial,
            serializer,
            doner,
        } = self;

        let (finished, interrupted) = match serializer.await {
            Ok(finished) => (finished, false),
            Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
            Err(err) => {
                warn!(error = %err, "depaginate.serializer.interrupted");
                let finished = Finished {
                    meta: initial,
                    failures: Vec::new(),
                    pages_requested: 0,
                    cancelers_left: 0,
                };
                (finished, true)
            }
        };

        if let Some(doner) = doner {
            let meta = finished.meta;
            match tokio::task::spawn_blocking(move || doner.done(&meta)).await {
                Ok(()) => {}
                Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
                Err(err) => warn!(error = %err, "depaginate.done_hook.interrupted"),
            }
        }

        let report = Report {
            meta: finished.meta,
            failures: finished.failures,
            pages_requested: finished.pages_requested,
            cancelers_left: finished.cancelers_left,
            queue_closed: queue.is_closed(),
            interrupted,
        };
        debug!(
            meta = %report.meta,
            pages = report.pages_requested,
            failures = report.failures.len(),
            "depaginate.finished"
        );
        report
    }

    /// Waits for completion. Returns the final metadata, or every
    /// non-cancellation failure if any page could not be fetched.
    pub async fn wait(self) -> Result<PageMeta, DepaginateError<R>> {
        self.finish().await.into_result()
    }
}

impl<T, R: fmt::Debug> fmt::Debug for Depaginator<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Depaginator")
            .field("initial", &self.initial)
            .field("finished", &self.serializer.is_finished())
            .field("doner", &self.doner.is_some())
            .finish()
    }
}

/// Everything known about a traversal once it has completed.
#[derive(Debug)]
pub struct Report<R: fmt::Debug> {
    /// Final metadata.
    pub meta: PageMeta,
    /// Non-cancellation failures, in the order they were recorded.
    pub failures: Vec<PageFailure<R>>,
    /// Number of distinct pages fetched.
    pub pages_requested: usize,
    /// Cancellation handles still registered at completion. Always 0 for a
    /// traversal that ran to completion.
    pub cancelers_left: usize,
    /// Whether the mutation queue had been shut.
    pub queue_closed: bool,
    /// Whether the runtime shut down before the traversal completed.
    pub interrupted: bool,
}

impl<R: fmt::Debug> Report<R> {
    /// The final metadata, or the recorded failures.
    pub fn into_result(self) -> Result<PageMeta, DepaginateError<R>> {
        if self.interrupted {
            Err(DepaginateError::interrupted(self.failures))
        } else if self.failures.is_empty() {
            Ok(self.meta)
        } else {
            Err(DepaginateError::new(self.failures))
        }
    }
}
