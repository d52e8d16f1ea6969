use std::any::Any;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::FetchError;
use crate::handler::PageSource;
use crate::mutation::{submit, Mutation};
use crate::page::PageRequest;
use crate::state::PageState;

/// Everything a fetch task needs besides its request.
pub(crate) struct FetchTask<S, T, R> {
    pub(crate) source: Arc<S>,
    pub(crate) queue: mpsc::Sender<Mutation<T, R>>,
    pub(crate) root: CancellationToken,
    pub(crate) per_page: usize,
}

impl<S, T, R> FetchTask<S, T, R>
where
    S: PageSource<T, R>,
    T: Send + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Fetches one page and reports the outcome to the serializer.
    ///
    /// Posts, in order: the canceler, its withdrawal, the items or the
    /// failure, and finally `FetchFinished`. The last one is posted on every
    /// path so the outstanding count stays exact.
    pub(crate) async fn run(self, req: PageRequest<R>) {
        let page = req.index;
        let token = self.root.child_token();
        submit(
            &self.queue,
            Mutation::RegisterCanceler {
                page,
                token: token.clone(),
            },
        )
        .await;

        let state = PageState::new(self.queue.clone(), self.per_page);
        let outcome = call_source(Arc::clone(&self.source), token, state, req.clone()).await;

        submit(&self.queue, Mutation::WithdrawCanceler { page }).await;
        match outcome {
            Ok(items) => {
                trace!(page, items = items.len(), "depaginate.fetch.ok");
                submit(&self.queue, Mutation::DeliverItems { page, items }).await;
            }
            Err(error) => {
                if error.is_cancellation() {
                    trace!(page, "depaginate.fetch.canceled");
                } else {
                    debug!(page, error = %error, "depaginate.fetch.failed");
                }
                submit(&self.queue, Mutation::RecordError { request: req, error }).await;
            }
        }
        submit(&self.queue, Mutation::FetchFinished { page }).await;
    }
}

/// Runs the page source in its own task so that a panic surfaces as a
/// failure instead of tearing down the fetch task, and races it against the
/// page's cancellation token.
///
/// On cancellation the source task is aborted and joined before returning,
/// so the source future and everything it captured are dropped by the time
/// `FetchFinished` is posted.
async fn call_source<S, T, R>(
    source: Arc<S>,
    token: CancellationToken,
    state: PageState<T, R>,
    req: PageRequest<R>,
) -> Result<Vec<T>, FetchError>
where
    S: PageSource<T, R>,
    T: Send + 'static,
    R: Send + Sync + 'static,
{
    let ctx = token.clone();
    let mut call = tokio::spawn(async move { source.get_page(ctx, state, req).await });
    tokio::select! {
        biased;
        joined = &mut call => match joined {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => Err(FetchError::Panicked(panic_message(err.into_panic()))),
            Err(_) => Err(FetchError::Canceled),
        },
        _ = token.cancelled() => {
            call.abort();
            match call.await {
                Err(err) if err.is_panic() => {
                    Err(FetchError::Panicked(panic_message(err.into_panic())))
                }
                // Finished or aborted, the page was canceled either way.
                _ => Err(FetchError::Canceled),
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
