use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::FetchError;
use crate::page::{Hint, PageRequest};

/// A single change to the depaginator state, applied by the serializer task.
pub(crate) enum Mutation<T, R> {
    /// A fetch for `page` is in flight and can be cancelled through `token`.
    RegisterCanceler {
        page: usize,
        token: CancellationToken,
    },
    /// The fetch for `page` returned; it can no longer be cancelled.
    WithdrawCanceler { page: usize },
    /// The fetch for `request` failed.
    RecordError {
        request: PageRequest<R>,
        error: FetchError,
    },
    /// The fetch for `page` produced `items`.
    DeliverItems { page: usize, items: Vec<T> },
    /// Metadata reported by a page source.
    MergeMetadata(Vec<Hint>),
    /// Someone asked for a page.
    RequestPage(PageRequest<R>),
    /// The fetch task for `page` is done and posts nothing further.
    FetchFinished { page: usize },
}

impl<T, R> Mutation<T, R> {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Mutation::RegisterCanceler { .. } => "register_canceler",
            Mutation::WithdrawCanceler { .. } => "withdraw_canceler",
            Mutation::RecordError { .. } => "record_error",
            Mutation::DeliverItems { .. } => "deliver_items",
            Mutation::MergeMetadata(_) => "merge_metadata",
            Mutation::RequestPage(_) => "request_page",
            Mutation::FetchFinished { .. } => "fetch_finished",
        }
    }
}

/// Queues a mutation, waiting for room when the queue is full. Mutations sent
/// after the serializer has shut its queue are dropped.
pub(crate) async fn submit<T, R>(queue: &mpsc::Sender<Mutation<T, R>>, mutation: Mutation<T, R>) {
    if let Err(mpsc::error::SendError(rejected)) = queue.send(mutation).await {
        trace!(kind = rejected.kind(), "depaginate.queue.closed");
    }
}
