//! The handle page sources use to report metadata and request more pages.

use std::fmt;

use tokio::sync::mpsc;

use crate::mutation::{submit, Mutation};
use crate::page::{Hint, PageRequest};

/// Handle through which a page source feeds back into a running traversal.
///
/// It can report metadata and request pages but cannot touch the traversal's
/// state directly: every call becomes a queued mutation. Calls made after the
/// traversal has completed are ignored.
pub struct PageState<T, R> {
    queue: mpsc::Sender<Mutation<T, R>>,
    per_page: usize,
}

impl<T, R> PageState<T, R> {
    pub(crate) fn new(queue: mpsc::Sender<Mutation<T, R>>, per_page: usize) -> Self {
        Self { queue, per_page }
    }

    /// Reports new values for the item count, page count, or page size.
    /// Zero values are ignored.
    pub async fn update(&self, hints: impl IntoIterator<Item = Hint>) {
        let hints: Vec<Hint> = hints.into_iter().collect();
        if hints.is_empty() {
            return;
        }
        submit(&self.queue, Mutation::MergeMetadata(hints)).await;
    }

    /// Asks for page `index` to be fetched with `payload`. Repeated requests,
    /// requests beyond a known page count, and indices above
    /// [`MAX_PAGE_INDEX`](crate::MAX_PAGE_INDEX) are ignored.
    pub async fn request(&self, index: usize, payload: R) {
        submit(
            &self.queue,
            Mutation::RequestPage(PageRequest::new(index, payload)),
        )
        .await;
    }

    /// The page size passed in the options, or 0 if none was given.
    ///
    /// This does not follow sizes reported later through [`PageState::update`].
    pub fn per_page(&self) -> usize {
        self.per_page
    }
}

impl<T, R> Clone for PageState<T, R> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            per_page: self.per_page,
        }
    }
}

impl<T, R> fmt::Debug for PageState<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageState")
            .field("per_page", &self.per_page)
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}
