//! Collaborator traits supplied by callers, with closure adapters.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::page::{PageMeta, PageRequest};
use crate::state::PageState;

/// Retrieves one page of items.
///
/// Implementations may report metadata and request further pages through the
/// [`PageState`] handle before returning. Requests for pages at or beyond a
/// known page count, and repeated requests, are ignored. The token is
/// cancelled once the page is known to lie past the end of the data; sources
/// that notice should return [`FetchError::Canceled`].
pub trait PageSource<T, R>: Send + Sync + 'static {
    /// Fetches the page described by `req`.
    fn get_page(
        &self,
        ctx: CancellationToken,
        state: PageState<T, R>,
        req: PageRequest<R>,
    ) -> impl Future<Output = Result<Vec<T>, FetchError>> + Send;
}

/// Adapts a closure returning a future into a [`PageSource`].
pub struct PageSourceFn<F>(pub F);

impl<T, R, F, Fut> PageSource<T, R> for PageSourceFn<F>
where
    F: Fn(CancellationToken, PageState<T, R>, PageRequest<R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, FetchError>> + Send,
{
    fn get_page(
        &self,
        ctx: CancellationToken,
        state: PageState<T, R>,
        req: PageRequest<R>,
    ) -> impl Future<Output = Result<Vec<T>, FetchError>> + Send {
        (self.0)(ctx, state, req)
    }
}

/// Receives every retrieved item along with its canonical index.
///
/// Called concurrently from engine tasks; there is no ordering across pages.
pub trait ItemHandler<T>: Send + Sync + 'static {
    /// Handles one item.
    fn handle(&self, ctx: &CancellationToken, index: usize, item: T);
}

/// Adapts a closure into an [`ItemHandler`].
pub struct HandlerFn<F>(pub F);

impl<T, F> ItemHandler<T> for HandlerFn<F>
where
    F: Fn(&CancellationToken, usize, T) + Send + Sync + 'static,
{
    fn handle(&self, ctx: &CancellationToken, index: usize, item: T) {
        (self.0)(ctx, index, item)
    }
}

impl<T, R, S> PageSource<T, R> for Arc<S>
where
    S: PageSource<T, R>,
{
    fn get_page(
        &self,
        ctx: CancellationToken,
        state: PageState<T, R>,
        req: PageRequest<R>,
    ) -> impl Future<Output = Result<Vec<T>, FetchError>> + Send {
        (**self).get_page(ctx, state, req)
    }
}

impl<T, H> ItemHandler<T> for Arc<H>
where
    H: ItemHandler<T>,
{
    fn handle(&self, ctx: &CancellationToken, index: usize, item: T) {
        (**self).handle(ctx, index, item)
    }
}

/// Called once with the initial metadata before the first page is fetched.
pub trait Starter: Send + Sync + 'static {
    /// Starts a traversal.
    fn start(&self, meta: &PageMeta);
}

/// Called whenever the item count, page count, or page size changes.
///
/// Runs on the serializer task; keep it short.
pub trait Updater: Send + Sync + 'static {
    /// Reports new metadata.
    fn update(&self, meta: &PageMeta);
}

/// Called once with the final metadata after every page has been handled.
///
/// Runs on the blocking pool, so it may wait on other threads.
pub trait Doner: Send + Sync + 'static {
    /// Finishes a traversal.
    fn done(&self, meta: &PageMeta);
}

/// Adapts a closure into a [`Starter`], [`Updater`], or [`Doner`].
pub struct HookFn<F>(pub F);

impl<F> Starter for HookFn<F>
where
    F: Fn(&PageMeta) + Send + Sync + 'static,
{
    fn start(&self, meta: &PageMeta) {
        (self.0)(meta)
    }
}

impl<F> Updater for HookFn<F>
where
    F: Fn(&PageMeta) + Send + Sync + 'static,
{
    fn update(&self, meta: &PageMeta) {
        (self.0)(meta)
    }
}

impl<F> Doner for HookFn<F>
where
    F: Fn(&PageMeta) + Send + Sync + 'static,
{
    fn done(&self, meta: &PageMeta) {
        (self.0)(meta)
    }
}
