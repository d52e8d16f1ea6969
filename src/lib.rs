//! Concurrent traversal of paginated collections.
//!
//! A [`PageSource`] fetches one page at a time and may request further pages
//! or report the item count, page count, and page size as it learns them.
//! [`depaginate`] fetches pages concurrently, never fetching the same page
//! twice, and hands every item to an [`ItemHandler`] with its canonical index
//! `per_page * page + offset`. When a short page reveals where the data ends,
//! fetches for later pages are cancelled.
//!
//! All bookkeeping is applied by one serializer task from a bounded queue of
//! mutations, so no state is shared between fetches.
//!
//! ```no_run
//! use std::sync::Arc;
//! use depaginate::{
//!     depaginate, CancellationToken, DepaginateOptions, FetchError, ListHandler, PageRequest,
//!     PageSourceFn, PageState,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let list = Arc::new(ListHandler::<u32>::new());
//! let source = PageSourceFn(|_ctx: CancellationToken, state: PageState<u32, ()>, req: PageRequest<()>| async move {
//!     if req.index == 0 {
//!         state.request(1, ()).await;
//!     }
//!     let len = if req.index == 0 { 10 } else { 4 };
//!     Ok::<_, FetchError>(vec![req.index as u32; len])
//! });
//! let pager = depaginate(
//!     CancellationToken::new(),
//!     source,
//!     Arc::clone(&list),
//!     DepaginateOptions::new().per_page(10).with_lifecycle(Arc::clone(&list)),
//! )?;
//! let meta = pager.wait().await?;
//! assert_eq!(meta.total_items, 14);
//! assert_eq!(list.len(), 14);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod depaginator;
pub mod error;
pub mod handler;
pub mod list;
mod mutation;
pub mod options;
pub mod page;
pub mod page_map;
pub mod state;

pub use depaginator::{depaginate, Depaginator, Report};
pub use error::{BoxError, ConfigError, DepaginateError, FetchError, PageFailure};
pub use handler::{
    Doner, HandlerFn, HookFn, ItemHandler, PageSource, PageSourceFn, Starter, Updater,
};
pub use list::ListHandler;
pub use options::{DepaginateOptions, EngineConfig, DEFAULT_CAPACITY};
pub use page::{Hint, PageMeta, PageRequest};
pub use page_map::{PageMap, MAX_PAGE_INDEX};
pub use state::PageState;
pub use tokio_util::sync::CancellationToken;
