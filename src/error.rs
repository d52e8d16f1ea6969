//! Error types for page fetches, traversals, and configuration.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::page::PageRequest;

/// Boxed error returned by page sources.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Outcome of a failed page fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch observed its cancellation token.
    #[error("page fetch canceled")]
    Canceled,
    /// The fetch ran past its deadline.
    #[error("page fetch deadline exceeded")]
    Timeout(#[from] tokio::time::error::Elapsed),
    /// The page source panicked.
    #[error("page source panicked: {0}")]
    Panicked(String),
    /// Any other failure reported by the page source.
    #[error(transparent)]
    Failed(BoxError),
}

impl FetchError {
    /// Wraps an arbitrary source error.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        FetchError::Failed(err.into())
    }

    /// Cancellation and deadline errors are expected once the last page is
    /// known and are never reported to the caller.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Canceled | FetchError::Timeout(_))
    }
}

/// A failed fetch together with the request that produced it.
#[derive(Debug, Error)]
#[error("page {}: {error}", .request.index)]
pub struct PageFailure<R: fmt::Debug> {
    /// The request that failed.
    pub request: PageRequest<R>,
    /// What went wrong.
    #[source]
    pub error: FetchError,
}

/// Every non-cancellation failure recorded during one traversal.
///
/// Failures arrive from concurrent fetches, so their order carries no meaning.
#[derive(Debug)]
pub struct DepaginateError<R: fmt::Debug> {
    failures: Vec<PageFailure<R>>,
    interrupted: bool,
}

impl<R: fmt::Debug> DepaginateError<R> {
    pub(crate) fn new(failures: Vec<PageFailure<R>>) -> Self {
        Self {
            failures,
            interrupted: false,
        }
    }

    pub(crate) fn interrupted(failures: Vec<PageFailure<R>>) -> Self {
        Self {
            failures,
            interrupted: true,
        }
    }

    /// True when the runtime shut down before the traversal completed.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// The recorded failures.
    pub fn failures(&self) -> &[PageFailure<R>] {
        &self.failures
    }

    /// Consumes the error, returning the recorded failures.
    pub fn into_failures(self) -> Vec<PageFailure<R>> {
        self.failures
    }

    /// Indices of the pages that failed, in ascending order.
    pub fn failed_pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.failures.iter().map(|f| f.request.index).collect();
        pages.sort_unstable();
        pages
    }
}

impl<R: fmt::Debug> fmt::Display for DepaginateError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.interrupted {
            return write!(f, "depagination interrupted before completion");
        }
        match self.failures.as_slice() {
            [] => write!(f, "depagination failed"),
            [only] => write!(f, "depagination failed: {only}"),
            [first, rest @ ..] => write!(
                f,
                "depagination failed: {first} (and {} more)",
                rest.len()
            ),
        }
    }
}

impl<R: fmt::Debug> StdError for DepaginateError<R> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failures
            .first()
            .map(|failure| &failure.error as &(dyn StdError + 'static))
    }
}

/// Rejected configuration, reported before any work is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The mutation queue needs room for at least one entry.
    #[error("queue capacity must be at least 1")]
    ZeroCapacity,
    /// The initial hints contradict each other.
    #[error(
        "inconsistent hints: {total_items} items cannot span {total_pages} pages of {per_page}"
    )]
    InconsistentHints {
        /// Hinted item count.
        total_items: usize,
        /// Hinted page count.
        total_pages: usize,
        /// Hinted page size.
        per_page: usize,
    },
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// `depaginate` was called outside a Tokio runtime.
    #[error("depaginate must be called from within a tokio runtime")]
    NoRuntime,
}
