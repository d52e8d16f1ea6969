//! Page requests and the collection metadata gathered while paging.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Request for a single page.
///
/// The payload is opaque to the depaginator; it is handed to the page source
/// unchanged and attached to any failure reported for the page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest<R> {
    /// 0-based page index.
    pub index: usize,
    /// Application data needed to fetch the page, such as a link or cursor.
    pub payload: R,
}

impl<R> PageRequest<R> {
    /// Creates a request for `index` carrying `payload`.
    pub fn new(index: usize, payload: R) -> Self {
        Self { index, payload }
    }
}

/// Pagination metadata. A zero field means the value is not known yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Total number of items.
    pub total_items: usize,
    /// Total number of pages.
    pub total_pages: usize,
    /// Items per full page.
    pub per_page: usize,
}

impl PageMeta {
    /// Builds metadata from explicit values.
    pub fn new(total_items: usize, total_pages: usize, per_page: usize) -> Self {
        Self {
            total_items,
            total_pages,
            per_page,
        }
    }

    /// Applies a hint, returning whether any value changed. Zero hints carry no
    /// information and are ignored.
    pub fn apply(&mut self, hint: Hint) -> bool {
        let (slot, value) = match hint {
            Hint::TotalItems(n) => (&mut self.total_items, n),
            Hint::TotalPages(n) => (&mut self.total_pages, n),
            Hint::PerPage(n) => (&mut self.per_page, n),
        };
        if value == 0 || *slot == value {
            return false;
        }
        *slot = value;
        true
    }

    /// Lowers the page count to `pages` unless a smaller count is already known.
    pub(crate) fn clamp_pages(&mut self, pages: usize) -> bool {
        clamp(&mut self.total_pages, pages)
    }

    /// Lowers the item count to `items` unless a smaller count is already known.
    pub(crate) fn clamp_items(&mut self, items: usize) -> bool {
        clamp(&mut self.total_items, items)
    }

    /// Upper bound on the number of items implied by the known values.
    pub fn capacity_hint(&self) -> Option<usize> {
        if self.total_items > 0 {
            Some(self.total_items)
        } else if self.total_pages > 0 && self.per_page > 0 {
            self.total_pages.checked_mul(self.per_page)
        } else {
            None
        }
    }
}

impl fmt::Display for PageMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "items={} pages={} per_page={}",
            self.total_items, self.total_pages, self.per_page
        )
    }
}

fn clamp(slot: &mut usize, value: usize) -> bool {
    if *slot != 0 && *slot <= value {
        return false;
    }
    let changed = *slot != value;
    *slot = value;
    changed
}

/// Metadata reported by a page source while fetching, or passed up front.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hint {
    /// Total number of items.
    TotalItems(usize),
    /// Total number of pages.
    TotalPages(usize),
    /// Number of items per page.
    PerPage(usize),
}
