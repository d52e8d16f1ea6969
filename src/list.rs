//! An item handler that assembles every item into one ordered list.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handler::{Doner, ItemHandler, Starter, Updater};
use crate::page::PageMeta;

enum ListAction<T> {
    Item { index: usize, item: T },
    Update(PageMeta),
}

/// Collects items into a `Vec` in canonical order.
///
/// Install one `Arc<ListHandler<T>>` both as the item handler and through
/// [`DepaginateOptions::with_lifecycle`](crate::DepaginateOptions::with_lifecycle).
/// Items are placed by a dedicated assembler thread, so handling never
/// contends on the list. Once the traversal has been waited on, the list
/// holds exactly the retrieved items.
///
/// The same handler may drive several traversals in turn; each one appends
/// after the items already collected.
pub struct ListHandler<T> {
    state: Mutex<ListState<T>>,
    sender: RwLock<Option<Sender<ListAction<T>>>>,
}

struct ListState<T> {
    items: Vec<T>,
    offset: usize,
    worker: Option<thread::JoinHandle<Assembler<T>>>,
}

impl<T> ListHandler<T> {
    /// An empty list.
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    /// A list that already holds `items`; new items are appended after them.
    pub fn from_items(items: Vec<T>) -> Self {
        Self {
            state: Mutex::new(ListState {
                items,
                offset: 0,
                worker: None,
            }),
            sender: RwLock::new(None),
        }
    }

    /// Number of items currently held. Only meaningful between traversals.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True when no items are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the collected items, leaving the list empty.
    pub fn take_items(&self) -> Vec<T> {
        std::mem::take(&mut self.state.lock().items)
    }

    fn submit(&self, action: ListAction<T>) {
        match self.sender.read().as_ref() {
            Some(tx) => {
                if tx.send(action).is_err() {
                    warn!("list.assembler.gone");
                }
            }
            None => warn!("list.not_started"),
        }
    }
}

impl<T: Clone> ListHandler<T> {
    /// A copy of the collected items.
    pub fn items(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }
}

impl<T> Default for ListHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ListHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ListHandler")
            .field("len", &state.items.len())
            .field("offset", &state.offset)
            .field("running", &state.worker.is_some())
            .finish()
    }
}

impl<T: Send + 'static> ItemHandler<T> for ListHandler<T> {
    fn handle(&self, _ctx: &CancellationToken, index: usize, item: T) {
        self.submit(ListAction::Item { index, item });
    }
}

impl<T: Default + Send + 'static> Starter for ListHandler<T> {
    fn start(&self, meta: &PageMeta) {
        let mut state = self.state.lock();
        if state.worker.is_some() {
            warn!("list.start.already_running");
            return;
        }
        let items = std::mem::take(&mut state.items);
        let mut assembler = Assembler {
            offset: items.len(),
            items,
            per_page: meta.per_page,
            filled: 0,
        };
        match meta.capacity_hint() {
            Some(len) => assembler.grow(len),
            None => assembler.grow(meta.per_page),
        }
        state.offset = assembler.offset;

        let (tx, rx) = mpsc::channel();
        state.worker = Some(thread::spawn(move || assembler.run(rx)));
        *self.sender.write() = Some(tx);
        debug!(offset = state.offset, meta = %meta, "list.start");
    }
}

impl<T: Send + 'static> Updater for ListHandler<T> {
    fn update(&self, meta: &PageMeta) {
        self.submit(ListAction::Update(*meta));
    }
}

impl<T: Default + Send + 'static> Doner for ListHandler<T> {
    fn done(&self, meta: &PageMeta) {
        drop(self.sender.write().take());
        let mut state = self.state.lock();
        let Some(worker) = state.worker.take() else {
            warn!("list.done.not_started");
            return;
        };
        let assembler = match worker.join() {
            Ok(assembler) => assembler,
            Err(payload) => std::panic::resume_unwind(payload),
        };

        // Without an item count the highest filled slot marks the end.
        let count = if meta.total_items > 0 {
            meta.total_items
        } else {
            assembler.filled
        };
        let mut items = assembler.items;
        items.resize_with(assembler.offset + count, T::default);
        debug!(len = items.len(), offset = assembler.offset, "list.done");
        state.items = items;
    }
}

/// Owns the list while a traversal runs.
struct Assembler<T> {
    items: Vec<T>,
    offset: usize,
    per_page: usize,
    filled: usize,
}

impl<T: Default> Assembler<T> {
    fn run(mut self, rx: Receiver<ListAction<T>>) -> Self {
        for action in rx {
            match action {
                ListAction::Item { index, item } => self.place(index, item),
                ListAction::Update(meta) => {
                    self.per_page = meta.per_page;
                    if let Some(len) = meta.capacity_hint() {
                        self.grow(len);
                    }
                }
            }
        }
        self
    }

    fn place(&mut self, index: usize, item: T) {
        let slot = self.offset + index;
        if slot >= self.items.len() {
            self.grow(index + self.per_page.max(1));
        }
        self.items[slot] = item;
        self.filled = self.filled.max(index + 1);
    }

    /// Makes room for `len` items past the offset.
    fn grow(&mut self, len: usize) {
        let want = self.offset + len;
        if self.items.len() < want {
            self.items.resize_with(want, T::default);
        }
    }
}
