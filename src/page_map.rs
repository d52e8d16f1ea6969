//! Growable bitmap recording which page indices have been requested.

const WORD_BITS: usize = u64::BITS as usize;

/// Highest page index a traversal will fetch. Requests above it are dropped,
/// which caps the request bitmap at 8 MiB.
pub const MAX_PAGE_INDEX: usize = (1 << 26) - 1;

/// Bitmap of requested pages used to keep a page from being fetched twice.
///
/// The map performs no synchronization of its own; it is owned by the
/// depaginator's serializer task, which is the only caller.
#[derive(Clone, Debug, Default)]
pub struct PageMap {
    words: Vec<u64>,
}

impl PageMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `page` as requested and reports whether it already was.
    ///
    /// Storage grows on demand to cover `page`; previously set bits survive
    /// the resize. Callers bound `page` (see [`MAX_PAGE_INDEX`]), since a
    /// huge index allocates the whole bitmap up to it.
    pub fn check_and_set(&mut self, page: usize) -> bool {
        let (word, bit) = locate(page);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let was_set = self.words[word] & mask != 0;
        self.words[word] |= mask;
        was_set
    }

    /// Returns whether `page` has been marked.
    pub fn contains(&self, page: usize) -> bool {
        let (word, bit) = locate(page);
        self.words
            .get(word)
            .is_some_and(|bits| bits & (1u64 << bit) != 0)
    }

    /// Number of marked pages.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true when no page has been marked.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }
}

#[inline]
fn locate(page: usize) -> (usize, usize) {
    (page / WORD_BITS, page % WORD_BITS)
}
