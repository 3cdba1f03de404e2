//! Fixed-size page window for stores that hold one page of a larger table.

/// Which page a store currently shows, and how many rows exist in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    /// Total rows in the scoped table, as last counted
    pub total: usize,
}

impl PageWindow {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
            total: 0,
        }
    }

    /// Row offset of the first entry on this page.
    pub fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.page_size)
    }

    pub fn is_first_page(&self) -> bool {
        self.page == 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}
