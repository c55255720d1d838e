/// One page of a listing, 1-based.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: i64 = 25;
    pub const MAX_LIMIT: i64 = 100;
    /// Largest page number accepted; later pages are clamped to it.
    pub const MAX_PAGE: i64 = 1_000_000;

    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).clamp(1, Self::MAX_PAGE),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

#[derive(Debug)]
pub struct PageOf<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: PageRequest,
}

impl<T> PageOf<T> {
    pub fn has_next(&self) -> bool {
        self.page.offset() + (self.items.len() as i64) < self.total
    }

    pub fn has_prev(&self) -> bool {
        self.page.page > 1
    }
}
