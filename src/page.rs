use serde::Serialize;

pub const MAX_PAGE_SIZE: i64 = 100;

/// One page of a newest-first listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    /// `page_size` must already be clamped by [`bounds`].
    pub fn new(items: Vec<T>, page: i64, page_size: i64, total: i64) -> Self {
        Self {
            items,
            page,
            page_size,
            total,
            total_pages: (total + page_size - 1) / page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

/// Clamp `page` to `[1, ∞)` and `page_size` to `[1, 100]`, returning
/// `(page, page_size, offset)`.
pub fn bounds(page: i64, page_size: i64) -> (i64, i64, i64) {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(page_size);
    (page, page_size, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_bounds() {
        assert_eq!(bounds(0, 0), (1, 1, 0));
        assert_eq!(bounds(-4, 500), (1, 100, 0));
        assert_eq!(bounds(3, 20), (3, 20, 40));
        assert_eq!(bounds(i64::MAX, 100).2, i64::MAX);
    }

    #[test]
    fn counts_pages() {
        let page: Page<u8> = Page::new(vec![], 1, 10, 21);
        assert_eq!(page.total_pages, 3);
        let empty: Page<u8> = Page::new(vec![], 1, 10, 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn total_pages_is_serialized() {
        let page: Page<u8> = Page::new(vec![1, 2], 1, 2, 5);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["total_pages"], 3);
        assert_eq!(json["total"], 5);
    }
}
