//! # Pagination
//!
//! Page math shared by the catalog view (server-side ranges) and any list that
//! is paged client-side. Pages are 1-based.

use crate::errors::StoryTrackError;
use serde::{Deserialize, Serialize};

/// Number of pages needed for `total_items` at `page_size` per page.
pub fn total_pages(total_items: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total_items.div_ceil(page_size)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
}

impl Pagination {
    pub fn new(page: usize, page_size: usize, total_items: usize) -> Result<Self, StoryTrackError> {
        if page_size == 0 {
            return Err(StoryTrackError::Validation(
                "page size must be greater than zero".to_string(),
            ));
        }
        let mut pagination = Self {
            page: page.max(1),
            page_size,
            total_items,
        };
        pagination.clamp_page();
        Ok(pagination)
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.total_items, self.page_size)
    }

    /// Keeps the page inside `1..=total_pages` (page 1 when there is nothing).
    pub fn clamp_page(&mut self) {
        let last = self.total_pages().max(1);
        self.page = self.page.clamp(1, last);
    }

    /// Zero-based offset of the first item on the current page. Page 0 reads as page 1.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1) * self.page_size
    }

    /// The inclusive `(from, to)` row range for the backend.
    pub fn range(&self) -> (usize, usize) {
        let from = self.offset();
        (from, (from + self.page_size).saturating_sub(1).max(from))
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    /// The items of the current page out of a fully loaded list.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = self.offset().min(items.len());
        let end = (start + self.page_size).min(items.len());
        &items[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_is_ceiling() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(95, 12), 8);
    }

    #[test]
    fn test_range_is_inclusive() {
        let pagination = Pagination::new(3, 12, 100).unwrap();
        assert_eq!(pagination.range(), (24, 35));
        assert!(pagination.has_next());
        assert!(pagination.has_prev());
    }

    #[test]
    fn test_page_is_clamped() {
        let pagination = Pagination::new(99, 10, 25).unwrap();
        assert_eq!(pagination.page, 3);
        assert!(!pagination.has_next());

        let empty = Pagination::new(0, 10, 0).unwrap();
        assert_eq!(empty.page, 1);
        assert_eq!(empty.total_pages(), 0);
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        assert!(Pagination::new(1, 0, 10).is_err());
    }

    #[test]
    fn test_unvalidated_fields_do_not_underflow() {
        let raw: Pagination =
            serde_json::from_str(r#"{"page": 0, "page_size": 0, "total_items": 5}"#).unwrap();
        assert_eq!(raw.offset(), 0);
        assert_eq!(raw.range(), (0, 0));
        assert_eq!(raw.total_pages(), 0);
        assert!(raw.slice(&[1, 2, 3]).is_empty());

        let first = Pagination {
            page: 0,
            page_size: 10,
            total_items: 25,
        };
        assert_eq!(first.range(), (0, 9));
    }

    #[test]
    fn test_slice_last_page() {
        let items: Vec<u32> = (1..=25).collect();
        let pagination = Pagination::new(3, 10, items.len()).unwrap();
        assert_eq!(pagination.slice(&items), &[21, 22, 23, 24, 25]);
    }
}
