//! Pagination utilities shared by every list endpoint

use serde::{Deserialize, Serialize};

/// Page size used when the client does not ask for one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound on client-requested page sizes
pub const MAX_PAGE_SIZE: i64 = 100;

/// Page request as it arrives in a query string (`?page=2&page_size=50`)
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl PageRequest {
    /// Page size clamped into [1, MAX_PAGE_SIZE]
    pub fn effective_page_size(&self) -> i64 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Pagination metadata calculated from total results
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: i64,
    /// Rows per page
    pub page_size: i64,
    /// Total number of pages
    pub total_pages: i64,
    /// Offset for SQL LIMIT/OFFSET query
    pub offset: i64,
}

/// Calculate pagination metadata from total results and requested page
///
/// The page is clamped into `[1, total_pages]`; an empty result set still
/// reports page 1 with zero pages.
///
/// # Examples
/// ```
/// use civitas_common::pagination::{calculate_pagination, PageRequest};
///
/// // 250 results at 100/page = 3 pages
/// let p = calculate_pagination(250, &PageRequest { page: 2, page_size: 100 });
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 100);
///
/// // Out-of-bounds page gets clamped
/// let p = calculate_pagination(250, &PageRequest { page: 99, page_size: 100 });
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 200);
/// ```
pub fn calculate_pagination(total_results: i64, request: &PageRequest) -> Pagination {
    let page_size = request.effective_page_size();
    let total_pages = (total_results.max(0) + page_size - 1) / page_size;
    let page = request.page.max(1).min(total_pages.max(1));
    let offset = (page - 1) * page_size;

    Pagination {
        page,
        page_size,
        total_pages,
        offset,
    }
}

/// One page of results plus the metadata clients need to navigate
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_items: i64, pagination: Pagination) -> Self {
        Self {
            items,
            page: pagination.page,
            page_size: pagination.page_size,
            total_items,
            total_pages: pagination.total_pages,
        }
    }

    /// Transform items while keeping the page metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(page: i64, page_size: i64) -> PageRequest {
        PageRequest { page, page_size }
    }

    #[test]
    fn test_pagination_normal() {
        let p = calculate_pagination(250, &req(2, 100));
        assert_eq!(p.page, 2);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.offset, 100);
    }

    #[test]
    fn test_pagination_out_of_bounds_high() {
        let p = calculate_pagination(150, &req(99, 100));
        assert_eq!(p.page, 2);
        assert_eq!(p.offset, 100);
    }

    #[test]
    fn test_pagination_out_of_bounds_low() {
        let p = calculate_pagination(150, &req(0, 100));
        assert_eq!(p.page, 1);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_pagination_empty() {
        let p = calculate_pagination(0, &req(1, 20));
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 0);
        assert_eq!(p.offset, 0);
    }

    #[test]
    fn test_page_size_clamped() {
        let p = calculate_pagination(1000, &req(1, 5000));
        assert_eq!(p.page_size, MAX_PAGE_SIZE);
        let p = calculate_pagination(10, &req(1, 0));
        assert_eq!(p.page_size, 1);
        assert_eq!(p.total_pages, 10);
    }

    #[test]
    fn test_exact_page_boundary() {
        let p = calculate_pagination(40, &req(2, 20));
        assert_eq!(p.total_pages, 2);
        assert_eq!(p.offset, 20);
    }

    #[test]
    fn test_page_map_keeps_metadata() {
        let p = calculate_pagination(3, &req(1, 20));
        let page = Page::new(vec![1, 2, 3], 3, p).map(|n| n * 10);
        assert_eq!(page.items, vec![10, 20, 30]);
        assert_eq!(page.total_items, 3);
        assert_eq!(page.total_pages, 1);
    }
}
