//! Paginated views over a data source.
//!
//! A [`Paginator`] keeps the table state (page, page size, sort column) and
//! pulls slices through the [`PageSource`] contract. Page numbers are zero
//! based and a source always has at least one (possibly empty) page.

use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::debug;

use crate::core::error::AppResult;
use crate::core::types::Selection;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("page {page} is outside 0..{total_pages}")]
    OutOfRange { page: u32, total_pages: u32 },

    #[error("cannot sort by unknown column '{0}'")]
    UnknownColumn(String),

    #[error("page size {size} must be between 1 and {max}")]
    InvalidPageSize { size: u32, max: u32 },
}

/// Slice requested from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
    pub sort_by: Option<String>,
    pub ascending: bool,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    /// Column keys accepted by [`Paginator::sort_by`].
    fn sortable_columns(&self) -> &[&'static str];

    async fn total_size(&self) -> AppResult<u64>;

    async fn fetch(&self, request: &PageRequest) -> AppResult<Vec<Self::Item>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub sort_by: Option<String>,
    pub ascending: bool,
}

pub fn total_pages(total_items: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    let pages = total_items.div_ceil(page_size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

pub struct Paginator<S: PageSource> {
    source: S,
    selection: Selection,
    max_page_size: u32,
    total_items: u64,
}

impl<S: PageSource> Paginator<S> {
    /// Build a paginator from a requested selection. Sort column and page
    /// size are validated; the page number is checked on [`Self::update`].
    pub fn new(source: S, selection: Selection, max_page_size: u32) -> Result<Self, PaginationError> {
        if selection.page_size == 0 || selection.page_size > max_page_size {
            return Err(PaginationError::InvalidPageSize {
                size: selection.page_size,
                max: max_page_size,
            });
        }
        if let Some(column) = &selection.sorted_by {
            if !source.sortable_columns().contains(&column.as_str()) {
                return Err(PaginationError::UnknownColumn(column.clone()));
            }
        }

        Ok(Self {
            source,
            selection,
            max_page_size,
            total_items: 0,
        })
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn current_page(&self) -> u32 {
        self.selection.current_page
    }

    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    pub fn total_pages(&self) -> u32 {
        total_pages(self.total_items, self.selection.page_size)
    }

    pub fn is_first(&self) -> bool {
        self.selection.current_page == 0
    }

    pub fn is_last(&self) -> bool {
        self.selection.current_page + 1 >= self.total_pages()
    }

    pub fn first(&mut self) {
        self.selection.current_page = 0;
    }

    pub fn last(&mut self) {
        self.selection.current_page = self.total_pages() - 1;
    }

    pub fn next(&mut self) -> Result<(), PaginationError> {
        if self.is_last() {
            return Err(self.out_of_range(self.selection.current_page.saturating_add(1)));
        }
        self.selection.current_page += 1;
        Ok(())
    }

    pub fn previous(&mut self) -> Result<(), PaginationError> {
        if self.is_first() {
            return Err(PaginationError::OutOfRange {
                page: 0,
                total_pages: self.total_pages(),
            });
        }
        self.selection.current_page -= 1;
        Ok(())
    }

    pub fn go_to(&mut self, page: u32) -> Result<(), PaginationError> {
        if page >= self.total_pages() {
            return Err(self.out_of_range(page));
        }
        self.selection.current_page = page;
        Ok(())
    }

    /// Sort by `column`. Sorting by the current column flips the direction.
    pub fn sort_by(&mut self, column: &str) -> Result<(), PaginationError> {
        if !self.source.sortable_columns().contains(&column) {
            return Err(PaginationError::UnknownColumn(column.to_string()));
        }

        if self.selection.sorted_by.as_deref() == Some(column) {
            self.selection.ascending = !self.selection.ascending;
        } else {
            self.selection.sorted_by = Some(column.to_string());
            self.selection.ascending = true;
        }
        self.first();
        Ok(())
    }

    pub fn set_page_size(&mut self, size: u32) -> Result<(), PaginationError> {
        if size == 0 || size > self.max_page_size {
            return Err(PaginationError::InvalidPageSize {
                size,
                max: self.max_page_size,
            });
        }
        self.selection.page_size = size;
        self.first();
        Ok(())
    }

    /// Refresh the total and fetch the current page. A page that no longer
    /// exists is clamped to the last one.
    pub async fn update(&mut self) -> AppResult<Page<S::Item>> {
        self.total_items = self.source.total_size().await?;
        let last = self.total_pages() - 1;
        if self.selection.current_page > last {
            debug!(
                requested = self.selection.current_page,
                last, "Clamping page to last available"
            );
            self.selection.current_page = last;
        }

        let request = PageRequest {
            offset: u64::from(self.selection.current_page) * u64::from(self.selection.page_size),
            limit: self.selection.page_size,
            sort_by: self.selection.sorted_by.clone(),
            ascending: self.selection.ascending,
        };
        let items = self.source.fetch(&request).await?;

        Ok(Page {
            items,
            page: self.selection.current_page,
            page_size: self.selection.page_size,
            total_items: self.total_items,
            total_pages: self.total_pages(),
            sort_by: self.selection.sorted_by.clone(),
            ascending: self.selection.ascending,
        })
    }

    fn out_of_range(&self, page: u32) -> PaginationError {
        PaginationError::OutOfRange {
            page,
            total_pages: self.total_pages(),
        }
    }
}

type Comparator<T> = fn(&T, &T) -> Ordering;

/// In-memory source: sorts and slices an owned vector.
pub struct VecSource<T> {
    items: Vec<T>,
    column_names: Vec<&'static str>,
    comparators: Vec<Comparator<T>>,
}

impl<T: Clone + Send + Sync> VecSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            column_names: Vec::new(),
            comparators: Vec::new(),
        }
    }

    pub fn sortable(mut self, column: &'static str, compare: Comparator<T>) -> Self {
        self.column_names.push(column);
        self.comparators.push(compare);
        self
    }

    fn comparator(&self, column: &str) -> Option<Comparator<T>> {
        self.column_names
            .iter()
            .position(|name| *name == column)
            .map(|index| self.comparators[index])
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> PageSource for VecSource<T> {
    type Item = T;

    fn sortable_columns(&self) -> &[&'static str] {
        &self.column_names
    }

    async fn total_size(&self) -> AppResult<u64> {
        Ok(self.items.len() as u64)
    }

    async fn fetch(&self, request: &PageRequest) -> AppResult<Vec<T>> {
        let mut items = self.items.clone();
        if let Some(compare) = request.sort_by.as_deref().and_then(|c| self.comparator(c)) {
            let ascending = request.ascending;
            items.sort_by(|a, b| {
                let ordering = compare(a, b);
                if ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        let offset = usize::try_from(request.offset).unwrap_or(usize::MAX);
        Ok(items
            .into_iter()
            .skip(offset)
            .take(request.limit as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::sync::Arc;

    fn numbers(count: u32) -> VecSource<u32> {
        VecSource::new((1..=count).collect()).sortable("value", |a, b| a.cmp(b))
    }

    fn paginator(count: u32, page_size: u32) -> Paginator<VecSource<u32>> {
        Paginator::new(numbers(count), Selection::new(page_size), 50).unwrap()
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(95, 15), 7);
    }

    #[test]
    fn test_rejects_invalid_selection() {
        assert!(matches!(
            Paginator::new(numbers(3), Selection::new(0), 50),
            Err(PaginationError::InvalidPageSize { size: 0, max: 50 })
        ));
        assert!(matches!(
            Paginator::new(numbers(3), Selection::new(10).sorted_by("nope", true), 50),
            Err(PaginationError::UnknownColumn(_))
        ));
    }

    #[tokio::test]
    async fn test_navigation_bounds() {
        let mut paginator = paginator(25, 10);
        let page = paginator.update().await.unwrap();
        assert_eq!(page.items, (1..=10).collect::<Vec<_>>());
        assert_eq!(page.total_pages, 3);

        assert_eq!(
            paginator.previous(),
            Err(PaginationError::OutOfRange { page: 0, total_pages: 3 })
        );

        paginator.next().unwrap();
        paginator.next().unwrap();
        assert!(paginator.is_last());
        assert_eq!(
            paginator.next(),
            Err(PaginationError::OutOfRange { page: 3, total_pages: 3 })
        );
        assert_eq!(paginator.current_page(), 2);

        let page = paginator.update().await.unwrap();
        assert_eq!(page.items, vec![21, 22, 23, 24, 25]);

        paginator.first();
        assert!(paginator.is_first());
        paginator.last();
        assert_eq!(paginator.current_page(), 2);
        assert!(paginator.go_to(3).is_err());
        paginator.go_to(1).unwrap();
        assert_eq!(paginator.current_page(), 1);
    }

    #[tokio::test]
    async fn test_empty_source_has_one_page() {
        let mut paginator = paginator(0, 10);
        let page = paginator.update().await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_pages, 1);
        assert!(paginator.is_first() && paginator.is_last());
    }

    #[tokio::test]
    async fn test_sort_toggles_direction() {
        let mut paginator = paginator(12, 5);
        paginator.update().await.unwrap();
        paginator.next().unwrap();

        paginator.sort_by("value").unwrap();
        assert_eq!(paginator.current_page(), 0);
        assert!(paginator.selection().ascending);

        paginator.sort_by("value").unwrap();
        let page = paginator.update().await.unwrap();
        assert!(!page.ascending);
        assert_eq!(page.items, vec![12, 11, 10, 9, 8]);

        assert_eq!(
            paginator.sort_by("missing"),
            Err(PaginationError::UnknownColumn("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_page_size_change_resets_page() {
        let mut paginator = paginator(30, 10);
        paginator.update().await.unwrap();
        paginator.last();

        paginator.set_page_size(25).unwrap();
        assert_eq!(paginator.current_page(), 0);
        assert!(paginator.set_page_size(51).is_err());
        assert!(paginator.set_page_size(0).is_err());
    }

    struct ShrinkingSource {
        total: Arc<AtomicU64>,
    }

    #[async_trait]
    impl PageSource for ShrinkingSource {
        type Item = u64;

        fn sortable_columns(&self) -> &[&'static str] {
            &[]
        }

        async fn total_size(&self) -> AppResult<u64> {
            Ok(self.total.load(AtomicOrdering::SeqCst))
        }

        async fn fetch(&self, request: &PageRequest) -> AppResult<Vec<u64>> {
            let total = self.total.load(AtomicOrdering::SeqCst);
            Ok((request.offset..total).take(request.limit as usize).collect())
        }
    }

    #[tokio::test]
    async fn test_update_clamps_when_total_shrinks() {
        let total = Arc::new(AtomicU64::new(40));
        let mut paginator = Paginator::new(
            ShrinkingSource { total: Arc::clone(&total) },
            Selection::new(10),
            50,
        )
        .unwrap();
        paginator.update().await.unwrap();
        paginator.go_to(3).unwrap();

        total.store(15, AtomicOrdering::SeqCst);
        let page = paginator.update().await.unwrap();

        assert_eq!(page.page, 1);
        assert_eq!(page.items, vec![10, 11, 12, 13, 14]);
    }
}
