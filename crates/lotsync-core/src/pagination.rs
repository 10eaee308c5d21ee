//! Filtered, sorted pagination over the mirrored inventory.
//!
//! Both addressing modes walk the same global order
//! (`sort field <dir> NULLS LAST, id ASC`), so concatenating cursor pages or
//! offset pages yields the same sequence when the data does not change.

use std::sync::Arc;

use crate::config::QueryConfig;
use crate::cursor::Cursor;
use crate::error::AppError;
use crate::models::InventoryRecord;
use crate::query::{PageMode, PageResponse, QueryRequest};
use crate::traits::InventoryStore;

pub struct PaginationEngine {
    store: Arc<dyn InventoryStore>,
    config: QueryConfig,
}

impl PaginationEngine {
    pub fn new(store: Arc<dyn InventoryStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    /// Page size actually served: 0 means the default, anything above the
    /// maximum is clamped.
    pub fn effective_page_size(&self, requested: u32) -> u32 {
        let max = self.config.max_page_size.max(1);
        match requested {
            0 => self.config.default_page_size.clamp(1, max),
            n => n.min(max),
        }
    }

    pub async fn page(&self, request: QueryRequest) -> Result<PageResponse, AppError> {
        let page_size = self.effective_page_size(request.page_size);
        match &request.mode {
            PageMode::Cursor(token) => {
                self.cursor_page(&request, token.as_deref(), page_size)
                    .await
            }
            PageMode::Offset { page } => self.offset_page(&request, *page, page_size).await,
        }
    }

    async fn cursor_page(
        &self,
        request: &QueryRequest,
        token: Option<&str>,
        page_size: u32,
    ) -> Result<PageResponse, AppError> {
        let sort = request.sort;
        let cursor = token.and_then(|t| {
            let decoded = Cursor::decode(t, sort.field);
            if decoded.is_none() {
                tracing::warn!(cursor = t, "Ignoring malformed cursor, serving first page");
            }
            decoded
        });

        // One extra row tells whether another page exists.
        let (total, mut items) = tokio::try_join!(
            self.store.count(&request.filter),
            self.store.fetch_after(
                &request.filter,
                sort,
                cursor.as_ref(),
                page_size.saturating_add(1)
            ),
        )?;

        let has_next = items.len() > page_size as usize;
        items.truncate(page_size as usize);
        let next_cursor = next_cursor(&items, has_next, request);

        Ok(PageResponse {
            items,
            total,
            has_next,
            has_prev: cursor.is_some(),
            next_cursor,
            page: None,
            page_size,
        })
    }

    async fn offset_page(
        &self,
        request: &QueryRequest,
        page: u32,
        page_size: u32,
    ) -> Result<PageResponse, AppError> {
        let total = self.store.count(&request.filter).await?;
        let last_page = total.div_ceil(page_size as u64).max(1);
        let page = (page as u64).clamp(1, last_page);
        let offset = (page - 1) * page_size as u64;

        let items = self
            .store
            .fetch_offset(&request.filter, request.sort, offset, page_size)
            .await?;

        let has_next = page < last_page;
        let next_cursor = next_cursor(&items, has_next, request);

        Ok(PageResponse {
            items,
            total,
            has_next,
            has_prev: page > 1,
            next_cursor,
            page: Some(page as u32),
            page_size,
        })
    }
}

fn next_cursor(items: &[InventoryRecord], has_next: bool, request: &QueryRequest) -> Option<String> {
    if !has_next {
        return None;
    }
    items
        .last()
        .map(|last| Cursor::from_record(last, request.sort.field).encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{NewInventoryRecord, SortDirection, SortField, SortSpec};
    use crate::query::{FilterField, InventoryFilter};
    use serde_json::json;

    fn vehicle(id: &str, make: &str, price: Option<i64>) -> NewInventoryRecord {
        NewInventoryRecord {
            id: id.to_string(),
            make: make.to_string(),
            model: "Model".to_string(),
            year: 2018,
            fuel: None,
            transmission: None,
            color: None,
            price_cents: price,
            mileage: None,
            rank_score: None,
            created_at: None,
            attributes: json!({}),
            content_hash: String::new(),
        }
        .with_content_hash()
    }

    async fn engine(rows: &[(&str, &str, Option<i64>)]) -> PaginationEngine {
        let store = Arc::new(MemoryStore::new());
        for (id, make, price) in rows {
            store.upsert(&vehicle(id, make, *price)).await.unwrap();
        }
        PaginationEngine::new(store, QueryConfig::default())
    }

    fn ids(response: &PageResponse) -> Vec<&str> {
        response.items.iter().map(|r| r.id.as_str()).collect()
    }

    fn toyotas() -> InventoryFilter {
        InventoryFilter::new().with(FilterField::Make, "Toyota")
    }

    #[tokio::test]
    async fn test_page_size_defaults_and_clamps() {
        let engine = engine(&[]).await;
        assert_eq!(engine.effective_page_size(0), 20);
        assert_eq!(engine.effective_page_size(7), 7);
        assert_eq!(engine.effective_page_size(1000), 100);
    }

    async fn five_toyotas() -> PaginationEngine {
        engine(&[
            ("t-32", "Toyota", Some(3_200_000)),
            ("h-12", "Honda", Some(1_200_000)),
            ("t-10", "Toyota", Some(1_000_000)),
            ("t-28", "Toyota", Some(2_800_000)),
            ("f-20", "Ford", Some(2_000_000)),
            ("t-15", "Toyota", Some(1_500_000)),
            ("t-18", "Toyota", Some(1_800_000)),
        ])
        .await
    }

    #[tokio::test]
    async fn test_five_toyotas_by_price_in_offset_mode() {
        let engine = five_toyotas().await;
        let sort = SortSpec::parse("price_asc").unwrap();

        let first = engine
            .page(QueryRequest::offset(toyotas(), sort, 1, 3))
            .await
            .unwrap();
        assert_eq!(ids(&first), vec!["t-10", "t-15", "t-18"]);
        assert_eq!(first.total, 5);
        assert!(first.has_next);
        assert!(!first.has_prev);
        assert_eq!(first.page, Some(1));

        let second = engine
            .page(QueryRequest::offset(toyotas(), sort, 2, 3))
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["t-28", "t-32"]);
        assert_eq!(second.total, 5);
        assert!(!second.has_next);
        assert!(second.has_prev);
        assert_eq!(second.page, Some(2));
    }

    #[tokio::test]
    async fn test_five_toyotas_by_price_in_cursor_mode() {
        let engine = five_toyotas().await;
        let sort = SortSpec::parse("price_asc").unwrap();

        let first = engine
            .page(QueryRequest::first_page(toyotas(), sort, 3))
            .await
            .unwrap();
        assert_eq!(ids(&first), vec!["t-10", "t-15", "t-18"]);
        assert_eq!(first.total, 5);
        assert!(first.has_next);
        assert!(!first.has_prev);

        let token = first.next_cursor.clone().unwrap();
        let second = engine
            .page(QueryRequest::after(toyotas(), sort, token, 3))
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["t-28", "t-32"]);
        assert!(!second.has_next);
        assert!(second.has_prev);
        assert!(second.next_cursor.is_none());
        assert!(ids(&first).iter().all(|id| !ids(&second).contains(id)));
    }

    #[tokio::test]
    async fn test_cursor_walk_over_filtered_set() {
        let engine = engine(&[
            ("t1", "Toyota", Some(2_000_000)),
            ("h1", "Honda", Some(1_500_000)),
            ("t2", "Toyota", Some(1_800_000)),
            ("t3", "Toyota", None),
            ("t4", "Toyota", Some(1_800_000)),
        ])
        .await;
        let sort = SortSpec::new(SortField::PriceCents, SortDirection::Asc);

        let first = engine
            .page(QueryRequest::first_page(toyotas(), sort, 2))
            .await
            .unwrap();
        assert_eq!(ids(&first), vec!["t2", "t4"]);
        assert_eq!(first.total, 4);
        assert!(first.has_next);
        assert!(!first.has_prev);

        let token = first.next_cursor.clone().unwrap();
        let second = engine
            .page(QueryRequest::after(toyotas(), sort, token, 2))
            .await
            .unwrap();
        assert_eq!(ids(&second), vec!["t1", "t3"]);
        assert!(!second.has_next);
        assert!(second.has_prev);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_malformed_cursor_serves_first_page() {
        let engine = engine(&[("a", "Toyota", Some(1)), ("b", "Toyota", Some(2))]).await;
        let sort = SortSpec::new(SortField::PriceCents, SortDirection::Asc);
        let response = engine
            .page(QueryRequest::after(toyotas(), sort, "%%%not-a-cursor", 1))
            .await
            .unwrap();
        assert_eq!(ids(&response), vec!["a"]);
        assert!(!response.has_prev);
    }

    #[tokio::test]
    async fn test_offset_page_beyond_end_is_clamped() {
        let engine = engine(&[
            ("a", "Toyota", Some(1)),
            ("b", "Toyota", Some(2)),
            ("c", "Toyota", Some(3)),
        ])
        .await;
        let sort = SortSpec::new(SortField::PriceCents, SortDirection::Asc);

        let response = engine
            .page(QueryRequest::offset(toyotas(), sort, 9, 2))
            .await
            .unwrap();
        assert_eq!(response.page, Some(2));
        assert_eq!(ids(&response), vec!["c"]);
        assert!(!response.has_next);
        assert!(response.has_prev);

        let response = engine
            .page(QueryRequest::offset(toyotas(), sort, 0, 2))
            .await
            .unwrap();
        assert_eq!(response.page, Some(1));
        assert!(response.has_next);
        assert!(response.next_cursor.is_some());
    }

    #[tokio::test]
    async fn test_empty_result() {
        let engine = engine(&[("h", "Honda", Some(1))]).await;
        let response = engine
            .page(QueryRequest::offset(toyotas(), SortSpec::default(), 1, 10))
            .await
            .unwrap();
        assert!(response.items.is_empty());
        assert_eq!(response.total, 0);
        assert_eq!(response.page, Some(1));
        assert!(!response.has_next);
        assert!(!response.has_prev);
    }

    #[tokio::test]
    async fn test_offset_next_cursor_continues_in_cursor_mode() {
        let engine = engine(&[
            ("a", "Toyota", Some(5)),
            ("b", "Toyota", Some(4)),
            ("c", "Toyota", Some(3)),
            ("d", "Toyota", Some(2)),
        ])
        .await;
        let sort = SortSpec::new(SortField::PriceCents, SortDirection::Desc);

        let offset = engine
            .page(QueryRequest::offset(toyotas(), sort, 1, 2))
            .await
            .unwrap();
        let cursor = engine
            .page(QueryRequest::after(
                toyotas(),
                sort,
                offset.next_cursor.clone().unwrap(),
                2,
            ))
            .await
            .unwrap();
        let page_two = engine
            .page(QueryRequest::offset(toyotas(), sort, 2, 2))
            .await
            .unwrap();
        assert_eq!(ids(&cursor), ids(&page_two));
        assert_eq!(ids(&cursor), vec!["c", "d"]);
    }
}
