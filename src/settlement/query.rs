use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use super::engine::SettlementEngine;
use super::models::{Bundle, BundleDetail, StatusSummary, WaitingOrder};
use super::store::{BundleFilter, Page, WaitingOrderFilter};

// Read-only paths. Nothing here opens a transaction.
impl SettlementEngine {
    // ========== QUERY OPERATIONS ==========

    /// Completed orders on `filter.side` that no active bundle has consumed
    pub async fn list_waiting_orders(
        &self,
        filter: WaitingOrderFilter,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> AppResult<Page<WaitingOrder>> {
        let pagination = self.pagination(page, page_size);
        let result = self.store().list_waiting_orders(&filter, pagination).await?;

        debug!(
            side = %filter.side,
            "Waiting orders page {}: {} of {}",
            pagination.page,
            result.items.len(),
            result.total
        );
        Ok(result)
    }

    pub async fn list_bundles(
        &self,
        filter: BundleFilter,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> AppResult<Page<Bundle>> {
        let pagination = self.pagination(page, page_size);
        let result = self.store().list_bundles(&filter, pagination).await?;

        debug!(
            "Bundles page {}: {} of {}",
            pagination.page,
            result.items.len(),
            result.total
        );
        Ok(result)
    }

    pub async fn get_bundle(&self, bundle_id: Uuid) -> AppResult<BundleDetail> {
        self.store()
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Bundle {} not found", bundle_id)))
    }

    /// Per-status totals over the same predicate `list_bundles` uses
    pub async fn bundle_summary(&self, filter: BundleFilter) -> AppResult<Vec<StatusSummary>> {
        self.store().summarize_bundles(&filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::lifecycle::TransitionRequest;
    use crate::settlement::models::{BundleStatus, Side};
    use crate::settlement::store::{BundleSortField, OrderSortField, SortDirection};
    use crate::settlement::testing::Fixture;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_waiting_orders_filter_sort_and_page() {
        let fx = Fixture::new().await;
        fx.orders(Side::Sales, &[dec!(300), dec!(100), dec!(200)]).await;
        fx.orders(Side::Purchase, &[dec!(999)]).await;

        let filter = WaitingOrderFilter {
            sort_by: OrderSortField::Amount,
            sort_dir: SortDirection::Asc,
            ..WaitingOrderFilter::for_side(Side::Sales)
        };
        let first = fx
            .engine
            .list_waiting_orders(filter.clone(), Some(1), Some(2))
            .await
            .unwrap();
        let second = fx
            .engine
            .list_waiting_orders(filter, Some(2), Some(2))
            .await
            .unwrap();

        assert_eq!(first.total, 3);
        assert_eq!(second.total, 3);
        let amounts: Vec<_> = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|order| order.amount)
            .collect();
        assert_eq!(amounts, vec![dec!(100), dec!(200), dec!(300)]);
    }

    #[tokio::test]
    async fn test_waiting_orders_search_by_counterparty() {
        let fx = Fixture::new().await;
        fx.orders(Side::Purchase, &[dec!(10)]).await;

        let hit = WaitingOrderFilter {
            search: Some("daehan".to_string()),
            ..WaitingOrderFilter::for_side(Side::Purchase)
        };
        let miss = WaitingOrderFilter {
            search: Some("hanbit".to_string()),
            ..WaitingOrderFilter::for_side(Side::Purchase)
        };

        assert_eq!(fx.engine.list_waiting_orders(hit, None, None).await.unwrap().total, 1);
        assert_eq!(fx.engine.list_waiting_orders(miss, None, None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_bundle_listing_and_summary_share_a_predicate() {
        let fx = Fixture::new().await;
        let a = fx.bundle(Side::Sales, &[dec!(100)]).await;
        fx.bundle(Side::Sales, &[dec!(200)]).await;
        fx.bundle(Side::Purchase, &[dec!(400)]).await;

        fx.engine
            .transition(a.bundle.id, TransitionRequest::to(BundleStatus::Issued), &fx.actor)
            .await
            .unwrap();

        let filter = BundleFilter {
            side: Some(Side::Sales),
            sort_by: BundleSortField::TotalAmountWithTax,
            sort_dir: SortDirection::Desc,
            ..BundleFilter::default()
        };

        let page = fx.engine.list_bundles(filter.clone(), None, None).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].totals.total_amount_with_tax, dec!(220));
        assert_eq!(page.items[1].totals.total_amount_with_tax, dec!(110));

        let summary = fx.engine.bundle_summary(filter).await.unwrap();
        assert_eq!(summary.len(), 2);
        let draft = summary.iter().find(|s| s.status == BundleStatus::Draft).unwrap();
        assert_eq!(draft.bundle_count, 1);
        assert_eq!(draft.total_amount, dec!(200));

        let issued_only = BundleFilter {
            status: Some(BundleStatus::Issued),
            ..BundleFilter::default()
        };
        let page = fx.engine.list_bundles(issued_only, None, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, a.bundle.id);
    }

    #[tokio::test]
    async fn test_get_unknown_bundle_is_not_found() {
        let fx = Fixture::new().await;
        let err = fx.engine.get_bundle(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
